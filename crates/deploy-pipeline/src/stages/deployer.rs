//! Managed service deployment

use std::collections::BTreeMap;
use std::sync::Arc;

use deploy_common::{Error, Result};
use serde::Serialize;
use tracing::{error, info};

use crate::clients::{ComputePlatform, ServiceHandle, ServiceInfo, ServiceSpec, VpcAccess};
use crate::config::ServiceSettings;

/// A running service with its access policy applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedService {
    pub handle: ServiceHandle,
    pub info: ServiceInfo,
    pub rpc_endpoint: String,
    pub ws_endpoint: String,
}

pub struct ServiceDeployer {
    compute: Arc<dyn ComputePlatform>,
    project_id: String,
    settings: ServiceSettings,
}

impl ServiceDeployer {
    pub fn new(
        compute: Arc<dyn ComputePlatform>,
        project_id: impl Into<String>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            compute,
            project_id: project_id.into(),
            settings,
        }
    }

    /// Create the service, bind its invoker policy and read back its endpoints
    ///
    /// Creation blocks until the platform reports the service ready and is
    /// never retried. A policy failure after creation is reported as
    /// `PolicyBindingFailed`, leaving the service in place.
    pub async fn deploy(
        &self,
        service_name: &str,
        image_tag: &str,
        region: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<DeployedService> {
        let parent = format!("projects/{}/locations/{}", self.project_id, region);
        let spec = self.service_spec(service_name, image_tag, region, env);

        info!("Deploying to Cloud Run: {}", service_name);
        let handle = self.compute.create_service(&parent, &spec).await.map_err(|e| {
            error!("Failed to create service {}: {}", service_name, e);
            e
        })?;

        let policy = self.settings.invoker.to_policy();
        if let Err(e) = self.compute.set_access_policy(&handle, &policy).await {
            error!("Failed to set IAM policy on {}: {}", service_name, e);
            return Err(Error::PolicyBindingFailed {
                service_name: service_name.to_string(),
                cause: Box::new(e),
            });
        }

        let info = self.compute.get_service(&handle).await?;
        if info.uri.is_empty() {
            return Err(Error::InvalidRemoteConfig(format!(
                "service {} reports no uri",
                service_name
            )));
        }

        info!(
            service = service_name,
            revision = %info.latest_revision,
            "Service deployed at {}",
            info.uri
        );

        Ok(DeployedService {
            rpc_endpoint: info.uri.clone(),
            ws_endpoint: websocket_endpoint(&info.uri),
            handle,
            info,
        })
    }

    fn service_spec(
        &self,
        service_name: &str,
        image_tag: &str,
        region: &str,
        env: &BTreeMap<String, String>,
    ) -> ServiceSpec {
        ServiceSpec {
            service_id: service_name.to_string(),
            image: image_tag.to_string(),
            container_port: self.settings.container_port,
            cpu_limit: self.settings.cpu_limit.clone(),
            memory_limit: self.settings.memory_limit.clone(),
            env: env.clone(),
            vpc_access: self.settings.connector_for(region).map(|connector| VpcAccess {
                connector: connector.to_string(),
                egress: self.settings.vpc_egress.clone(),
            }),
        }
    }
}

/// `https://` becomes `wss://`, `http://` becomes `ws://`
pub fn websocket_endpoint(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = uri.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InvokerPolicy;
    use crate::mock::MockCompute;

    fn env() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("CLIENT_ID".to_string(), "a@b.com".to_string()),
            ("API_KEY".to_string(), "k".to_string()),
            ("JWT_SECRET".to_string(), "s".to_string()),
        ])
    }

    #[test]
    fn test_websocket_endpoint() {
        assert_eq!(websocket_endpoint("https://x.run.app"), "wss://x.run.app");
        assert_eq!(websocket_endpoint("http://localhost:8080"), "ws://localhost:8080");
        assert_eq!(websocket_endpoint("x.run.app"), "x.run.app");
    }

    #[tokio::test]
    async fn test_deploy_sets_policy_and_endpoints() {
        let compute = Arc::new(MockCompute::new());
        let deployer = ServiceDeployer::new(compute.clone(), "p", ServiceSettings::default());

        let deployed = deployer
            .deploy("secure-app-1", "img:1", "us-central1", &env())
            .await
            .unwrap();

        assert_eq!(deployed.rpc_endpoint, "https://secure-app-1-mock.a.run.app");
        assert_eq!(deployed.ws_endpoint, "wss://secure-app-1-mock.a.run.app");

        let service = compute.service("secure-app-1").unwrap();
        assert_eq!(service.spec.container_port, 8080);
        assert_eq!(service.spec.memory_limit, "512Mi");
        assert!(service.spec.env.contains_key("JWT_SECRET"));
        assert!(service.spec.vpc_access.is_none());
        assert_eq!(
            service.policy.unwrap().bindings[0].members,
            vec!["allUsers"]
        );
    }

    #[tokio::test]
    async fn test_create_failure_is_not_policy_failure() {
        let compute = Arc::new(MockCompute::new().failing_create());
        let deployer = ServiceDeployer::new(compute.clone(), "p", ServiceSettings::default());

        let err = deployer
            .deploy("secure-app-1", "img:1", "us-central1", &env())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidRemoteConfig(_)));
        assert_eq!(compute.create_calls(), 1);
        assert_eq!(compute.policy_calls(), 0);
    }

    #[tokio::test]
    async fn test_policy_failure_after_create() {
        let compute = Arc::new(MockCompute::new().failing_policy());
        let deployer = ServiceDeployer::new(compute.clone(), "p", ServiceSettings::default());

        let err = deployer
            .deploy("secure-app-1", "img:1", "us-central1", &env())
            .await
            .unwrap_err();

        match err {
            Error::PolicyBindingFailed {
                service_name,
                cause,
            } => {
                assert_eq!(service_name, "secure-app-1");
                assert!(matches!(*cause, Error::PermissionDenied(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(compute.service_count(), 1);
    }

    #[tokio::test]
    async fn test_connector_and_members() {
        let compute = Arc::new(MockCompute::new());
        let mut settings = ServiceSettings::default();
        settings.vpc_connectors.insert(
            "us-central1".to_string(),
            "projects/p/locations/us-central1/connectors/c".to_string(),
        );
        settings.invoker = InvokerPolicy::Members(vec!["serviceAccount:gw@p.iam".to_string()]);
        let deployer = ServiceDeployer::new(compute.clone(), "p", settings);

        deployer
            .deploy("secure-app-1", "img:1", "us-central1", &env())
            .await
            .unwrap();

        let service = compute.service("secure-app-1").unwrap();
        let vpc = service.spec.vpc_access.unwrap();
        assert_eq!(vpc.egress, "PRIVATE_RANGES_ONLY");
        assert_eq!(
            service.policy.unwrap().bindings[0].members,
            vec!["serviceAccount:gw@p.iam"]
        );
    }
}
