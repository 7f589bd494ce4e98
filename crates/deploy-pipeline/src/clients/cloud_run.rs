//! Cloud Run Admin REST client (v2)

use async_trait::async_trait;
use deploy_common::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::gcp::{GcpApi, Operation, SetIamPolicyRequest};
use super::{AccessPolicy, ComputePlatform, ServiceHandle, ServiceInfo, ServiceSpec};

pub const DEFAULT_ENDPOINT: &str = "https://run.googleapis.com/v2";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceBody<'a> {
    template: RevisionTemplate<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RevisionTemplate<'a> {
    containers: Vec<Container<'a>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    vpc_access: Option<VpcAccessBody<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Container<'a> {
    image: &'a str,
    ports: Vec<ContainerPort>,
    resources: Resources<'a>,
    env: Vec<EnvVar<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerPort {
    container_port: u16,
}

#[derive(Debug, Serialize)]
struct Resources<'a> {
    limits: Limits<'a>,
}

#[derive(Debug, Serialize)]
struct Limits<'a> {
    cpu: &'a str,
    memory: &'a str,
}

#[derive(Debug, Serialize)]
struct EnvVar<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct VpcAccessBody<'a> {
    connector: &'a str,
    egress: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceResource {
    #[serde(default)]
    name: String,

    #[serde(default)]
    uri: String,

    #[serde(default)]
    latest_ready_revision: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListServicesResponse {
    #[serde(default)]
    services: Vec<ServiceResource>,

    #[serde(default)]
    next_page_token: Option<String>,
}

fn service_body(spec: &ServiceSpec) -> ServiceBody<'_> {
    ServiceBody {
        template: RevisionTemplate {
            containers: vec![Container {
                image: &spec.image,
                ports: vec![ContainerPort {
                    container_port: spec.container_port,
                }],
                resources: Resources {
                    limits: Limits {
                        cpu: &spec.cpu_limit,
                        memory: &spec.memory_limit,
                    },
                },
                env: spec
                    .env
                    .iter()
                    .map(|(name, value)| EnvVar { name, value })
                    .collect(),
            }],
            vpc_access: spec.vpc_access.as_ref().map(|vpc| VpcAccessBody {
                connector: &vpc.connector,
                egress: &vpc.egress,
            }),
        },
    }
}

/// Client for Cloud Run services
pub struct CloudRunClient {
    api: GcpApi,
}

impl CloudRunClient {
    pub fn new(api: GcpApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ComputePlatform for CloudRunClient {
    async fn create_service(&self, parent: &str, spec: &ServiceSpec) -> Result<ServiceHandle> {
        info!("Creating Cloud Run service {} under {}", spec.service_id, parent);

        let request = self
            .api
            .post(&format!("{}/services", parent))
            .query(&[("serviceId", spec.service_id.as_str())])
            .json(&service_body(spec));

        let operation: Operation = self.api.send_json(request).await?;
        self.api.wait_operation(operation).await?;

        info!("Cloud Run service {} created", spec.service_id);
        Ok(ServiceHandle::new(parent, &spec.service_id))
    }

    async fn set_access_policy(
        &self,
        service: &ServiceHandle,
        policy: &AccessPolicy,
    ) -> Result<()> {
        debug!("Setting IAM policy on {}", service.name);

        let request = self
            .api
            .post(&format!("{}:setIamPolicy", service.name))
            .json(&SetIamPolicyRequest { policy });

        let _: serde_json::Value = self.api.send_json(request).await?;
        Ok(())
    }

    async fn get_service(&self, service: &ServiceHandle) -> Result<ServiceInfo> {
        let resource: ServiceResource = self.api.send_json(self.api.get(&service.name)).await?;

        Ok(ServiceInfo {
            uri: resource.uri,
            latest_revision: resource.latest_ready_revision,
        })
    }

    async fn list_services(&self, parent: &str) -> Result<Vec<ServiceHandle>> {
        let mut handles = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.api.get(&format!("{}/services", parent));
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: ListServicesResponse = self.api.send_json(request).await?;
            handles.extend(
                page.services
                    .into_iter()
                    .map(|s| ServiceHandle { name: s.name }),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::VpcAccess;
    use std::collections::BTreeMap;

    fn spec(vpc: Option<VpcAccess>) -> ServiceSpec {
        ServiceSpec {
            service_id: "secure-app-1".to_string(),
            image: "host/p/r/secure-app:1".to_string(),
            container_port: 8080,
            cpu_limit: "1".to_string(),
            memory_limit: "512Mi".to_string(),
            env: BTreeMap::from([("CLIENT_ID".to_string(), "a@b.com".to_string())]),
            vpc_access: vpc,
        }
    }

    #[test]
    fn test_service_body_shape() {
        let body = serde_json::to_value(service_body(&spec(None))).unwrap();
        let container = &body["template"]["containers"][0];

        assert_eq!(container["image"], "host/p/r/secure-app:1");
        assert_eq!(container["ports"][0]["containerPort"], 8080);
        assert_eq!(container["resources"]["limits"]["cpu"], "1");
        assert_eq!(container["resources"]["limits"]["memory"], "512Mi");
        assert_eq!(container["env"][0]["name"], "CLIENT_ID");
        assert!(body["template"].get("vpcAccess").is_none());
    }

    #[test]
    fn test_service_body_with_connector() {
        let body = serde_json::to_value(service_body(&spec(Some(VpcAccess {
            connector: "projects/p/locations/us-central1/connectors/c".to_string(),
            egress: "PRIVATE_RANGES_ONLY".to_string(),
        }))))
        .unwrap();

        assert_eq!(
            body["template"]["vpcAccess"]["egress"],
            "PRIVATE_RANGES_ONLY"
        );
    }
}
