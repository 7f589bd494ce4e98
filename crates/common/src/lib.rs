pub mod context;
pub mod credential;
pub mod error;
pub mod record;
pub mod security;

pub use context::{DeploymentContext, NamingConfig};
pub use credential::{AccessClaims, AccessCredential, CredentialIssuer, TokenRejection};
pub use error::{Error, PipelineError, Result, Stage};
pub use record::{DeploymentRecord, DeploymentResult, DeploymentStatus};
pub use security::SecurityContext;
