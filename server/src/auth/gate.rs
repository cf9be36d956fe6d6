//! Connection admission. Authentication completes before an endpoint exists,
//! so a rejected connection leaves no state behind.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AuthError;

/// Turns a connection credential into a stable identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<String, AuthError>;
}

#[derive(Clone)]
pub struct ConnectionGate {
    authenticator: Arc<dyn Authenticator>,
}

impl ConnectionGate {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }

    /// Authenticate a handshake credential. Blank or absent credentials are
    /// rejected without consulting the authenticator.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<String, AuthError> {
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::Missing)?;
        let identity = self.authenticator.verify(credential).await?;
        if identity.is_empty() {
            return Err(AuthError::Invalid);
        }
        Ok(identity)
    }
}
