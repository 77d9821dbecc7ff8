//! Access token lookup for applications

use crate::core::Application;

use super::CiError;

/// Supplies the decrypted access token for an application
pub trait CredentialProvider: Send + Sync {
    fn token(&self, application: &Application) -> Result<String, CiError>;
}

/// Reads tokens from the environment variable named by `token_env`
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider;

impl CredentialProvider for EnvCredentialProvider {
    fn token(&self, application: &Application) -> Result<String, CiError> {
        let var = application.token_env.as_deref().ok_or_else(|| {
            CiError::Unauthorized(format!(
                "application {} has no token_env configured",
                application.id
            ))
        })?;

        match std::env::var(var) {
            Ok(token) if !token.is_empty() => Ok(token),
            _ => Err(CiError::Unauthorized(format!(
                "environment variable {} is not set for application {}",
                var, application.id
            ))),
        }
    }
}

/// Returns the same token for every application
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    token: String,
}

impl StaticCredentialProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn token(&self, _application: &Application) -> Result<String, CiError> {
        Ok(self.token.clone())
    }
}
