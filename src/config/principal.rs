use crate::core::{BootstrapError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credential material that must never show up in logs or rendered plans.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw secret (internal use only)
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// The administrative identity provisioned once per bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrincipalSpec {
    pub username: String,
    #[serde(default)]
    pub secret: Secret,
    pub database: String,
    pub role: String,
    /// Replica group the principal is created on; defaults to the config tier.
    #[serde(default)]
    pub group: Option<String>,
}

impl PrincipalSpec {
    pub fn new(
        username: impl Into<String>,
        secret: impl Into<String>,
        database: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            secret: Secret::new(secret),
            database: database.into(),
            role: role.into(),
            group: None,
        }
    }

    pub fn on_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(BootstrapError::InvalidConfig(
                "principal username must not be empty".to_string(),
            ));
        }
        if self.username.len() > 64 {
            return Err(BootstrapError::InvalidConfig(
                "principal username too long (max 64 characters)".to_string(),
            ));
        }
        if self.secret.is_empty() {
            return Err(BootstrapError::InvalidConfig(format!(
                "No secret supplied for principal '{}'; set it in the config file or the environment",
                self.username
            )));
        }
        if self.database.trim().is_empty() {
            return Err(BootstrapError::InvalidConfig(
                "principal database must not be empty".to_string(),
            ));
        }
        if self.role.trim().is_empty() {
            return Err(BootstrapError::InvalidConfig(
                "principal role must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let spec = PrincipalSpec::new("admin", "s3cr3t-value", "admin", "root");
        let rendered = format!("{:?}", spec);
        assert!(!rendered.contains("s3cr3t-value"));
        assert!(rendered.contains("***"));
        assert_eq!(spec.secret.expose(), "s3cr3t-value");
    }

    #[test]
    fn test_missing_secret_rejected() {
        let spec = PrincipalSpec::new("admin", "", "admin", "root");
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("No secret supplied"));
    }

    #[test]
    fn test_empty_role_rejected() {
        let spec = PrincipalSpec::new("admin", "pw", "admin", " ");
        assert!(spec.validate().is_err());
    }
}
