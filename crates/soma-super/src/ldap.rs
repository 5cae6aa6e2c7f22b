use std::collections::HashMap;

use async_trait::async_trait;
use ldap3::{drive, LdapConnAsync};
use soma_config::LdapConfig;
use tracing::debug;

use crate::error::SuperError;

/// External ownership verification used during account activation and
/// password reset. The supervisor only learns pass/fail.
#[async_trait]
pub trait OwnershipVerifier: Send + Sync + 'static {
    async fn verify(&self, user: &str, secret: &str) -> Result<bool, SuperError>;
}

/// Verifies ownership with an LDAP simple bind as the user.
pub struct LdapVerifier {
    config: LdapConfig,
}

impl LdapVerifier {
    pub fn new(config: LdapConfig) -> Self {
        LdapVerifier { config }
    }

    fn url(&self) -> String {
        let scheme = if self.config.tls { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.config.address, self.config.port)
    }

    fn bind_dn(&self, user: &str) -> String {
        format!(
            "{}={},{},{}",
            self.config.attribute, user, self.config.user_dn, self.config.base_dn
        )
    }
}

#[async_trait]
impl OwnershipVerifier for LdapVerifier {
    async fn verify(&self, user: &str, secret: &str) -> Result<bool, SuperError> {
        let (conn, mut ldap) = LdapConnAsync::new(&self.url())
            .await
            .map_err(|e| SuperError::Internal(format!("ldap connect: {e}")))?;
        drive!(conn);

        let bound = ldap
            .simple_bind(&self.bind_dn(user), secret)
            .await
            .map_err(|e| SuperError::Internal(format!("ldap bind: {e}")))?
            .success()
            .is_ok();
        let _ = ldap.unbind().await;
        debug!(user, bound, "ldap ownership verification");
        Ok(bound)
    }
}

/// Refuses every verification; used when no external mechanism is
/// configured.
pub struct DenyAllVerifier;

#[async_trait]
impl OwnershipVerifier for DenyAllVerifier {
    async fn verify(&self, _user: &str, _secret: &str) -> Result<bool, SuperError> {
        Ok(false)
    }
}

/// Fixed user/secret table for tests.
#[derive(Default)]
pub struct StaticVerifier {
    accepted: HashMap<String, String>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(mut self, user: &str, secret: &str) -> Self {
        self.accepted.insert(user.to_string(), secret.to_string());
        self
    }
}

#[async_trait]
impl OwnershipVerifier for StaticVerifier {
    async fn verify(&self, user: &str, secret: &str) -> Result<bool, SuperError> {
        Ok(self.accepted.get(user).map(String::as_str) == Some(secret))
    }
}
