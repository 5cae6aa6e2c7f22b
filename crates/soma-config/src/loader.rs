use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawConfig;

// ── Validated configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ActivationMode {
    Ldap,
    MailToken,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub name: String,
    pub password: String,
    pub tlsmode: String,
    pub timeout_sec: u64,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.tlsmode
        )
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub listen: String,
    pub port: u16,
    pub tls: bool,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub activation: ActivationMode,
    pub credential_expiry_days: u32,
    /// Key for token minting, decoded from hex.
    pub token_key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct LdapConfig {
    pub address: String,
    pub port: u16,
    pub base_dn: String,
    pub user_dn: String,
    pub attribute: String,
    pub tls: bool,
    pub skip_verify: bool,
    pub cert: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EyeConfig {
    pub address: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub readonly: bool,
    pub database: DatabaseConfig,
    pub daemon: DaemonConfig,
    pub auth: AuthConfig,
    pub ldap: Option<LdapConfig>,
    pub eye: Option<EyeConfig>,
    /// Public address of this instance, used in Eye notifications.
    pub soma_address: Option<String>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load and validate the daemon configuration from a single YAML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!("loaded configuration from {}", path.display());
    validate(raw)
}

fn validate(raw: RawConfig) -> Result<Config, ConfigError> {
    let activation = match raw.auth.activation.as_str() {
        "ldap" => ActivationMode::Ldap,
        "mailtoken" => ActivationMode::MailToken,
        other => {
            return Err(ConfigError::invalid(
                "auth.activation",
                format!("'{}' is not one of ldap, mailtoken", other),
            ))
        }
    };
    if activation == ActivationMode::Ldap && raw.ldap.is_none() {
        return Err(ConfigError::invalid(
            "ldap",
            "ldap section required when auth.activation = ldap",
        ));
    }

    let token_key = hex::decode(&raw.auth.token_key)
        .map_err(|_| ConfigError::invalid("auth.token_key", "not a hex string"))?;
    if token_key.len() < 16 {
        return Err(ConfigError::invalid(
            "auth.token_key",
            "key must be at least 128 bits",
        ));
    }

    if raw.daemon.tls && (raw.daemon.cert_file.is_none() || raw.daemon.key_file.is_none()) {
        return Err(ConfigError::invalid(
            "daemon.tls",
            "cert_file and key_file required when tls is enabled",
        ));
    }

    match raw.database.tlsmode.as_str() {
        "disable" | "prefer" | "require" | "verify-ca" | "verify-full" => {}
        other => {
            return Err(ConfigError::invalid(
                "database.tlsmode",
                format!("unknown tlsmode '{}'", other),
            ))
        }
    }

    Ok(Config {
        environment: raw.environment,
        readonly: raw.readonly,
        database: DatabaseConfig {
            host: raw.database.host,
            port: raw.database.port,
            user: raw.database.user,
            name: raw.database.name,
            password: raw.database.password,
            tlsmode: raw.database.tlsmode,
            timeout_sec: raw.database.timeout_sec,
        },
        daemon: DaemonConfig {
            listen: raw.daemon.listen,
            port: raw.daemon.port,
            tls: raw.daemon.tls,
            cert_file: raw.daemon.cert_file,
            key_file: raw.daemon.key_file,
        },
        auth: AuthConfig {
            activation,
            credential_expiry_days: raw.auth.credential_expiry_days,
            token_key,
        },
        ldap: raw.ldap.map(|l| LdapConfig {
            address: l.address,
            port: l.port,
            base_dn: l.base_dn,
            user_dn: l.user_dn,
            attribute: l.attribute,
            tls: l.tls,
            skip_verify: l.skip_verify,
            cert: l.cert,
        }),
        eye: raw.eye.map(|e| EyeConfig { address: e.address, timeout_ms: e.timeout_ms }),
        soma_address: raw.soma.map(|s| s.address),
    })
}

