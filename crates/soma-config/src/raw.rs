use serde::Deserialize;

/// Raw YAML representation of the daemon configuration file.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub environment: String,
    #[serde(default)]
    pub readonly: bool,
    pub database: RawDatabase,
    pub daemon: RawDaemon,
    pub auth: RawAuth,
    pub ldap: Option<RawLdap>,
    pub eye: Option<RawEye>,
    pub soma: Option<RawSoma>,
}

#[derive(Debug, Deserialize)]
pub struct RawDatabase {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub user: String,
    pub name: String,
    pub password: String,
    #[serde(default = "default_tlsmode")]
    pub tlsmode: String,
    #[serde(default = "default_db_timeout")]
    pub timeout_sec: u64,
}

#[derive(Debug, Deserialize)]
pub struct RawDaemon {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawAuth {
    pub activation: String,
    #[serde(default = "default_expiry_days")]
    pub credential_expiry_days: u32,
    /// Hex key for token minting.
    pub token_key: String,
}

#[derive(Debug, Deserialize)]
pub struct RawLdap {
    pub address: String,
    #[serde(default = "default_ldap_port")]
    pub port: u16,
    pub base_dn: String,
    pub user_dn: String,
    pub attribute: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub skip_verify: bool,
    pub cert: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawEye {
    pub address: String,
    #[serde(default = "default_eye_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct RawSoma {
    pub address: String,
}

fn default_pg_port() -> u16 {
    5432
}

fn default_tlsmode() -> String {
    "verify-full".to_string()
}

fn default_db_timeout() -> u64 {
    5
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_expiry_days() -> u32 {
    365
}

fn default_ldap_port() -> u16 {
    636
}

fn default_eye_timeout() -> u64 {
    500
}
