use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;

fn harden_secret_file_permissions(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            server_name: default_server_name(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Generated on first run when no config file exists.
    #[serde(default = "generate_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_seconds: u64,
    #[serde(default = "default_true")]
    pub registration_enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_jwt_secret(),
            jwt_expiry_seconds: default_jwt_expiry(),
            registration_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Largest attachment (by declared size) a message may reference.
    #[serde(default = "default_max_attachment_size")]
    pub max_attachment_size: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_attachment_size: default_max_attachment_size(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("Config file not found at '{}', generating defaults...", path);
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, toml::to_string_pretty(&config)?)?;
            let _ = harden_secret_file_permissions(path);
            tracing::info!("Generated default config at '{}'", path);
            config
        };
        let _ = harden_secret_file_permissions(path);

        // Environment variable overrides
        if let Ok(value) = std::env::var("CONCLAVE_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("CONCLAVE_DATABASE_URL") {
            config.database.url = value;
        }
        if let Ok(value) = std::env::var("CONCLAVE_JWT_SECRET") {
            config.auth.jwt_secret = value;
        }

        Ok(config)
    }
}

fn generate_jwt_secret() -> String {
    let mut rng = rand::thread_rng();
    (0..64)
        .map(|_| {
            let idx = rng.gen_range(0..16u8);
            char::from(if idx < 10 {
                b'0' + idx
            } else {
                b'a' + idx - 10
            })
        })
        .collect()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}
fn default_server_name() -> String {
    "localhost".into()
}
fn default_database_url() -> String {
    "sqlite://./data/conclave.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    20
}
fn default_jwt_expiry() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}
fn default_max_attachment_size() -> i64 {
    10 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn minimal_file_is_filled_with_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [database]
            url = "sqlite://./test.db?mode=rwc"
            "#,
        )
        .expect("parse");
        assert_eq!(parsed.database.url, "sqlite://./test.db?mode=rwc");
        assert_eq!(parsed.server.bind_address, "0.0.0.0:8080");
        assert_eq!(parsed.auth.jwt_secret.len(), 64);
        assert!(parsed.auth.registration_enabled);
        assert_eq!(parsed.limits.max_attachment_size, 10 * 1024 * 1024);
    }

    #[test]
    fn load_generates_a_config_file_with_a_secret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("conclave.toml");
        let path = path.to_string_lossy().into_owned();
        let generated = Config::load(&path).expect("load");
        assert!(std::path::Path::new(&path).exists());
        // A second load reads the same secret back.
        let reloaded = Config::load(&path).expect("reload");
        assert_eq!(generated.auth.jwt_secret, reloaded.auth.jwt_secret);
    }
}
