use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local blob store
    #[serde(default = "default_local_path")]
    pub local_path: String,
    /// Directory for in-flight uploads
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "data/dedupstore.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_local_path() -> String {
    "data/blobs".to_string()
}

fn default_spool_dir() -> String {
    "data/spool".to_string()
}

fn default_max_upload_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            spool_dir: default_spool_dir(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        Ok(config)
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: DS_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(val) = lookup("DS_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(val) = lookup("DS_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        // Database overrides
        if let Some(val) = lookup("DS_CONF_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Some(val) = lookup("DS_CONF_DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                self.database.max_connections = n;
            }
        }

        // Storage overrides
        if let Some(val) = lookup("DS_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }
        if let Some(val) = lookup("DS_CONF_STORAGE_SPOOL_DIR") {
            self.storage.spool_dir = val;
        }

        // Upload overrides
        if let Some(val) = lookup("DS_CONF_UPLOAD_MAX_BYTES") {
            if let Ok(n) = val.parse() {
                self.upload.max_upload_bytes = n;
            }
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&self.storage.local_path)?;
        fs::create_dir_all(&self.storage.spool_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9100

            [upload]
            max_upload_bytes = 4096
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.upload.max_upload_bytes, 4096);
        assert_eq!(config.database.path, "data/dedupstore.db");
        assert_eq!(config.storage.spool_dir, "data/spool");
    }

    #[test]
    fn test_overrides_ignore_unparseable_values() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "DS_CONF_SERVER_PORT" => Some("not-a-port".to_string()),
            "DS_CONF_STORAGE_LOCAL_PATH" => Some("/srv/blobs".to_string()),
            "DS_CONF_UPLOAD_MAX_BYTES" => Some("1024".to_string()),
            _ => None,
        });

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.storage.local_path, "/srv/blobs");
        assert_eq!(config.upload.max_upload_bytes, 1024);
    }
}
