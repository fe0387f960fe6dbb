//! Server configuration.
//!
//! A JSON file under the config directory (`$SPYGLASS_CONFIG_DIR`, else
//! `~/.spyglass`). On first run the file is created with a freshly random
//! server secret and restrictive permissions; the secret is what makes
//! stored credential blobs useless to anyone holding only the database.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const CONFIG_FILE: &str = "config.json";
const SECRET_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Hex-encoded server half of the credential-vault key material.
    /// Generated on first run; changing it orphans every stored credential.
    pub server_secret: String,

    /// Where the target store is persisted. Relative paths are resolved
    /// against the config directory.
    #[serde(default = "default_targets_file")]
    pub targets_file: PathBuf,

    /// Static bearer-token to user-id map guarding the session endpoints.
    /// Stands in until an external identity provider fronts the server.
    #[serde(default)]
    pub access_tokens: HashMap<String, i64>,
}

fn default_listen() -> String {
    "127.0.0.1:8889".to_string()
}

fn default_targets_file() -> PathBuf {
    PathBuf::from("targets.json")
}

impl ServerConfig {
    /// Load the config, creating directory, file, and server secret on
    /// first run. `SPYGLASS_LISTEN` overrides the configured bind address.
    pub fn load_or_create(explicit_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        let dir = config_dir(explicit_dir);
        let path = dir.join(CONFIG_FILE);

        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::generate();
                write_private(&dir, &path, &serde_json::to_vec_pretty(&config)?)?;
                info!(path = %path.display(), "created config with a new server secret");
                config
            }
            Err(err) => return Err(err.into()),
        };

        if let Ok(listen) = std::env::var("SPYGLASS_LISTEN") {
            config.listen = listen;
        }
        if config.targets_file.is_relative() {
            config.targets_file = dir.join(&config.targets_file);
        }
        Ok(config)
    }

    fn generate() -> Self {
        let mut secret = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut secret);
        let mut token = [0u8; 16];
        OsRng.fill_bytes(&mut token);
        // First-run convenience: one token for user 1, readable (only) from
        // the config file.
        let access_tokens = HashMap::from([(hex::encode(token), 1)]);
        Self {
            listen: default_listen(),
            server_secret: hex::encode(secret),
            targets_file: default_targets_file(),
            access_tokens,
        }
    }

    pub fn server_secret(&self) -> SecretString {
        SecretString::from(self.server_secret.clone())
    }
}

fn config_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Ok(dir) = std::env::var("SPYGLASS_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".spyglass"),
        None => PathBuf::from(".spyglass"),
    }
}

/// Create the directory and file with owner-only permissions. The file
/// holds the server secret, so group/world access is never acceptable.
fn write_private(dir: &Path, path: &Path, contents: &[u8]) -> Result<(), ConfigError> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_generates_a_secret_and_reload_keeps_it() {
        let dir = tempfile::tempdir().unwrap();
        let created = ServerConfig::load_or_create(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(created.server_secret.len(), SECRET_BYTES * 2);
        assert!(created.server_secret.chars().all(|c| c.is_ascii_hexdigit()));

        let reloaded = ServerConfig::load_or_create(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(reloaded.server_secret, created.server_secret);
        assert_eq!(reloaded.access_tokens, created.access_tokens);
        assert_eq!(created.access_tokens.len(), 1);
    }

    #[test]
    fn relative_targets_file_resolves_under_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load_or_create(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.targets_file, dir.path().join("targets.json"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        ServerConfig::load_or_create(Some(dir.path().to_path_buf())).unwrap();
        let mode = std::fs::metadata(dir.path().join(CONFIG_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
