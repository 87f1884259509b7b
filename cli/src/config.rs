use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

/// Remote backend endpoint. Environment variables win over `remote.json` so
/// scripts can point a run at a different backend without touching the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: String,
}

/// Locally cached auth session. Presence of this file is what makes the sync
/// engine consider the device signed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub owner_id: String,
    pub access_token: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "nibble").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("nibble.db");

        Ok(Config { db_path, data_dir })
    }

    pub fn remote(&self) -> Result<Option<RemoteConfig>> {
        if let Ok(url) = std::env::var("NIBBLE_REMOTE_URL") {
            let api_key = std::env::var("NIBBLE_API_KEY").unwrap_or_default();
            return Ok(Some(RemoteConfig { url, api_key }));
        }

        let path = self.data_dir.join("remote.json");
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).context("Failed to read remote.json")?;
        let remote: RemoteConfig =
            serde_json::from_str(&raw).context("Malformed remote.json")?;
        Ok(Some(remote))
    }

    fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn load_session(&self) -> Result<Option<Session>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let session: Session = serde_json::from_str(&raw).context("Malformed session file")?;
        Ok(Some(session))
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        let path = self.session_path();
        std::fs::write(&path, serde_json::to_string_pretty(session)?)
            .context("Failed to write session file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set session file permissions")?;
        }
        Ok(())
    }

    pub fn clear_session(&self) -> Result<bool> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove session file")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &tempfile::TempDir) -> Config {
        Config {
            db_path: dir.path().join("nibble.db"),
            data_dir: dir.path().to_path_buf(),
        }
    }

    #[test]
    fn test_session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        assert!(config.load_session().unwrap().is_none());

        config
            .save_session(&Session {
                owner_id: "owner-1".to_string(),
                access_token: "secret".to_string(),
            })
            .unwrap();
        let loaded = config.load_session().unwrap().unwrap();
        assert_eq!(loaded.owner_id, "owner-1");
        assert_eq!(loaded.access_token, "secret");

        assert!(config.clear_session().unwrap());
        assert!(!config.clear_session().unwrap());
        assert!(config.load_session().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        config
            .save_session(&Session {
                owner_id: "owner-1".to_string(),
                access_token: "secret".to_string(),
            })
            .unwrap();
        let mode = std::fs::metadata(dir.path().join("session.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_remote_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        std::fs::write(
            dir.path().join("remote.json"),
            r#"{ "url": "https://api.example.com", "api_key": "key" }"#,
        )
        .unwrap();
        // Env vars would take precedence, but tests must not set them: other
        // tests in the process share the environment.
        if std::env::var("NIBBLE_REMOTE_URL").is_err() {
            let remote = config.remote().unwrap().unwrap();
            assert_eq!(remote.url, "https://api.example.com");
            assert_eq!(remote.api_key, "key");
        }
    }
}
