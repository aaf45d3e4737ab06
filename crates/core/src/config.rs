use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::paths::{expand_home, profile_socket, resolve_profile_dir, Paths};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Profile name or directory. Empty selects the default profile.
    #[serde(default)]
    pub profile: String,
    #[serde(default = "default_firefox_dir")]
    pub firefox_dir: String,
    /// Socket file the extension listens on inside the profile directory.
    #[serde(default = "default_socket_name")]
    pub socket_name: String,
    /// Page loaded in a temporary tab when a real user agent is requested.
    #[serde(default = "default_user_agent_probe_url")]
    pub user_agent_probe_url: String,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Timeout for local HTTP requests. None means no timeout.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_firefox_dir() -> String {
    "~/.mozilla/firefox".to_string()
}

fn default_socket_name() -> String {
    "ffcli.sock".to_string()
}

fn default_user_agent_probe_url() -> String {
    "https://google.com/404".to_string()
}

fn default_max_redirects() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            firefox_dir: default_firefox_dir(),
            socket_name: default_socket_name(),
            user_agent_probe_url: default_user_agent_probe_url(),
            max_redirects: default_max_redirects(),
            request_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn firefox_dir(&self) -> PathBuf {
        expand_home(&self.firefox_dir)
    }

    /// Socket path for `profile`, falling back to the configured profile.
    pub fn socket_path(&self, profile: Option<&str>) -> Result<PathBuf> {
        let profile = profile.unwrap_or(&self.profile);
        let dir = resolve_profile_dir(profile, &self.firefox_dir())?;
        profile_socket(&dir, &self.socket_name)
    }
}
