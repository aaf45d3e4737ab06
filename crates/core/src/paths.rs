use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".ffcli"))
            .unwrap_or_else(|| PathBuf::from(".ffcli"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// One `[Section]` of Firefox's `profiles.ini`.
#[derive(Debug, Clone, Default)]
pub struct ProfileEntry {
    pub section: String,
    pub values: HashMap<String, String>,
}

impl ProfileEntry {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }
}

/// Parse `profiles.ini`. Keys are case sensitive, values are taken verbatim
/// (no interpolation). Lines outside any section are ignored.
pub fn parse_profiles_ini(content: &str) -> Vec<ProfileEntry> {
    let mut entries: Vec<ProfileEntry> = Vec::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            entries.push(ProfileEntry {
                section: name.trim().to_string(),
                values: HashMap::new(),
            });
            continue;
        }
        if let (Some(entry), Some((k, v))) = (entries.last_mut(), line.split_once('=')) {
            entry.values.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    entries
}

/// Resolve a profile argument to a profile directory.
///
/// A value containing `/`, or naming an existing path, is used as is.
/// Otherwise `profiles.ini` under `firefox_dir` is searched for a profile
/// whose `Name` matches, or the `Default=1` profile when `profile` is empty.
pub fn resolve_profile_dir(profile: &str, firefox_dir: &Path) -> Result<PathBuf> {
    if profile.contains('/') || (!profile.is_empty() && Path::new(profile).exists()) {
        return Ok(PathBuf::from(profile));
    }

    let ini = firefox_dir.join("profiles.ini");
    let content = std::fs::read_to_string(&ini).unwrap_or_default();
    for entry in parse_profiles_ini(&content) {
        let Some(rel) = entry.get("Path") else {
            continue;
        };
        let matches = if profile.is_empty() {
            entry.get("Default") == Some("1")
        } else {
            entry.get("Name") == Some(profile)
        };
        if matches {
            return Ok(firefox_dir.join(rel));
        }
    }

    Err(Error::NotFound(format!(
        "invalid profile or not running: {}",
        profile
    )))
}

/// Socket path of a running profile; fails when the extension is not listening.
pub fn profile_socket(profile_dir: &Path, socket_name: &str) -> Result<PathBuf> {
    let sock = profile_dir.join(socket_name);
    if !sock.exists() {
        return Err(Error::NotFound(format!(
            "invalid profile or not running: {}",
            profile_dir.display()
        )));
    }
    Ok(sock)
}
