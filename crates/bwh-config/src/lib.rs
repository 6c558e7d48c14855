//! On-disk registry of KiwiVM instances (API key + VEID pairs) for the `bwh`
//! CLI and MCP server.
//!
//! The file is YAML at `~/.bwh/config.yaml` (or `$BWH_CONFIG_PATH`) and holds
//! secrets, so it is written owner-only.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kiwivm_api::KiwiClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const CONFIG_PATH_ENV: &str = "BWH_CONFIG_PATH";
pub const INSTANCE_ENV: &str = "BWH_INSTANCE";

const API_KEY_MIN_LEN: usize = 10;
const API_KEY_MAX_LEN: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no instances configured; add one with `bwh node add`")]
    NoInstances,

    #[error("no default instance set; pick one of: {}", .available.join(", "))]
    NoDefault { available: Vec<String> },

    #[error("instance {name:?} not found; available: {}", .available.join(", "))]
    NotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("instance {0:?} already exists")]
    Exists(String),

    #[error("invalid instance name {0:?}: must be non-empty and contain no whitespace")]
    InvalidName(String),

    #[error("invalid API key: expected 10-256 characters without whitespace")]
    InvalidApiKey,

    #[error("invalid VEID {0:?}: expected a numeric VPS id")]
    InvalidVeid(String),

    #[error("cannot locate home directory; set BWH_CONFIG_PATH")]
    NoHome,

    #[error("config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config file {} is not valid: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

// ── File format ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_instance: Option<String>,
    pub instances: BTreeMap<String, Instance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub api_key: String,
    /// Kept as text in the file; must parse as a number.
    pub veid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Alternative API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Instance {
    pub fn new(api_key: impl Into<String>, veid: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            veid: veid.into(),
            ..Self::default()
        }
    }

    pub fn veid_number(&self) -> Result<u64> {
        self.veid
            .trim()
            .parse()
            .map_err(|_| Error::InvalidVeid(self.veid.clone()))
    }

    pub fn validate(&self) -> Result<()> {
        let key = &self.api_key;
        if key.len() < API_KEY_MIN_LEN
            || key.len() > API_KEY_MAX_LEN
            || key.chars().any(char::is_whitespace)
        {
            return Err(Error::InvalidApiKey);
        }
        self.veid_number().map(|_| ())
    }
}

/// The instance picked by [`ConfigStore::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInstance {
    pub name: String,
    pub veid: u64,
    pub instance: Instance,
}

impl ResolvedInstance {
    pub fn client(&self) -> KiwiClient {
        let client = KiwiClient::new(self.instance.api_key.clone(), self.veid);
        match self.instance.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => client.with_base_url(endpoint),
            None => client,
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// `$BWH_CONFIG_PATH`, else `~/.bwh/config.yaml`.
pub fn default_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|h| !h.is_empty())
        .ok_or(Error::NoHome)?;
    Ok(PathBuf::from(home).join(".bwh").join("config.yaml"))
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    /// Load from `path` (or [`default_path`]). A missing file is an empty
    /// configuration.
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => default_path()?,
        };
        let config = load(&path)?;
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn instances(&self) -> &BTreeMap<String, Instance> {
        &self.config.instances
    }

    pub fn default_instance(&self) -> Option<&str> {
        self.config.default_instance.as_deref()
    }

    pub fn names(&self) -> Vec<String> {
        self.config.instances.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<&Instance> {
        self.config.instances.get(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
            available: self.names(),
        })
    }

    /// Add and persist. The first instance becomes the default.
    pub fn add(&mut self, name: &str, instance: Instance, make_default: bool) -> Result<()> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::InvalidName(name.to_string()));
        }
        instance.validate()?;
        if self.config.instances.contains_key(name) {
            return Err(Error::Exists(name.to_string()));
        }

        self.config.instances.insert(name.to_string(), instance);
        if make_default || self.config.instances.len() == 1 {
            self.config.default_instance = Some(name.to_string());
        }

        info!(instance = name, "instance added");
        self.save()
    }

    /// Remove and persist. When the default goes away and exactly one
    /// instance remains, that one becomes the default.
    pub fn remove(&mut self, name: &str) -> Result<Instance> {
        let removed = self
            .config
            .instances
            .remove(name)
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
                available: self.names(),
            })?;

        if self.default_instance() == Some(name) {
            self.config.default_instance = match self.config.instances.len() {
                1 => self.config.instances.keys().next().cloned(),
                _ => None,
            };
        }

        info!(instance = name, "instance removed");
        self.save()?;
        Ok(removed)
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        self.get(name)?;
        self.config.default_instance = Some(name.to_string());
        self.save()
    }

    /// Pick an instance: explicit name, then `$BWH_INSTANCE`, then the
    /// configured default, then the only instance.
    pub fn resolve(&self, explicit: Option<&str>) -> Result<ResolvedInstance> {
        let from_env = std::env::var(INSTANCE_ENV).ok();
        self.resolve_with(explicit, from_env.as_deref())
    }

    /// [`resolve`](Self::resolve) with the environment value passed in.
    pub fn resolve_with(
        &self,
        explicit: Option<&str>,
        from_env: Option<&str>,
    ) -> Result<ResolvedInstance> {
        let instances = &self.config.instances;
        if instances.is_empty() {
            return Err(Error::NoInstances);
        }

        let non_empty = |s: &&str| !s.is_empty();
        let name = match explicit
            .filter(non_empty)
            .or(from_env.filter(non_empty))
            .or(self.default_instance().filter(non_empty))
        {
            Some(name) => name.to_string(),
            None if instances.len() == 1 => instances.keys().next().cloned().unwrap_or_default(),
            None => {
                return Err(Error::NoDefault {
                    available: self.names(),
                });
            }
        };

        let instance = self.get(&name)?.clone();
        let veid = instance.veid_number()?;
        debug!(instance = %name, veid, "instance resolved");
        Ok(ResolvedInstance {
            name,
            veid,
            instance,
        })
    }

    /// Write with owner-only permissions (directory 0700, file 0600).
    pub fn save(&self) -> Result<()> {
        let io_err = |source| Error::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
            restrict(dir, 0o700).map_err(io_err)?;
        }

        let yaml = serde_yaml::to_string(&self.config).map_err(|source| Error::Yaml {
            path: self.path.clone(),
            source,
        })?;

        write_private(&self.path, yaml.as_bytes()).map_err(io_err)?;
        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }
}

fn load(path: &Path) -> Result<Config> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file yet");
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(Error::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if raw.trim().is_empty() {
        return Ok(Config::default());
    }

    let mut config: Config = serde_yaml::from_str(&raw).map_err(|source| Error::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    config.default_instance = config.default_instance.filter(|d| !d.is_empty());
    Ok(config)
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    io::Write::write_all(&mut file, contents)?;
    // The mode above only applies to newly created files.
    restrict(path, 0o600)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "private_abcdef123456";

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::open(Some(dir.path().join("nested").join("config.yaml"))).unwrap()
    }

    #[test]
    fn missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.instances().is_empty());
        assert!(matches!(store.resolve_with(None, None), Err(Error::NoInstances)));
    }

    #[test]
    fn first_instance_becomes_default_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        let mut tokyo = Instance::new(KEY, "1001");
        tokyo.tags = vec!["prod".into()];
        store.add("tokyo", tokyo.clone(), false).unwrap();
        store.add("la", Instance::new(KEY, "1002"), false).unwrap();

        let reopened = ConfigStore::open(Some(store.path().to_path_buf())).unwrap();
        assert_eq!(reopened.default_instance(), Some("tokyo"));
        assert_eq!(reopened.get("tokyo").unwrap(), &tokyo);
        assert_eq!(reopened.names(), vec!["la", "tokyo"]);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.add("tokyo", Instance::new(KEY, "1001"), false).unwrap();

        let file_mode = fs::metadata(store.path()).unwrap().permissions().mode();
        let dir_mode = fs::metadata(store.path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn add_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        assert!(matches!(
            store.add("my box", Instance::new(KEY, "1"), false),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            store.add("a", Instance::new("short", "1"), false),
            Err(Error::InvalidApiKey)
        ));
        assert!(matches!(
            store.add("a", Instance::new("private key with spaces", "1"), false),
            Err(Error::InvalidApiKey)
        ));
        assert!(matches!(
            store.add("a", Instance::new(KEY, "abc"), false),
            Err(Error::InvalidVeid(_))
        ));

        store.add("a", Instance::new(KEY, "1"), false).unwrap();
        assert!(matches!(
            store.add("a", Instance::new(KEY, "2"), false),
            Err(Error::Exists(_))
        ));
    }

    #[test]
    fn resolution_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.add("tokyo", Instance::new(KEY, "1001"), false).unwrap();
        store.add("la", Instance::new(KEY, "1002"), false).unwrap();
        store.add("ams", Instance::new(KEY, "1003"), false).unwrap();

        assert_eq!(store.resolve_with(Some("la"), Some("ams")).unwrap().name, "la");
        assert_eq!(store.resolve_with(None, Some("ams")).unwrap().name, "ams");
        assert_eq!(store.resolve_with(None, Some("")).unwrap().name, "tokyo");

        let resolved = store.resolve_with(None, None).unwrap();
        assert_eq!(resolved.name, "tokyo");
        assert_eq!(resolved.veid, 1001);
    }

    #[test]
    fn resolution_errors_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.add("tokyo", Instance::new(KEY, "1001"), false).unwrap();
        store.add("la", Instance::new(KEY, "1002"), false).unwrap();

        match store.resolve_with(Some("paris"), None) {
            Err(Error::NotFound { name, available }) => {
                assert_eq!(name, "paris");
                assert_eq!(available, vec!["la", "tokyo"]);
            }
            other => panic!("expected not found, got {other:?}"),
        }

        store.config.default_instance = None;
        match store.resolve_with(None, None) {
            Err(err @ Error::NoDefault { .. }) => {
                assert!(err.to_string().contains("la, tokyo"));
            }
            other => panic!("expected no default, got {other:?}"),
        }
    }

    #[test]
    fn sole_instance_resolves_without_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "instances:\n  only:\n    api_key: private_abcdef123456\n    veid: '77'\n    endpoint: http://localhost:9000/v1\n",
        )
        .unwrap();

        let store = ConfigStore::open(Some(path)).unwrap();
        let resolved = store.resolve_with(None, None).unwrap();
        assert_eq!(resolved.name, "only");

        let client = resolved.client();
        assert_eq!(client.veid(), 77);
        assert_eq!(client.base_url(), "http://localhost:9000/v1");
    }

    #[test]
    fn removing_default_promotes_the_survivor() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.add("tokyo", Instance::new(KEY, "1001"), false).unwrap();
        store.add("la", Instance::new(KEY, "1002"), false).unwrap();
        store.add("ams", Instance::new(KEY, "1003"), false).unwrap();

        store.remove("tokyo").unwrap();
        assert_eq!(store.default_instance(), None);

        store.set_default("la").unwrap();
        store.remove("la").unwrap();
        assert_eq!(store.default_instance(), Some("ams"));

        assert!(matches!(store.remove("la"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "instances: [unterminated").unwrap();

        let err = ConfigStore::open(Some(path.clone())).unwrap_err();
        assert!(matches!(err, Error::Yaml { .. }));
        assert!(err.to_string().contains(&path.display().to_string()));
    }
}
