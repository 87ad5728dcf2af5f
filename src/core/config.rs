//! Configuration management
//!
//! Loads the YAML configuration file and the adjacent `aliases.yaml`.
//! Every section falls back to its defaults when absent, so a minimal
//! config (or none at all) still yields a usable `Config`.

use crate::core::error::{Error, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Valid alias names, matching the identifiers the global grammar accepts
static ALIAS_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex literal"));

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Executor backend; only the ClusterShell-equivalent is implemented
    pub transport: String,
    /// Backend prefix tried against the raw query before the global grammar
    pub default_backend: Option<String>,
    /// Destination path for operational logs
    pub log_file: Option<PathBuf>,
    /// Environment variables exported for launched commands
    pub environment: HashMap<String, String>,
    pub puppetdb: PuppetDbConfig,
    pub openstack: OpenStackConfig,
    pub knownhosts: KnownHostsConfig,
    pub clustershell: ClusterShellConfig,
    pub kerberos: KerberosConfig,
    pub plugins: PluginsConfig,
    /// Alias name -> query string, loaded from aliases.yaml next to the config
    #[serde(skip)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PuppetDbConfig {
    pub host: String,
    pub port: u16,
    /// `https` or `http`
    pub scheme: String,
    /// PuppetDB API version: 3 or 4 (v4 queries use POST)
    pub api_version: u8,
    /// Request timeout in seconds
    pub timeout: u64,
    pub ssl_verify: bool,
    pub ssl_client_cert: Option<PathBuf>,
    pub ssl_client_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenStackConfig {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    /// Appended to instance names to build FQDNs
    pub domain_suffix: String,
    pub nova_api_version: String,
    /// Request timeout in seconds
    pub timeout: u64,
    /// Extra parameters applied to every API client call
    pub client_params: HashMap<String, String>,
    /// Extra server-list filters merged under the defaults
    pub query_params: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KnownHostsConfig {
    /// SSH known-hosts files read at backend construction
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterShellConfig {
    /// Options passed verbatim to the SSH layer
    pub ssh_options: Vec<String>,
    /// Max concurrent hosts across the whole run
    pub fanout: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KerberosConfig {
    /// Require a valid Kerberos ticket before executing
    pub ensure_ticket: bool,
    /// Apply the ticket check to root as well
    pub ensure_ticket_root: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PluginsConfig {
    /// Names of additional backend registrations to activate
    pub backends: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: "clustershell".to_string(),
            default_backend: None,
            log_file: None,
            environment: HashMap::new(),
            puppetdb: PuppetDbConfig::default(),
            openstack: OpenStackConfig::default(),
            knownhosts: KnownHostsConfig::default(),
            clustershell: ClusterShellConfig::default(),
            kerberos: KerberosConfig::default(),
            plugins: PluginsConfig::default(),
            aliases: HashMap::new(),
        }
    }
}

impl Default for PuppetDbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 443,
            scheme: "https".to_string(),
            api_version: 4,
            timeout: 30,
            ssl_verify: true,
            ssl_client_cert: None,
            ssl_client_key: None,
        }
    }
}

impl Default for OpenStackConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://localhost:5000".to_string(),
            username: String::new(),
            password: String::new(),
            domain_suffix: String::new(),
            nova_api_version: "2.1".to_string(),
            timeout: 30,
            client_params: HashMap::new(),
            query_params: HashMap::new(),
        }
    }
}

impl Default for ClusterShellConfig {
    fn default() -> Self {
        Self {
            ssh_options: vec![],
            fanout: DEFAULT_FANOUT,
        }
    }
}

impl Config {
    /// Load configuration, trying in order: the explicit path, the
    /// `CUMIN_CONFIG` environment variable, the per-user config directory,
    /// and finally the system-wide path. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::discover(),
        };

        let mut config = match &config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)?;
                let config: Config = serde_yaml::from_str(&content)?;
                debug!(path = %p.display(), "Loaded configuration");
                config
            }
            Some(p) if path.is_some() => {
                return Err(Error::config(format!(
                    "configuration file not found: {}",
                    p.display()
                )));
            }
            _ => Config::default(),
        };

        config.validate()?;

        // aliases.yaml sits adjacent to the config file
        if let Some(p) = &config_path {
            let aliases_path = p.with_file_name("aliases.yaml");
            if aliases_path.exists() {
                let content = std::fs::read_to_string(&aliases_path)?;
                config.aliases = serde_yaml::from_str(&content)?;
                if let Some(name) = config.aliases.keys().find(|n| !ALIAS_NAME.is_match(n)) {
                    return Err(Error::config(format!(
                        "invalid alias name '{name}' in {}",
                        aliases_path.display()
                    )));
                }
                debug!(count = config.aliases.len(), "Loaded aliases");
            }
        }

        Ok(config)
    }

    /// Find the first existing config file in the lookup chain
    fn discover() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CUMIN_CONFIG") {
            return Some(PathBuf::from(path));
        }

        if let Some(dirs) = ProjectDirs::from("org", "cumin", "cumin") {
            let user_config = dirs.config_dir().join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        Some(PathBuf::from(SYSTEM_CONFIG_PATH))
    }

    fn validate(&self) -> Result<()> {
        if self.transport != "clustershell" {
            return Err(Error::config(format!(
                "unsupported transport '{}' (only 'clustershell' is available)",
                self.transport
            )));
        }
        if !matches!(self.puppetdb.api_version, 3 | 4) {
            return Err(Error::config(format!(
                "unsupported puppetdb.api_version {} (expected 3 or 4)",
                self.puppetdb.api_version
            )));
        }
        if !matches!(self.puppetdb.scheme.as_str(), "http" | "https") {
            return Err(Error::config(format!(
                "unsupported puppetdb.scheme '{}'",
                self.puppetdb.scheme
            )));
        }
        if self.clustershell.fanout == 0 {
            return Err(Error::config("clustershell.fanout must be positive"));
        }
        Ok(())
    }
}

/// System-wide configuration path
pub const SYSTEM_CONFIG_PATH: &str = "/etc/cumin/config.yaml";

/// Default max concurrent hosts
pub const DEFAULT_FANOUT: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transport, "clustershell");
        assert_eq!(config.clustershell.fanout, 64);
        assert_eq!(config.puppetdb.api_version, 4);
        assert!(config.puppetdb.ssl_verify);
        assert!(config.default_backend.is_none());
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            "transport: clustershell\n\
             default_backend: direct\n\
             environment:\n  LC_ALL: C\n\
             puppetdb:\n  host: puppetdb.example.org\n  port: 8081\n  api_version: 3\n\
             clustershell:\n  fanout: 16\n  ssh_options: ['-o ConnectTimeout=5']\n\
             knownhosts:\n  files: [/etc/ssh/known_hosts]\n"
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.default_backend.as_deref(), Some("direct"));
        assert_eq!(config.puppetdb.host, "puppetdb.example.org");
        assert_eq!(config.puppetdb.port, 8081);
        assert_eq!(config.puppetdb.api_version, 3);
        assert_eq!(config.clustershell.fanout, 16);
        assert_eq!(config.environment.get("LC_ALL").unwrap(), "C");
        assert_eq!(config.knownhosts.files.len(), 1);
    }

    #[test]
    fn test_load_aliases_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "transport: clustershell\n").unwrap();
        std::fs::write(
            dir.path().join("aliases.yaml"),
            "web: D{web[1-2].example.org}\nall: A:web or D{db1.example.org}\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.aliases.len(), 2);
        assert_eq!(config.aliases["web"], "D{web[1-2].example.org}");
    }

    #[test]
    fn test_invalid_alias_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "transport: clustershell\n").unwrap();
        std::fs::write(dir.path().join("aliases.yaml"), "'bad name': D{h1}\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_invalid_transport_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "transport: carrier-pigeon\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/cumin.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_invalid_api_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "puppetdb:\n  api_version: 5\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
