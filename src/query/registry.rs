//! Backend registry
//!
//! An explicit registry value threaded through construction, rather than a
//! process-wide table. Built-ins are registered first; the
//! `plugins.backends` config list can only activate registrations that are
//! compiled in.

use crate::backends::{direct, knownhosts, openstack, puppetdb, Backend};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Reserved for alias atoms in the global grammar
pub const ALIAS_PREFIX: char = 'A';

#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<char, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its prefix.
    ///
    /// The alias prefix and duplicate prefixes are rejected.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> Result<()> {
        let prefix = backend.prefix();
        if prefix == ALIAS_PREFIX {
            return Err(Error::config(format!(
                "backend '{}' uses the reserved alias prefix '{ALIAS_PREFIX}'",
                backend.name()
            )));
        }
        if let Some(existing) = self.backends.get(&prefix) {
            return Err(Error::config(format!(
                "prefix '{prefix}' already registered by backend '{}'",
                existing.name()
            )));
        }
        debug!(backend = backend.name(), prefix = %prefix, "Registered backend");
        self.backends.insert(prefix, backend);
        Ok(())
    }

    pub fn get(&self, prefix: char) -> Option<&Arc<dyn Backend>> {
        self.backends.get(&prefix)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<dyn Backend>> {
        self.backends.values().find(|b| b.name() == name)
    }

    /// Build a registry with all built-in backends for this configuration.
    ///
    /// KnownHosts is only registered when files are configured, since it
    /// reads them eagerly. Entries in `plugins.backends` must name a
    /// compiled-in backend.
    pub fn with_builtins(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(direct::DirectBackend))?;
        registry.register(Arc::new(puppetdb::PuppetDbBackend::new(
            config.puppetdb.clone(),
        )?))?;
        registry.register(Arc::new(openstack::OpenStackBackend::new(
            config.openstack.clone(),
        )?))?;
        if !config.knownhosts.files.is_empty() {
            registry.register(Arc::new(knownhosts::KnownHostsBackend::new(
                &config.knownhosts.files,
            )?))?;
        }

        for name in &config.plugins.backends {
            if registry.get_by_name(name).is_none() {
                return Err(Error::config(format!(
                    "plugins.backends names unknown backend '{name}'"
                )));
            }
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::nodeset::NodeSet;
    use async_trait::async_trait;

    struct FakeBackend(char);

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn prefix(&self) -> char {
            self.0
        }

        fn validate(&self, _payload: &str) -> Result<()> {
            Ok(())
        }

        async fn resolve(&self, _payload: &str) -> Result<NodeSet> {
            Ok(NodeSet::new())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(FakeBackend('F'))).unwrap();
        assert!(registry.get('F').is_some());
        assert!(registry.get('G').is_none());
        assert!(registry.get_by_name("fake").is_some());
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(FakeBackend('F'))).unwrap();
        assert!(registry.register(Arc::new(FakeBackend('F'))).is_err());
    }

    #[test]
    fn test_alias_prefix_reserved() {
        let mut registry = BackendRegistry::new();
        assert!(registry.register(Arc::new(FakeBackend('A'))).is_err());
    }

    #[test]
    fn test_builtins() {
        let registry = BackendRegistry::with_builtins(&Config::default()).unwrap();
        assert!(registry.get('D').is_some());
        assert!(registry.get('P').is_some());
        assert!(registry.get('O').is_some());
        // no knownhosts files configured
        assert!(registry.get('K').is_none());
    }

    #[test]
    fn test_unknown_plugin_rejected() {
        let mut config = Config::default();
        config.plugins.backends = vec!["nonexistent".to_string()];
        assert!(BackendRegistry::with_builtins(&config).is_err());
    }
}
