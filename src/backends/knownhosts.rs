//! KnownHosts backend: matches node expressions against SSH known-hosts files
//!
//! The files are read once at construction. The payload grammar is the same
//! expression grammar as the Direct backend; each atom is expanded and then
//! intersected with the union of all parsed host entries.

use crate::backends::Backend;
use crate::core::error::Result;
use crate::nodeset::NodeSet;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct KnownHostsBackend {
    known: NodeSet,
}

pub const PREFIX: char = 'K';

impl KnownHostsBackend {
    /// Read and parse the configured known-hosts files
    pub fn new(files: &[PathBuf]) -> Result<Self> {
        let mut known = NodeSet::new();
        for path in files {
            let count_before = known.len();
            parse_file(path, &mut known)?;
            debug!(
                file = %path.display(),
                hosts = known.len() - count_before,
                "Parsed known-hosts file"
            );
        }
        Ok(Self { known })
    }

    #[cfg(test)]
    fn from_hosts(hosts: NodeSet) -> Self {
        Self { known: hosts }
    }
}

/// Collect host names from one file into `known`.
///
/// Hashed entries cannot be listed and are skipped, as are revocation and
/// CA marker lines, negated patterns and wildcard patterns.
fn parse_file(path: &Path, known: &mut NodeSet) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            continue;
        }
        let Some(hosts_field) = line.split_whitespace().next() else {
            continue;
        };
        if hosts_field.starts_with('|') {
            continue; // hashed entry
        }
        for host in hosts_field.split(',') {
            if host.is_empty() || host.contains('*') || host.contains('?') || host.starts_with('!')
            {
                continue;
            }
            // [host]:port form used for non-standard ports
            let name = match host.strip_prefix('[') {
                Some(rest) => match rest.split_once(']') {
                    Some((name, _)) => name,
                    None => {
                        warn!(entry = host, "Skipping malformed known-hosts entry");
                        continue;
                    }
                },
                None => host,
            };
            known.insert(name);
        }
    }
    Ok(())
}

#[async_trait]
impl Backend for KnownHostsBackend {
    fn name(&self) -> &'static str {
        "knownhosts"
    }

    fn prefix(&self) -> char {
        PREFIX
    }

    fn validate(&self, payload: &str) -> Result<()> {
        let expr = super::expression::parse(payload)?;
        expr.evaluate(&|atom| NodeSet::parse(atom)).map(|_| ())
    }

    async fn resolve(&self, payload: &str) -> Result<NodeSet> {
        let expr = super::expression::parse(payload)?;
        expr.evaluate(&|atom| Ok(&NodeSet::parse(atom)? & &self.known))
    }
}
