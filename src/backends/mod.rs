//! Target-selection backends
//!
//! A backend maps an opaque query payload to a NodeSet. Each one registers
//! under a single-character prefix (`A` is reserved for aliases) and defines
//! its own grammar over the payload.

pub mod direct;
pub mod expression;
pub mod knownhosts;
pub mod openstack;
pub mod puppetdb;

use crate::core::error::Result;
use crate::nodeset::NodeSet;
use async_trait::async_trait;

/// Contract every backend implements.
///
/// `validate` is a grammar-only check with no I/O, used by the
/// default-backend shortcut to decide whether a raw query belongs to the
/// backend before falling back to the global grammar. `resolve` does the
/// real work and may hit the network.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name, used in config and error messages
    fn name(&self) -> &'static str;

    /// Registration prefix; must not be `A`
    fn prefix(&self) -> char;

    /// Check the payload against the backend's grammar without resolving it
    fn validate(&self, payload: &str) -> Result<()>;

    /// Parse the payload and resolve it to a set of hosts
    async fn resolve(&self, payload: &str) -> Result<NodeSet>;
}
