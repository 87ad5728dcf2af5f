//! Direct backend: pure NodeSet expressions, no external I/O
//!
//! Atoms expand to exactly the hosts they name, which makes this the
//! fallback backend when nothing else is configured.

use crate::backends::Backend;
use crate::core::error::Result;
use crate::nodeset::NodeSet;
use async_trait::async_trait;

pub struct DirectBackend;

pub const PREFIX: char = 'D';

#[async_trait]
impl Backend for DirectBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn prefix(&self) -> char {
        PREFIX
    }

    fn validate(&self, payload: &str) -> Result<()> {
        let expr = super::expression::parse(payload)?;
        // Atoms must be well-formed range literals too
        expr.evaluate(&|atom| NodeSet::parse(atom)).map(|_| ())
    }

    async fn resolve(&self, payload: &str) -> Result<NodeSet> {
        let expr = super::expression::parse(payload)?;
        expr.evaluate(&|atom| NodeSet::parse(atom))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_expression() {
        let backend = DirectBackend;
        let nodes = backend
            .resolve("host[1-5].d and not host3.d")
            .await
            .unwrap();
        assert_eq!(nodes, NodeSet::parse("host[1-2,4-5].d").unwrap());
    }

    #[tokio::test]
    async fn test_resolve_single_pattern() {
        let backend = DirectBackend;
        let nodes = backend.resolve("host[1-3].d").await.unwrap();
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn test_validate() {
        let backend = DirectBackend;
        assert!(backend.validate("host[1-3] or host5").is_ok());
        assert!(backend.validate("host[1-3] or").is_err());
        assert!(backend.validate("host[1-").is_err());
        // global grammar syntax is not a direct expression
        assert!(backend.validate("D{host1}").is_err());
    }
}
