//! Target value object

use crate::core::error::{Error, Result};
use crate::nodeset::NodeSet;
use std::time::Duration;

/// Immutable description of the hosts to run against plus their batching
/// parameters. An empty host set is refused at construction, so the
/// executor never sees one.
#[derive(Debug, Clone)]
pub struct Target {
    nodes: NodeSet,
    batch_size: usize,
    batch_sleep: Duration,
}

impl Target {
    pub fn new(nodes: NodeSet) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::worker("target host set must not be empty"));
        }
        let batch_size = nodes.len();
        Ok(Self {
            nodes,
            batch_size,
            batch_sleep: Duration::ZERO,
        })
    }

    /// Set an absolute batch size; must be positive
    pub fn with_batch_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::worker("batch size must be positive"));
        }
        self.batch_size = size;
        Ok(self)
    }

    /// Set the batch size as a ratio in (0, 1], resolved against the host
    /// count with ceiling rounding and a minimum of one
    pub fn with_batch_size_ratio(mut self, ratio: f64) -> Result<Self> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Error::worker(format!(
                "batch size ratio {ratio} is outside (0, 1]"
            )));
        }
        let size = (ratio * self.nodes.len() as f64).ceil() as usize;
        self.batch_size = size.max(1);
        Ok(self)
    }

    /// Delay between consecutive host starts within a batch window
    pub fn with_batch_sleep(mut self, sleep: Duration) -> Self {
        self.batch_sleep = sleep;
        self
    }

    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_sleep(&self) -> Duration {
        self.batch_sleep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(text: &str) -> NodeSet {
        NodeSet::parse(text).unwrap()
    }

    #[test]
    fn test_defaults() {
        let target = Target::new(nodes("host[1-5]")).unwrap();
        assert_eq!(target.batch_size(), 5);
        assert_eq!(target.batch_sleep(), Duration::ZERO);
    }

    #[test]
    fn test_empty_nodes_refused() {
        assert!(Target::new(NodeSet::new()).is_err());
    }

    #[test]
    fn test_absolute_batch_size() {
        let target = Target::new(nodes("host[1-5]"))
            .unwrap()
            .with_batch_size(2)
            .unwrap();
        assert_eq!(target.batch_size(), 2);
        assert!(Target::new(nodes("host1")).unwrap().with_batch_size(0).is_err());
    }

    #[test]
    fn test_ratio_batch_size() {
        let target = Target::new(nodes("host[1-10]"))
            .unwrap()
            .with_batch_size_ratio(0.25)
            .unwrap();
        // ceil(0.25 * 10)
        assert_eq!(target.batch_size(), 3);

        let target = Target::new(nodes("host[1-10]"))
            .unwrap()
            .with_batch_size_ratio(1.0)
            .unwrap();
        assert_eq!(target.batch_size(), 10);

        // tiny ratios still yield at least one host
        let target = Target::new(nodes("host[1-3]"))
            .unwrap()
            .with_batch_size_ratio(0.01)
            .unwrap();
        assert_eq!(target.batch_size(), 1);
    }

    #[test]
    fn test_invalid_ratio() {
        let target = Target::new(nodes("host[1-3]")).unwrap();
        assert!(target.clone().with_batch_size_ratio(0.0).is_err());
        assert!(target.clone().with_batch_size_ratio(1.5).is_err());
        assert!(target.with_batch_size_ratio(-0.5).is_err());
    }
}
