//! Command value object

use crate::core::error::{Error, Result};
use std::time::Duration;

/// A shell command with its timeout and acceptable exit codes.
///
/// `ok_codes` defaults to `{0}`; an explicitly empty set means every exit
/// code counts as success. Equality is structural over all three fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    timeout: Option<Duration>,
    ok_codes: Vec<i32>,
}

impl Command {
    /// Create a command; the text must be non-empty
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::worker("command text must not be empty"));
        }
        Ok(Self {
            text,
            timeout: None,
            ok_codes: vec![0],
        })
    }

    /// Set the per-command wall-clock timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the acceptable exit codes; an empty set accepts any code
    pub fn with_ok_codes(mut self, mut codes: Vec<i32>) -> Self {
        codes.sort_unstable();
        codes.dedup();
        self.ok_codes = codes;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn ok_codes(&self) -> &[i32] {
        &self.ok_codes
    }

    /// Whether an exit code counts as success for this command
    pub fn is_success(&self, code: i32) -> bool {
        self.ok_codes.is_empty() || self.ok_codes.binary_search(&code).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cmd = Command::new("uptime").unwrap();
        assert_eq!(cmd.text(), "uptime");
        assert_eq!(cmd.ok_codes(), &[0]);
        assert!(cmd.timeout().is_none());
        assert!(cmd.is_success(0));
        assert!(!cmd.is_success(1));
    }

    #[test]
    fn test_empty_text_rejected() {
        assert!(Command::new("").is_err());
        assert!(Command::new("   ").is_err());
    }

    #[test]
    fn test_explicit_ok_codes() {
        let cmd = Command::new("grep pattern file").unwrap().with_ok_codes(vec![1, 0, 1]);
        assert_eq!(cmd.ok_codes(), &[0, 1]);
        assert!(cmd.is_success(1));
        assert!(!cmd.is_success(2));
    }

    #[test]
    fn test_empty_ok_codes_accept_everything() {
        let cmd = Command::new("reboot").unwrap().with_ok_codes(vec![]);
        assert!(cmd.is_success(0));
        assert!(cmd.is_success(255));
        assert!(cmd.is_success(-1));
    }

    #[test]
    fn test_structural_equality() {
        let a = Command::new("uptime").unwrap().with_ok_codes(vec![0, 1]);
        let b = Command::new("uptime").unwrap().with_ok_codes(vec![1, 0]);
        assert_eq!(a, b);
        let c = a.clone().with_timeout(Duration::from_secs(5));
        assert_ne!(a, c);
    }
}
