//! Execution reporting
//!
//! The executor emits ordered events into a `Reporter`; implementations
//! turn them into human output, JSON, or nothing at all. Events for one
//! host arrive in generation order; `run_started` is always first and
//! `run_finished` always last.

pub mod human;
pub mod json;

use crate::cli::OutputFormat;
use crate::execution::{Command, NodeState, OutputStream, Target};
use crate::nodeset::NodeSet;

/// Sink for structured execution events
pub trait Reporter: Send {
    fn run_started(&mut self, _target: &Target, _commands: &[Command]) {}

    fn host_started(&mut self, _host: &str, _command_index: usize) {}

    fn host_output(
        &mut self,
        _host: &str,
        _command_index: usize,
        _stream: OutputStream,
        _bytes: &[u8],
    ) {
    }

    fn host_finished(
        &mut self,
        _host: &str,
        _command_index: usize,
        _exit_code: Option<i32>,
        _state: NodeState,
    ) {
    }

    /// `grouped` pairs a NodeSet with the output every host in it produced
    fn run_finished(&mut self, _exit_code: i32, _grouped: &[(NodeSet, Vec<u8>)]) {}
}

/// Build the reporter for the requested output format. `query` is the raw
/// selector text, carried into reports that record it.
pub fn create(format: OutputFormat, query: &str) -> Box<dyn Reporter + Send> {
    match format {
        OutputFormat::Text => Box::new(human::HumanReporter::new()),
        OutputFormat::Json => Box::new(json::JsonReporter::new(query)),
        OutputFormat::Quiet => Box::new(QuietReporter::default()),
    }
}

/// Prints nothing but the failed hosts, if any
#[derive(Default)]
pub struct QuietReporter {
    failed: NodeSet,
}

impl Reporter for QuietReporter {
    fn host_finished(
        &mut self,
        host: &str,
        _command_index: usize,
        _exit_code: Option<i32>,
        state: NodeState,
    ) {
        if matches!(state, NodeState::Failed | NodeState::TimedOut) {
            self.failed.insert(host);
        }
    }

    fn run_finished(&mut self, _exit_code: i32, _grouped: &[(NodeSet, Vec<u8>)]) {
        if !self.failed.is_empty() {
            eprintln!("failed: ({}) {}", self.failed.len(), self.failed);
        }
    }
}
