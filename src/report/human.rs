//! Human-readable grouped report

use crate::execution::{Command, NodeState, OutputStream, Target};
use crate::nodeset::NodeSet;
use crate::report::Reporter;
use std::collections::HashMap;
use std::io::Write;

/// Default reporter: streams single-host output live and prints a grouped
/// report at the end, with identical outputs folded into one section
pub struct HumanReporter {
    states: HashMap<String, NodeState>,
    total: usize,
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl HumanReporter {
    pub fn new() -> Self {
        Self::with_writers(Box::new(std::io::stdout()), Box::new(std::io::stderr()))
    }

    fn with_writers(stdout: Box<dyn Write + Send>, stderr: Box<dyn Write + Send>) -> Self {
        Self {
            states: HashMap::new(),
            total: 0,
            stdout,
            stderr,
        }
    }
}

impl Default for HumanReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for HumanReporter {
    fn run_started(&mut self, target: &Target, commands: &[Command]) {
        self.total = target.nodes().len();
        let _ = writeln!(
            self.stdout,
            "Executing {} command(s) on {} host(s): {}",
            commands.len(),
            self.total,
            target.nodes()
        );
        for command in commands {
            let _ = writeln!(self.stdout, "  $ {}", command.text());
        }
    }

    fn host_output(
        &mut self,
        _host: &str,
        _command_index: usize,
        stream: OutputStream,
        bytes: &[u8],
    ) {
        // the worker sends a per-host blob for multi-host runs too; those
        // are only shown de-duplicated in the final grouped report, so live
        // writes happen on the single-host fast path alone
        if self.total > 1 {
            return;
        }
        match stream {
            OutputStream::Stdout => {
                let _ = self.stdout.write_all(bytes);
            }
            OutputStream::Stderr => {
                let _ = self.stderr.write_all(bytes);
            }
        }
    }

    fn host_finished(
        &mut self,
        host: &str,
        command_index: usize,
        exit_code: Option<i32>,
        state: NodeState,
    ) {
        self.states.insert(host.to_string(), state);
        if matches!(state, NodeState::Failed | NodeState::TimedOut) {
            let _ = writeln!(
                self.stdout,
                "{host}: command {} ended in {state}{}",
                command_index + 1,
                match exit_code {
                    Some(code) => format!(" (exit code {code})"),
                    None => String::new(),
                }
            );
        }
    }

    fn run_finished(&mut self, exit_code: i32, grouped: &[(NodeSet, Vec<u8>)]) {
        if self.total > 1 {
            for (nodes, output) in grouped {
                let _ = writeln!(self.stdout, "===== NODE GROUP =====");
                let _ = writeln!(self.stdout, "({}) {nodes}", nodes.len());
                let _ = writeln!(self.stdout, "----- OUTPUT -----");
                let _ = self.stdout.write_all(output);
                if !output.ends_with(b"\n") {
                    let _ = writeln!(self.stdout);
                }
            }
        }

        let success = self
            .states
            .values()
            .filter(|s| **s == NodeState::Success)
            .count();
        let ratio = if self.total > 0 {
            100.0 * success as f64 / self.total as f64
        } else {
            0.0
        };
        let _ = writeln!(
            self.stdout,
            "{:.1}% ({}/{}) success ratio of nodes successfully executed all commands; exit code {exit_code}",
            ratio, success, self.total
        );
    }
}
