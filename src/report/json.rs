//! JSON report: one document per run, printed at completion

use crate::execution::{Command, NodeState, OutputStream, Target};
use crate::nodeset::NodeSet;
use crate::report::Reporter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub struct JsonReporter {
    report: Report,
}

#[derive(Serialize)]
struct Report {
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    /// The selector as the caller typed it, before resolution
    query: String,
    commands: Vec<String>,
    hosts: BTreeMap<String, HostReport>,
    groups: Vec<GroupReport>,
    exit_code: Option<i32>,
}

#[derive(Serialize, Default)]
struct HostReport {
    state: String,
    /// Exit code per attempted command, in list order; `null` for one that
    /// timed out or was cancelled. A host that stopped at an earlier
    /// failure has fewer entries than there are commands.
    exit_codes: Vec<Option<i32>>,
}

#[derive(Serialize)]
struct GroupReport {
    hosts: NodeSet,
    count: usize,
    output: String,
}

impl JsonReporter {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            report: Report {
                started_at: Utc::now(),
                finished_at: None,
                query: query.into(),
                commands: Vec::new(),
                hosts: BTreeMap::new(),
                groups: Vec::new(),
                exit_code: None,
            },
        }
    }
}

impl Reporter for JsonReporter {
    fn run_started(&mut self, target: &Target, commands: &[Command]) {
        self.report.commands = commands.iter().map(|c| c.text().to_string()).collect();
        for host in target.nodes().iter() {
            self.report.hosts.insert(
                host.to_string(),
                HostReport {
                    state: NodeState::Pending.to_string(),
                    exit_codes: Vec::new(),
                },
            );
        }
    }

    fn host_output(
        &mut self,
        _host: &str,
        _command_index: usize,
        _stream: OutputStream,
        _bytes: &[u8],
    ) {
        // per-host output is carried by the groups section
    }

    fn host_finished(
        &mut self,
        host: &str,
        _command_index: usize,
        exit_code: Option<i32>,
        state: NodeState,
    ) {
        let entry = self.report.hosts.entry(host.to_string()).or_default();
        entry.state = state.to_string();
        entry.exit_codes.push(exit_code);
    }

    fn run_finished(&mut self, exit_code: i32, grouped: &[(NodeSet, Vec<u8>)]) {
        self.report.finished_at = Some(Utc::now());
        self.report.exit_code = Some(exit_code);
        self.report.groups = grouped
            .iter()
            .map(|(nodes, output)| GroupReport {
                hosts: nodes.clone(),
                count: nodes.len(),
                output: String::from_utf8_lossy(output).into_owned(),
            })
            .collect();

        match serde_json::to_string_pretty(&self.report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!(r#"{{"error": "failed to serialize report: {e}"}}"#),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_keeps_raw_query_text() {
        let mut reporter = JsonReporter::new("A:web or D{db1}");
        let target = Target::new(NodeSet::parse("w1,w2,db1").unwrap()).unwrap();
        reporter.run_started(&target, &[Command::new("uptime").unwrap()]);

        assert_eq!(reporter.report.query, "A:web or D{db1}");
        assert_eq!(reporter.report.hosts.len(), 3);
        assert_eq!(reporter.report.commands, vec!["uptime"]);
    }

    #[test]
    fn test_host_stopping_early_has_fewer_exit_codes() {
        let mut reporter = JsonReporter::new("D{host[1-2]}");
        let target = Target::new(NodeSet::parse("host[1-2]").unwrap()).unwrap();
        let commands = vec![
            Command::new("cmd1").unwrap(),
            Command::new("cmd2").unwrap(),
            Command::new("cmd3").unwrap(),
        ];
        reporter.run_started(&target, &commands);

        // host1 runs all three; host2 fails at the second and never runs
        // the third, so no event for it ever arrives
        for (index, code) in [(0, 0), (1, 0), (2, 0)] {
            let state = if index == 2 {
                NodeState::Success
            } else {
                NodeState::Running
            };
            reporter.host_finished("host1", index, Some(code), state);
        }
        reporter.host_finished("host2", 0, Some(0), NodeState::Running);
        reporter.host_finished("host2", 1, Some(5), NodeState::Failed);

        let host1 = &reporter.report.hosts["host1"];
        assert_eq!(host1.exit_codes, vec![Some(0), Some(0), Some(0)]);
        assert_eq!(host1.state, "success");

        let host2 = &reporter.report.hosts["host2"];
        assert_eq!(host2.exit_codes, vec![Some(0), Some(5)]);
        assert_eq!(host2.state, "failed");
    }
}
