//! Executor: sliding-window fan-out of commands across a target
//!
//! Hosts move through the state machine in `state.rs` while a bounded
//! window of them runs concurrently. `sync` mode puts a barrier between
//! commands: the next command starts only after the success threshold for
//! the previous one is confirmed across the whole target. `async` mode
//! pipelines all commands per host and stops a host at its first failure.
//!
//! Cancellation (user interrupt or global timeout) is a broadcast signal:
//! the dispatcher stops scheduling and skips remaining sleeps, in-flight
//! transports terminate their commands, and the run exits with code 2.

use crate::core::config::DEFAULT_FANOUT;
use crate::core::error::{Error, Result};
use crate::execution::command::Command;
use crate::execution::state::NodeState;
use crate::execution::target::Target;
use crate::execution::transport::{CommandStatus, OutputChunk, OutputStream, Transport};
use crate::nodeset::NodeSet;
use crate::report::Reporter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

const EVENT_BUFFER: usize = 256;
const CHUNK_BUFFER: usize = 64;
const RATIO_EPSILON: f64 = 1e-9;

/// Ordering mode for multi-command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Per-command barrier across hosts
    Sync,
    /// Per-host pipeline of all commands
    Async,
}

/// Output captured for one (host, command) pair. `exit_code` is `None`
/// when the command timed out or never completed.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Final per-host record
#[derive(Debug, Clone)]
pub struct HostResult {
    pub state: NodeState,
    pub commands: Vec<CommandOutput>,
}

/// Outcome of a whole run
#[derive(Debug)]
pub struct ExecutionResult {
    /// 0 when the success share met the threshold, 2 otherwise
    pub exit_code: i32,
    pub hosts: HashMap<String, HostResult>,
    /// Hosts grouped by identical full output, for de-duplicated display
    pub grouped_outputs: Vec<(NodeSet, Vec<u8>)>,
}

pub struct Worker {
    transport: Arc<dyn Transport>,
    mode: Mode,
    fanout: usize,
    success_threshold: f64,
    global_timeout: Option<Duration>,
    shutdown: broadcast::Sender<()>,
}

impl Worker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            transport,
            mode: Mode::Sync,
            fanout: DEFAULT_FANOUT,
            success_threshold: 1.0,
            global_timeout: None,
            shutdown,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Global cap on concurrently running hosts
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Required share of hosts ending in `success`, in [0, 1]
    pub fn with_success_threshold(mut self, threshold: f64) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Deadline for the whole run
    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = Some(timeout);
        self
    }

    /// Handle for cancelling the run from outside (e.g. a SIGINT handler)
    pub fn cancel_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Run all commands against the target, reporting events as they
    /// happen, and return the aggregated result.
    pub async fn execute(
        &self,
        target: &Target,
        commands: &[Command],
        mut reporter: Box<dyn Reporter + Send>,
    ) -> Result<ExecutionResult> {
        if commands.is_empty() {
            return Err(Error::worker("cannot execute an empty command list"));
        }
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(Error::worker(format!(
                "success threshold {} is outside [0, 1]",
                self.success_threshold
            )));
        }
        if self.fanout == 0 {
            return Err(Error::worker("fanout must be positive"));
        }

        let total = target.nodes().len();
        info!(
            hosts = total,
            commands = commands.len(),
            mode = ?self.mode,
            threshold = self.success_threshold,
            "Starting execution"
        );

        reporter.run_started(target, commands);
        let (events, mut events_rx) = mpsc::channel(EVENT_BUFFER);
        let reporter_task = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    Event::HostStarted { host, index } => reporter.host_started(&host, index),
                    Event::HostOutput {
                        host,
                        index,
                        stream,
                        bytes,
                    } => reporter.host_output(&host, index, stream, &bytes),
                    Event::HostFinished {
                        host,
                        index,
                        exit_code,
                        state,
                    } => reporter.host_finished(&host, index, exit_code, state),
                }
            }
            reporter
        });

        let state = Arc::new(RunState {
            states: Mutex::new(
                target
                    .nodes()
                    .iter()
                    .map(|h| (h.to_string(), NodeState::Pending))
                    .collect(),
            ),
            outputs: Mutex::new(HashMap::new()),
            events,
            shutdown: self.shutdown.clone(),
            cancelled: AtomicBool::new(false),
            // single-host fast path: stream output as it arrives
            streaming: total == 1,
        });

        let watchdog = self.global_timeout.map(|timeout| {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Global timeout reached, cancelling run");
                state.cancel();
            })
        });

        match self.mode {
            Mode::Sync => self.run_sync(&state, target, commands).await,
            Mode::Async => self.run_async(&state, target, commands).await,
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
            let _ = watchdog.await;
        }

        let hosts: HashMap<String, HostResult> = {
            let states = state.states.lock();
            let mut outputs = state.outputs.lock();
            states
                .iter()
                .map(|(host, s)| {
                    let commands = outputs.remove(host).unwrap_or_default();
                    (host.clone(), HostResult { state: *s, commands })
                })
                .collect()
        };
        let cancelled = state.is_cancelled();
        drop(state);

        let success = hosts
            .values()
            .filter(|h| h.state == NodeState::Success)
            .count();
        let ratio = success as f64 / total as f64;
        let exit_code = if cancelled || ratio + RATIO_EPSILON < self.success_threshold {
            2
        } else {
            0
        };
        info!(
            success,
            total,
            ratio,
            exit_code,
            cancelled,
            "Execution finished"
        );

        let grouped_outputs = group_outputs(&hosts);
        let mut reporter = reporter_task
            .await
            .map_err(|e| Error::worker(format!("reporter task panicked: {e}")))?;
        reporter.run_finished(exit_code, &grouped_outputs);

        Ok(ExecutionResult {
            exit_code,
            hosts,
            grouped_outputs,
        })
    }

    /// sync mode: one command at a time across the whole target
    async fn run_sync(&self, state: &Arc<RunState>, target: &Target, commands: &[Command]) {
        let window = target.batch_size().min(self.fanout);
        let total = target.nodes().len() as f64;

        for (index, command) in commands.iter().enumerate() {
            if state.is_cancelled() {
                break;
            }

            // only hosts that succeeded the previous command are eligible;
            // for the first command that is every pending host
            let wanted = if index == 0 {
                NodeState::Pending
            } else {
                NodeState::Success
            };
            let mut eligible: Vec<String> = {
                let states = state.states.lock();
                states
                    .iter()
                    .filter(|(_, s)| **s == wanted)
                    .map(|(h, _)| h.clone())
                    .collect()
            };
            eligible.sort();
            if eligible.is_empty() {
                break;
            }
            debug!(command = index, hosts = eligible.len(), "Dispatching command");

            self.dispatch_wave(state, target, command, index, &eligible, window)
                .await;
            if state.is_cancelled() {
                break;
            }

            let ratio = state.count(NodeState::Success) as f64 / total;
            if ratio + RATIO_EPSILON < self.success_threshold {
                warn!(
                    "{}",
                    Error::ThresholdNotMet {
                        ratio: ratio * 100.0,
                        threshold: self.success_threshold * 100.0,
                    }
                );
                break;
            }
        }
    }

    /// Sliding window of one command over a cohort of hosts
    async fn dispatch_wave(
        &self,
        state: &Arc<RunState>,
        target: &Target,
        command: &Command,
        index: usize,
        hosts: &[String],
        window: usize,
    ) {
        let semaphore = Arc::new(Semaphore::new(window));
        let mut shutdown_rx = state.shutdown.subscribe();
        let mut handles = Vec::with_capacity(hosts.len());

        for host in hosts {
            if state.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.expect("semaphore is never closed")
                }
                _ = shutdown_rx.recv() => {
                    state.cancel();
                    break;
                }
            };

            state.advance(host, NodeState::Scheduled);
            let task_state = Arc::clone(state);
            let transport = Arc::clone(&self.transport);
            let host = host.clone();
            let command = command.clone();
            handles.push(tokio::spawn(async move {
                let outcome =
                    run_command_on_host(&task_state, &*transport, &host, &command, index).await;
                let final_state = outcome.final_state();
                task_state.advance(&host, final_state);
                task_state
                    .emit(Event::HostFinished {
                        host,
                        index,
                        exit_code: outcome.exit_code(),
                        state: final_state,
                    })
                    .await;
                drop(permit);
            }));

            state.pause_between_starts(target.batch_sleep(), &mut shutdown_rx).await;
        }

        futures::future::join_all(handles).await;
    }

    /// async mode: every host runs the full command list on its own
    async fn run_async(&self, state: &Arc<RunState>, target: &Target, commands: &[Command]) {
        let window = target.batch_size().min(self.fanout);
        let total = target.nodes().len() as f64;
        let semaphore = Arc::new(Semaphore::new(window));
        let commands: Arc<[Command]> = commands.to_vec().into();
        let mut shutdown_rx = state.shutdown.subscribe();
        let mut handles = Vec::new();

        for host in target.nodes().iter() {
            if state.is_cancelled() {
                break;
            }

            // stop launching once the terminal failures make the threshold
            // unreachable; in-flight hosts run to completion
            let failed =
                state.count(NodeState::Failed) + state.count(NodeState::TimedOut);
            let reachable = (total - failed as f64) / total;
            if reachable + RATIO_EPSILON < self.success_threshold {
                warn!(
                    "{}",
                    Error::ThresholdNotMet {
                        ratio: reachable * 100.0,
                        threshold: self.success_threshold * 100.0,
                    }
                );
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.expect("semaphore is never closed")
                }
                _ = shutdown_rx.recv() => {
                    state.cancel();
                    break;
                }
            };

            state.advance(host, NodeState::Scheduled);
            let task_state = Arc::clone(state);
            let transport = Arc::clone(&self.transport);
            let task_commands = Arc::clone(&commands);
            let host = host.to_string();
            handles.push(tokio::spawn(async move {
                run_host_pipeline(&task_state, &*transport, &host, &task_commands).await;
                drop(permit);
            }));

            state.pause_between_starts(target.batch_sleep(), &mut shutdown_rx).await;
        }

        futures::future::join_all(handles).await;
    }
}

/// Run all commands on one host in order, stopping at the first failure
async fn run_host_pipeline(
    state: &RunState,
    transport: &dyn Transport,
    host: &str,
    commands: &[Command],
) {
    for (index, command) in commands.iter().enumerate() {
        if state.is_cancelled() {
            // the host may still be in scheduled when the signal lands
            state.mark_running(host);
            state.advance(host, NodeState::Failed);
            state
                .emit(Event::HostFinished {
                    host: host.to_string(),
                    index,
                    exit_code: None,
                    state: NodeState::Failed,
                })
                .await;
            return;
        }

        let outcome = run_command_on_host(state, transport, host, command, index).await;
        let last = index + 1 == commands.len();
        let final_state = match outcome {
            // intermediate success: the host stays running for the next command
            CommandOutcome::Success(_) if !last => NodeState::Running,
            _ => outcome.final_state(),
        };
        if final_state != NodeState::Running {
            state.advance(host, final_state);
        }
        state
            .emit(Event::HostFinished {
                host: host.to_string(),
                index,
                exit_code: outcome.exit_code(),
                state: final_state,
            })
            .await;
        if final_state != NodeState::Running && final_state != NodeState::Success {
            return; // first failure ends the pipeline
        }
    }
}

enum CommandOutcome {
    Success(Option<i32>),
    Failed(Option<i32>),
    TimedOut,
}

impl CommandOutcome {
    fn exit_code(&self) -> Option<i32> {
        match self {
            CommandOutcome::Success(code) | CommandOutcome::Failed(code) => *code,
            CommandOutcome::TimedOut => None,
        }
    }

    fn final_state(&self) -> NodeState {
        match self {
            CommandOutcome::Success(_) => NodeState::Success,
            CommandOutcome::Failed(_) => NodeState::Failed,
            CommandOutcome::TimedOut => NodeState::TimedOut,
        }
    }
}

/// Run one command on one host: drive the transport, collect output,
/// emit events. The caller decides the resulting state transition.
async fn run_command_on_host(
    state: &RunState,
    transport: &dyn Transport,
    host: &str,
    command: &Command,
    index: usize,
) -> CommandOutcome {
    state.mark_running(host);
    state
        .emit(Event::HostStarted {
            host: host.to_string(),
            index,
        })
        .await;

    let (chunks, mut chunks_rx) = mpsc::channel::<OutputChunk>(CHUNK_BUFFER);
    let collector = {
        let events = state.events.clone();
        let streaming = state.streaming;
        let host = host.to_string();
        tokio::spawn(async move {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            while let Some(chunk) = chunks_rx.recv().await {
                if streaming {
                    let _ = events
                        .send(Event::HostOutput {
                            host: host.clone(),
                            index,
                            stream: chunk.stream,
                            bytes: chunk.bytes.clone(),
                        })
                        .await;
                }
                match chunk.stream {
                    OutputStream::Stdout => stdout.extend_from_slice(&chunk.bytes),
                    OutputStream::Stderr => stderr.extend_from_slice(&chunk.bytes),
                }
            }
            (stdout, stderr)
        })
    };

    let status = transport
        .run(host, command, chunks, state.shutdown.subscribe())
        .await;
    let (stdout, stderr) = collector.await.unwrap_or_default();

    let outcome = match status {
        Ok(CommandStatus::Exited(code)) if command.is_success(code) => {
            CommandOutcome::Success(Some(code))
        }
        Ok(CommandStatus::Exited(code)) => CommandOutcome::Failed(Some(code)),
        Ok(CommandStatus::TimedOut) => CommandOutcome::TimedOut,
        Ok(CommandStatus::Cancelled) => CommandOutcome::Failed(None),
        Err(e) => {
            warn!(host, error = %e, "Failed to launch command");
            CommandOutcome::Failed(None)
        }
    };

    // multi-host runs emit the buffered output once per (host, command);
    // the single-host fast path already streamed it chunk by chunk
    if !state.streaming {
        for (stream, bytes) in [
            (OutputStream::Stdout, &stdout),
            (OutputStream::Stderr, &stderr),
        ] {
            if !bytes.is_empty() {
                state
                    .emit(Event::HostOutput {
                        host: host.to_string(),
                        index,
                        stream,
                        bytes: bytes.clone(),
                    })
                    .await;
            }
        }
    }

    state.record(
        host,
        CommandOutput {
            exit_code: outcome.exit_code(),
            stdout,
            stderr,
        },
    );
    outcome
}

enum Event {
    HostStarted {
        host: String,
        index: usize,
    },
    HostOutput {
        host: String,
        index: usize,
        stream: OutputStream,
        bytes: Vec<u8>,
    },
    HostFinished {
        host: String,
        index: usize,
        exit_code: Option<i32>,
        state: NodeState,
    },
}

/// State shared between the dispatcher and the per-host tasks. The mutexes
/// are held only for short transitions and bookkeeping, never across a
/// suspension point.
struct RunState {
    states: Mutex<HashMap<String, NodeState>>,
    outputs: Mutex<HashMap<String, Vec<CommandOutput>>>,
    events: mpsc::Sender<Event>,
    shutdown: broadcast::Sender<()>,
    cancelled: AtomicBool,
    streaming: bool,
}

impl RunState {
    fn advance(&self, host: &str, next: NodeState) {
        let mut states = self.states.lock();
        let current = states.get_mut(host).expect("host is in the state table");
        *current = current
            .transition(next)
            .expect("scheduler follows the state machine");
    }

    /// `scheduled -> running`, idempotent for hosts already running a
    /// pipeline
    fn mark_running(&self, host: &str) {
        let mut states = self.states.lock();
        let current = states.get_mut(host).expect("host is in the state table");
        if *current != NodeState::Running {
            *current = current
                .transition(NodeState::Running)
                .expect("scheduler follows the state machine");
        }
    }

    fn count(&self, state: NodeState) -> usize {
        self.states.lock().values().filter(|s| **s == state).count()
    }

    fn record(&self, host: &str, output: CommandOutput) {
        self.outputs
            .lock()
            .entry(host.to_string())
            .or_default()
            .push(output);
    }

    async fn emit(&self, event: Event) {
        let _ = self.events.send(event).await;
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Honour `batch_sleep` between host starts; a cancellation skips the
    /// remaining wait
    async fn pause_between_starts(
        &self,
        sleep: Duration,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) {
        if sleep.is_zero() || self.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = shutdown_rx.recv() => {
                self.cancelled.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Group hosts whose full output blobs hash identically
fn group_outputs(hosts: &HashMap<String, HostResult>) -> Vec<(NodeSet, Vec<u8>)> {
    let mut groups: HashMap<u64, (NodeSet, Vec<u8>)> = HashMap::new();
    for (host, result) in hosts {
        let mut blob = Vec::new();
        for command in &result.commands {
            blob.extend_from_slice(&command.stdout);
            blob.extend_from_slice(&command.stderr);
        }
        groups
            .entry(xxh3_64(&blob))
            .or_insert_with(|| (NodeSet::new(), blob))
            .0
            .insert(host.clone());
    }
    let mut grouped: Vec<(NodeSet, Vec<u8>)> = groups.into_values().collect();
    grouped.sort_by_key(|(nodes, _)| nodes.to_string());
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Exit(i32, &'static str),
        TimeOut,
        Hang,
    }

    struct StubTransport {
        default: Behaviour,
        plan: HashMap<(String, String), Behaviour>,
        delay: Duration,
        calls: Mutex<Vec<(String, String)>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl StubTransport {
        fn new(default: Behaviour) -> Self {
            Self {
                default,
                plan: HashMap::new(),
                delay: Duration::from_millis(5),
                calls: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            }
        }

        fn on(mut self, host: &str, command: &str, behaviour: Behaviour) -> Self {
            self.plan
                .insert((host.to_string(), command.to_string()), behaviour);
            self
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn run(
            &self,
            host: &str,
            command: &Command,
            sink: mpsc::Sender<crate::execution::transport::OutputChunk>,
            mut cancel: broadcast::Receiver<()>,
        ) -> Result<CommandStatus> {
            self.calls
                .lock()
                .push((host.to_string(), command.text().to_string()));
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);

            let behaviour = self
                .plan
                .get(&(host.to_string(), command.text().to_string()))
                .copied()
                .unwrap_or(self.default);

            let status = match behaviour {
                Behaviour::Exit(code, output) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.delay) => {
                            if !output.is_empty() {
                                let _ = sink
                                    .send(crate::execution::transport::OutputChunk {
                                        stream: OutputStream::Stdout,
                                        bytes: output.as_bytes().to_vec(),
                                    })
                                    .await;
                            }
                            CommandStatus::Exited(code)
                        }
                        _ = cancel.recv() => CommandStatus::Cancelled,
                    }
                }
                Behaviour::TimeOut => {
                    tokio::time::sleep(self.delay).await;
                    CommandStatus::TimedOut
                }
                Behaviour::Hang => {
                    let _ = cancel.recv().await;
                    CommandStatus::Cancelled
                }
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(status)
        }
    }

    /// Reporter capturing events for assertions
    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<String>>>);

    impl Reporter for Recording {
        fn host_output(&mut self, host: &str, index: usize, _stream: OutputStream, bytes: &[u8]) {
            self.0.lock().push(format!(
                "output {host} {index} {}",
                String::from_utf8_lossy(bytes)
            ));
        }

        fn host_finished(
            &mut self,
            host: &str,
            index: usize,
            _exit_code: Option<i32>,
            state: NodeState,
        ) {
            self.0.lock().push(format!("finished {host} {index} {state}"));
        }
    }

    fn target(text: &str) -> Target {
        Target::new(NodeSet::parse(text).unwrap()).unwrap()
    }

    fn commands(texts: &[&str]) -> Vec<Command> {
        texts.iter().map(|t| Command::new(*t).unwrap()).collect()
    }

    fn null_reporter() -> Box<dyn Reporter + Send> {
        Box::new(Recording::default())
    }

    #[tokio::test]
    async fn test_empty_command_list_rejected() {
        let worker = Worker::new(Arc::new(StubTransport::new(Behaviour::Exit(0, ""))));
        let err = worker
            .execute(&target("host1"), &[], null_reporter())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Worker { .. }));
    }

    #[tokio::test]
    async fn test_all_hosts_succeed() {
        let transport = Arc::new(StubTransport::new(Behaviour::Exit(0, "a\n")));
        let worker = Worker::new(transport);
        let result = worker
            .execute(&target("host[1-5].d"), &commands(&["echo a"]), null_reporter())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result
            .hosts
            .values()
            .all(|h| h.state == NodeState::Success));
        // identical output folds into a single group
        assert_eq!(result.grouped_outputs.len(), 1);
        let (nodes, blob) = &result.grouped_outputs[0];
        assert_eq!(nodes.to_string(), "host[1-5].d");
        assert_eq!(blob, b"a\n");
    }

    #[tokio::test]
    async fn test_single_failure_below_threshold() {
        let transport = Arc::new(
            StubTransport::new(Behaviour::Exit(0, "a\n")).on(
                "host3.d",
                "echo a",
                Behaviour::Exit(1, ""),
            ),
        );
        let worker = Worker::new(transport);
        let result = worker
            .execute(&target("host[1-5].d"), &commands(&["echo a"]), null_reporter())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 2);
        assert_eq!(result.hosts["host3.d"].state, NodeState::Failed);
        let successes = result
            .hosts
            .values()
            .filter(|h| h.state == NodeState::Success)
            .count();
        assert_eq!(successes, 4);
    }

    #[tokio::test]
    async fn test_sync_threshold_abort_skips_next_command() {
        let transport = Arc::new(
            StubTransport::new(Behaviour::Exit(0, "")).on(
                "host2",
                "first",
                Behaviour::Exit(1, ""),
            ),
        );
        let worker = Worker::new(Arc::<StubTransport>::clone(&transport));
        let result = worker
            .execute(&target("host[1-4]"), &commands(&["first", "second"]), null_reporter())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 2);
        // threshold 1.0 was missed after the first command, so the second
        // was never dispatched anywhere
        assert!(transport.calls().iter().all(|(_, c)| c == "first"));
    }

    #[tokio::test]
    async fn test_sync_excludes_failed_hosts_from_later_commands() {
        let transport = Arc::new(
            StubTransport::new(Behaviour::Exit(0, "")).on(
                "host2",
                "first",
                Behaviour::Exit(1, ""),
            ),
        );
        let worker = Worker::new(Arc::<StubTransport>::clone(&transport)).with_success_threshold(0.5);
        let result = worker
            .execute(&target("host[1-4]"), &commands(&["first", "second"]), null_reporter())
            .await
            .unwrap();

        // 3 of 4 hosts passed both commands
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.hosts["host2"].state, NodeState::Failed);
        let second: Vec<String> = transport
            .calls()
            .into_iter()
            .filter(|(_, c)| c == "second")
            .map(|(h, _)| h)
            .collect();
        assert_eq!(second.len(), 3);
        assert!(!second.contains(&"host2".to_string()));
    }

    #[tokio::test]
    async fn test_async_host_stops_at_first_failure() {
        let transport = Arc::new(
            StubTransport::new(Behaviour::Exit(0, "")).on(
                "host2",
                "cmd2",
                Behaviour::Exit(5, ""),
            ),
        );
        let worker = Worker::new(Arc::<StubTransport>::clone(&transport))
            .with_mode(Mode::Async)
            .with_success_threshold(0.75);
        let target = Target::new(NodeSet::parse("host[1-4]").unwrap())
            .unwrap()
            .with_batch_size(2)
            .unwrap();
        let result = worker
            .execute(&target, &commands(&["cmd1", "cmd2", "cmd3"]), null_reporter())
            .await
            .unwrap();

        // 3 of 4 hosts ran everything; host2 never saw cmd3
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.hosts["host2"].state, NodeState::Failed);
        assert_eq!(result.hosts["host2"].commands.len(), 2);
        assert!(!transport
            .calls()
            .contains(&("host2".to_string(), "cmd3".to_string())));
        for host in ["host1", "host3", "host4"] {
            assert_eq!(result.hosts[host].state, NodeState::Success);
            assert_eq!(result.hosts[host].commands.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_async_higher_threshold_fails_run() {
        let transport = Arc::new(
            StubTransport::new(Behaviour::Exit(0, "")).on(
                "host2",
                "cmd2",
                Behaviour::Exit(5, ""),
            ),
        );
        let worker = Worker::new(transport)
            .with_mode(Mode::Async)
            .with_success_threshold(0.8);
        let result = worker
            .execute(&target("host[1-4]"), &commands(&["cmd1", "cmd2", "cmd3"]), null_reporter())
            .await
            .unwrap();
        // 75% success < 80% threshold
        assert_eq!(result.exit_code, 2);
    }

    #[tokio::test]
    async fn test_empty_ok_codes_accept_any_exit() {
        let transport = Arc::new(StubTransport::new(Behaviour::Exit(5, "")));
        let worker = Worker::new(transport);
        let command = Command::new("exit 5").unwrap().with_ok_codes(vec![]);
        let result = worker
            .execute(&target("host[1-3]"), &[command], null_reporter())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.hosts.values().all(|h| h.state == NodeState::Success));
    }

    #[tokio::test]
    async fn test_timeout_marks_host() {
        let transport = Arc::new(
            StubTransport::new(Behaviour::Exit(0, "")).on("host2", "slow", Behaviour::TimeOut),
        );
        let worker = Worker::new(transport);
        let result = worker
            .execute(&target("host[1-3]"), &commands(&["slow"]), null_reporter())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.hosts["host2"].state, NodeState::TimedOut);
        assert_eq!(result.hosts["host2"].commands[0].exit_code, None);
    }

    #[tokio::test]
    async fn test_fanout_caps_concurrency() {
        let transport = Arc::new(StubTransport::new(Behaviour::Exit(0, "")));
        let worker = Worker::new(Arc::<StubTransport>::clone(&transport)).with_fanout(3);
        worker
            .execute(&target("host[1-10]"), &commands(&["noop"]), null_reporter())
            .await
            .unwrap();
        assert!(transport.max_running.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_batch_size_caps_window() {
        let transport = Arc::new(StubTransport::new(Behaviour::Exit(0, "")));
        let worker = Worker::new(Arc::<StubTransport>::clone(&transport)).with_mode(Mode::Async);
        let target = Target::new(NodeSet::parse("host[1-8]").unwrap())
            .unwrap()
            .with_batch_size(2)
            .unwrap();
        worker
            .execute(&target, &commands(&["noop"]), null_reporter())
            .await
            .unwrap();
        assert!(transport.max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_zero_threshold_never_fails_on_ratio() {
        let transport = Arc::new(StubTransport::new(Behaviour::Exit(1, "")));
        let worker = Worker::new(transport).with_success_threshold(0.0);
        let result = worker
            .execute(&target("host[1-3]"), &commands(&["false"]), null_reporter())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_outputs_grouped_by_content() {
        let transport = Arc::new(
            StubTransport::new(Behaviour::Exit(0, "common\n"))
                .on("host3", "run", Behaviour::Exit(0, "different\n")),
        );
        let worker = Worker::new(transport);
        let result = worker
            .execute(&target("host[1-3]"), &commands(&["run"]), null_reporter())
            .await
            .unwrap();

        assert_eq!(result.grouped_outputs.len(), 2);
        let by_hosts: HashMap<String, Vec<u8>> = result
            .grouped_outputs
            .iter()
            .map(|(nodes, blob)| (nodes.to_string(), blob.clone()))
            .collect();
        assert_eq!(by_hosts["host[1-2]"], b"common\n");
        assert_eq!(by_hosts["host3"], b"different\n");
    }

    #[tokio::test]
    async fn test_global_timeout_cancels_run() {
        let transport = Arc::new(StubTransport::new(Behaviour::Hang));
        let worker = Worker::new(transport)
            .with_global_timeout(Duration::from_millis(50));
        let result = worker
            .execute(&target("host[1-3]"), &commands(&["sleep 3600"]), null_reporter())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 2);
        assert!(result
            .hosts
            .values()
            .all(|h| h.state == NodeState::Failed));
    }

    #[tokio::test]
    async fn test_single_host_streams_output() {
        let transport = Arc::new(StubTransport::new(Behaviour::Exit(0, "hello\n")));
        let worker = Worker::new(transport);
        let recording = Recording::default();
        let events = Arc::clone(&recording.0);
        let result = worker
            .execute(&target("host1"), &commands(&["greet"]), Box::new(recording))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        let events = events.lock();
        // output arrives before the finish event, exactly once
        let output_count = events.iter().filter(|e| e.starts_with("output")).count();
        assert_eq!(output_count, 1);
        assert!(events[0].contains("hello"));
    }

    #[tokio::test]
    async fn test_every_output_byte_reported_once() {
        let transport = Arc::new(StubTransport::new(Behaviour::Exit(0, "x\n")));
        let worker = Worker::new(transport);
        let recording = Recording::default();
        let events = Arc::clone(&recording.0);
        worker
            .execute(&target("host[1-4]"), &commands(&["emit"]), Box::new(recording))
            .await
            .unwrap();

        let events = events.lock();
        let outputs: Vec<&String> = events.iter().filter(|e| e.starts_with("output")).collect();
        assert_eq!(outputs.len(), 4);
        for host in ["host1", "host2", "host3", "host4"] {
            assert_eq!(
                outputs
                    .iter()
                    .filter(|e| e.contains(&format!("output {host} ")))
                    .count(),
                1
            );
        }
    }
}
