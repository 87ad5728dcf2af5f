//! Parallel execution engine: value objects, per-host state machine,
//! transport seam and the sliding-window scheduler

pub mod command;
pub mod state;
pub mod target;
pub mod transport;
pub mod worker;

pub use command::Command;
pub use state::NodeState;
pub use target::Target;
pub use transport::{CommandStatus, OutputChunk, OutputStream, SshTransport, Transport};
pub use worker::{CommandOutput, ExecutionResult, HostResult, Mode, Worker};
