//! Command system for reader control.
//!
//! Provides:
//! - Command data structures and typed payloads
//! - Command state persistence with a monotonic status lifecycle
//! - Immediate dispatch and device response correlation
//! - Group fan-out with per-device results and history
//! - Scheduled execution and the timed-out sweep

pub mod api;
pub mod command;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod group;
pub mod scheduler;
pub mod state;
pub mod sweep;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{CommandApi, SubmitCommandRequest, SubmitCommandResponse};
pub use command::{
    Command, CommandId, CommandPayload, CommandPriority, CommandStatus, CommandType, GroupCommandId, ModeParams,
    RebootParams, StartParams, UpgradeParams,
};
pub use correlator::{CommandCorrelator, CorrelationOutcome};
pub use dispatcher::CommandDispatcher;
pub use error::{CommandError, Result};
pub use group::{
    DeviceDispatchResult, GroupCommandFilter, GroupCommandSummary, GroupDispatchResult, GroupFanoutCoordinator,
    StatusCounts,
};
pub use scheduler::{CommandExecutor, CommandScheduler, PublishingExecutor, SchedulerConfig, TickOutcome};
pub use state::{CommandStore, StoreStats, Transition};
pub use sweep::{SweepConfig, TimeoutSweeper};
