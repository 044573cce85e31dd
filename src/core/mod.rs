//! 核心编排层：错误与恢复、状态投影、网络恢复、主控编排

pub mod builder;
pub mod connectivity;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use builder::TrainerBuilder;
pub use connectivity::{
    spawn_probe, ConnectivityEvent, ConnectivityMonitor, PendingExchange, ReplayReport,
    OFFLINE_NOTICE,
};
pub use error::{RecoveryAction, TrainerError};
pub use orchestrator::{ExchangeOrchestrator, TurnOutcome};
pub use recovery::RecoveryEngine;
pub use state::{EntryStatus, ExchangePhase, LocalEntry, LocalTranscript, UiState};
