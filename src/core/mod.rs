//! 核心编排层：错误与恢复、状态投影、会话与会话监管、主控循环

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session;
pub mod session_supervisor;
pub mod state;

pub use error::{ErrorClass, PipelineError, RecoveryAction, StageFailure};
pub use orchestrator::{spawn_pipeline, Collaborators, Command, PipelineHandle};
pub use recovery::{ErrorClassifier, RecoveryEngine};
pub use session::Session;
pub use session_supervisor::SessionSupervisor;
pub use state::{PipelinePhase, PipelineSnapshot};
