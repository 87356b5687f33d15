//! 流水线：阶段定义、结果存储、结构化抽取、控制器与定向重跑

pub mod controller;
pub mod extract;
pub mod payload;
pub mod report;
pub mod rerun;
pub mod stage;
pub mod store;

pub use controller::{Dispatch, PipelineController, RunReport};
pub use extract::{parse_profile_lines, strip_fences, Extracted, Strategy, StructuredExtractor};
pub use report::{Report, ReportSection};
pub use rerun::{RerunCoordinator, RerunOutcome, RerunTarget, StageGraph};
pub use stage::{Stage, STAGE_COUNT};
pub use store::{
    ResultStore, StageChange, StageResult, StageStatus, StoreSnapshot, StoreUpdate,
};
