pub mod clock;
pub mod comparator;
pub mod engine;
pub mod filter;
pub mod git;
pub mod planner;
pub mod scanner;
pub mod transfer;

pub use clock::ClockCorrector;
pub use comparator::{AnalysisMode, ComparisonResult, Recommendation, TreeComparator};
pub use engine::SyncEngine;
pub use filter::{EntryKind, ExclusionRules, Purpose};
pub use git::{CommitInfo, GitComparator};
pub use planner::{SyncDirection, SyncPlan, SyncPlanner};
pub use scanner::{FileEntry, TreeScanner, TreeSnapshot};
pub use transfer::{ExecutorConfig, PlanExecutor, SyncReport};
