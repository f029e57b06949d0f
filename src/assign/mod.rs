//! Long-term channel assignment: per section, which physical voices each
//! logical channel may use.

pub mod catalog;
pub mod optimizer;
pub mod plan;
pub mod scorer;
pub mod statistics;

pub use catalog::ConfigurationCatalog;
pub use optimizer::ChannelAssigner;
pub use plan::{AssignmentPlan, IndexedPlan, PlanSchedule, Program, TriggerCandidate, VoiceSetAssignment};
pub use scorer::PlanScorer;
pub use statistics::{ChannelStatistics, SectionStatistics};
