pub mod histogram;
pub mod join_optimizer;
pub mod table_stats;

pub use histogram::IntHistogram;
pub use join_optimizer::{JoinNode, JoinOptimizer};
pub use table_stats::TableStats;
