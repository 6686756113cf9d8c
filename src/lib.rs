//! # node-ranker
//!
//! An online node-ranking estimator for a workflow scheduler. Observes a
//! stream of completed task executions — each annotated with the
//! executing node, the task kind, an input-size feature, and an observed
//! cost — and continuously maintains a relative performance ranking of
//! compute nodes, even while the set of nodes, tasks, and measurements is
//! still growing.
//!
//! ## Architecture
//!
//! - Per-(task, node) linear cost models fit from streaming samples
//! - Pairwise log-ratio aggregation with confidence weights
//! - Transitive closure over the comparability graph via Floyd-Warshall
//! - A line-delimited JSON driver for scheduler integration

pub mod driver;
pub mod error;
pub mod estimator;
pub mod matrix;
pub mod model;
pub mod regression;
pub mod shared;

pub use error::{EstimatorError, Result};
pub use estimator::{Estimator, EstimatorState};
pub use model::{Line, Range, Sample};
pub use regression::{OlsRegression, RegressionModel};
pub use shared::SharedEstimator;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::driver::process_line;
    pub use crate::error::{EstimatorError, Result};
    pub use crate::estimator::{Estimator, EstimatorState};
    pub use crate::model::{Line, Range, Sample};
    pub use crate::regression::{OlsRegression, RegressionModel};
    pub use crate::shared::SharedEstimator;
}
