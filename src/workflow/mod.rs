//! Graph-based ticket analysis workflow.
//!
//! [`TicketAnalysisWorkflow`] is the entry point. It builds the pipeline
//! graph from [`pipeline`], runs it with the [`executor`] and reports the
//! outcome to the audit sink.

pub mod driver;
pub mod executor;
pub mod graph;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod steps;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::TicketAnalysisWorkflow;
pub use state::{AnalysisRequest, WorkflowState, WorkflowStatus};
