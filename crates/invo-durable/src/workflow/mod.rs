//! Step-based workflow execution

mod runner;
mod step;

pub use runner::{
    StepDefinition, StepReport, WorkflowDefinition, WorkflowReport, WorkflowRunError,
    WorkflowRunner,
};
pub use step::{Step, StepContext, StepError};
