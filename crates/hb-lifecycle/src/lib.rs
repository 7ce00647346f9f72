//! Host lifecycle: create and delete pipelines over the hypervisor driver,
//! port allocator, guest provisioner and host store, plus the reconciler that
//! writes their results back to the host record.

pub mod error;
pub mod name;
pub mod orchestrator;
pub mod outcome;
pub mod reconciler;
pub mod settings;


pub use error::{LifecycleError, Result};
pub use orchestrator::{CreateAccepted, CreateReport, DeleteOutcome, Lifecycle, PipelineHandle};
pub use outcome::VmCreationOutcome;
pub use reconciler::StatusReconciler;
pub use settings::LifecycleSettings;
