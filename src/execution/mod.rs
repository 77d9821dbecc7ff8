//! Flow execution: step executor, poller, coordinators and admission

pub mod admission;
pub mod engine;
pub mod executor;
pub mod poller;
pub mod pool;
pub mod replay;

pub use admission::{
    parse_flow_ids, Accepted, AdmissionController, BatchOutcome, ExecutionHandle, Rejection,
    RejectionReason,
};
pub use engine::FlowExecutionCoordinator;
pub use executor::StepExecutor;
pub use poller::PipelinePoller;
pub use pool::{PoolSaturated, PoolStatus, WorkerPool};
pub use replay::ReplayCoordinator;
