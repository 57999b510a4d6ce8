//! Background tasks: delegated sub-agent runs under a global concurrency cap.

pub mod errors;
pub mod factory;
pub mod scheduler;
pub mod types;

pub use errors::TaskError;
pub use factory::{DefaultSubAgentFactory, SubAgentFactory, SubAgentSpec};
pub use scheduler::{TaskScheduler, WeakTaskScheduler};
pub use types::{Task, TaskFilter, TaskRequest, TaskState};
