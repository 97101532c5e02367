pub mod engine;
pub mod error;
pub mod state;
pub mod task;
pub mod types;

pub use engine::SymbolScheduler;
pub use error::SchedulerError;
pub use state::TaskState;
pub use task::MonitorTask;
pub use types::{SchedulerConfig, StopReport};
