pub mod bias;
pub mod scheduler;

pub use bias::{BiasHandle, BiasState};
pub use scheduler::{BiasScheduler, SchedulerHandle, SchedulerPhase};
