pub mod scheduler;
pub mod trigger;

pub use scheduler::{Phase, SchedulerError, SchedulerState, StepScheduler};
pub use trigger::{StepTick, StepTrigger};
