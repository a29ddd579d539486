//! The eternal orchestration pattern: a coordinator that perpetually
//! continues-as-new around one delayed, trace-annotated sub-orchestration,
//! plus the periodic trigger that (re)starts it when it is not running.
pub mod config;
pub mod orchestrations;
pub mod trigger;

pub use config::EternalConfig;
pub use orchestrations::{COORDINATOR, CYCLE, CoordinatorOutcome, CycleOutcome, EternalInput};
pub use trigger::TriggerAdapter;
