/// Schedule Module
///
/// Cron parsing, the durable schedule store, the registry that owns
/// schedule lifecycle and firing, and the periodic safety-net clock.

pub mod clock;
pub mod cron;
pub mod registry;
pub mod store;
pub mod types;

pub use clock::CronClock;
pub use registry::ScheduleRegistry;
pub use store::ScheduleStore;
pub use types::{Schedule, ScheduleUpdate};
