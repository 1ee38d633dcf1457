// Minute-aligned dispatcher, its registry, and the host lifecycle around them

pub mod clock;
pub mod dispatcher;
pub mod module;
pub mod registry;

pub use clock::{Clock, FixedClock, SystemClock};
pub use dispatcher::{alignment_delay, Dispatcher, DispatcherConfig, DispatcherState};
pub use module::SchedulerModule;
pub use registry::DispatcherRegistry;
