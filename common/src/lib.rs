// Common library shared by the scheduler host and the worker process

pub mod config;
pub mod errors;
pub mod gateway;
pub mod scheduler;
pub mod telemetry;
pub mod worker;
