// Worker side of the line protocol: serve ticks from the host on stdio

pub mod handler;
pub mod server;

pub use handler::{CommandTickHandler, TickHandler};
pub use server::{serve, ServeOutcome};
