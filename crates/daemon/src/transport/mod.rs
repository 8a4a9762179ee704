// Transports that bridge an out-of-process context onto the message bus.

pub mod stdio;

pub use stdio::{serve_port, serve_stdio};
