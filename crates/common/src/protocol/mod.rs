pub mod messages;
pub mod service;

pub use messages::{DecodeError, Message, Route};
