// annotator-daemon library: the host-side contexts of the annotator and the
// bus that connects them.

pub mod bus;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod overlay;
pub mod panel;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod transport;
