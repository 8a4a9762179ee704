// Selector construction and fingerprinting.

pub mod builder;
pub mod fingerprint;

pub use builder::{ClientRect, PageSelection, SelectionSignature, SelectorBuilder, TextRange};
pub use fingerprint::Fingerprint;
