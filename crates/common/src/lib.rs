// annotator-common: shared types and protocol for the annotator workspace

pub mod geometry;
pub mod ids;
pub mod protocol;
pub mod selector;
pub mod types;
