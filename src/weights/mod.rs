pub mod checkpoint;

pub use checkpoint::{CheckpointMarker, CheckpointPaths, load, read_marker, save};
