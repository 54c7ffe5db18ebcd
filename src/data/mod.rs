pub mod batcher;
pub mod loader;

pub use batcher::{Batch, Batcher, split};
pub use loader::{Dataset, SequencePair, load_dataset, make_pair};
