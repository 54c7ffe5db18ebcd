pub mod generate;
pub mod report;

pub use generate::{Generated, argmax, generate, generate_all, validate_sequence, validate_target};
pub use report::{SeedEntry, SeedReport, write_seeds};
