//! Byte-level sequence-to-sequence models for generating file-format fuzzing seeds.
//!
//! Sample files of one format are tokenized into padded byte sequences, a plain LSTM, attention
//! LSTM or transformer encoder-decoder is trained on them, and the trained model decodes new byte
//! sequences greedily from held-out inputs.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod data;
pub mod error;
pub mod inference;
pub mod model;
pub mod tokenizer;
pub mod training;
pub mod weights;

pub use error::{Error, Result};
