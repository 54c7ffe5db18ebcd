pub mod bytes;

pub use bytes::{ByteTokenizer, EOS_ID, PAD_ID, SOS_ID, VOCAB_SIZE};
