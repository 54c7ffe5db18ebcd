//! Byte-level tokenizer for seed generation.
//!
//! Vocabulary layout:
//! - Special tokens occupy IDs 0..=2 (`<PAD>`, `<SOS>`, `<EOS>`)
//! - Raw bytes 0x00..=0xFF occupy IDs 3..=258

/// Special token IDs.
pub const PAD_ID: u32 = 0;
pub const SOS_ID: u32 = 1;
pub const EOS_ID: u32 = 2;

pub const NUM_SPECIAL_TOKENS: u32 = 3;

pub const BYTE_START: u32 = NUM_SPECIAL_TOKENS; // 3
pub const BYTE_LEN: u32 = 256;
pub const BYTE_END: u32 = BYTE_START + BYTE_LEN - 1; // 258

/// Total vocabulary size: 3 special tokens + 256 byte values = 259.
pub const VOCAB_SIZE: u32 = NUM_SPECIAL_TOKENS + BYTE_LEN;

/// Fixed byte <-> token mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Total vocabulary size (259 tokens).
    #[must_use]
    pub fn vocab_size(self) -> u32 {
        VOCAB_SIZE
    }

    #[must_use]
    pub fn pad_id(self) -> u32 {
        PAD_ID
    }

    #[must_use]
    pub fn sos_id(self) -> u32 {
        SOS_ID
    }

    #[must_use]
    pub fn eos_id(self) -> u32 {
        EOS_ID
    }

    /// Returns true for `<PAD>`, `<SOS>` and `<EOS>`.
    #[must_use]
    pub fn is_special(self, token_id: u32) -> bool {
        token_id < NUM_SPECIAL_TOKENS
    }

    #[must_use]
    pub fn encode_byte(self, byte: u8) -> u32 {
        BYTE_START + u32::from(byte)
    }

    #[must_use]
    pub fn encode(self, bytes: &[u8]) -> Vec<u32> {
        bytes.iter().map(|&b| self.encode_byte(b)).collect()
    }

    /// Decode a token ID into the byte it stands for.
    ///
    /// Returns `None` for special tokens and out-of-vocabulary IDs.
    #[must_use]
    pub fn decode_token(self, token_id: u32) -> Option<u8> {
        if (BYTE_START..=BYTE_END).contains(&token_id) {
            u8::try_from(token_id - BYTE_START).ok()
        } else {
            None
        }
    }

    /// Decode a token sequence into bytes.
    ///
    /// Stops at the first `<EOS>`; other non-byte tokens are skipped.
    #[must_use]
    pub fn decode(self, token_ids: &[u32]) -> Vec<u8> {
        token_ids
            .iter()
            .take_while(|&&t| t != EOS_ID)
            .filter_map(|&t| self.decode_token(t))
            .collect()
    }

    /// Right-pad with `<PAD>` (or truncate) to exactly `len` tokens.
    #[must_use]
    pub fn pad_to(self, mut tokens: Vec<u32>, len: usize) -> Vec<u32> {
        tokens.resize(len, PAD_ID);
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocab_layout() {
        let tok = ByteTokenizer::new();
        assert_eq!(tok.vocab_size(), 259);
        assert_eq!(tok.encode_byte(0x00), BYTE_START);
        assert_eq!(tok.encode_byte(0xFF), BYTE_END);
        assert!(tok.is_special(PAD_ID));
        assert!(tok.is_special(SOS_ID));
        assert!(tok.is_special(EOS_ID));
        assert!(!tok.is_special(BYTE_START));
    }

    #[test]
    fn test_png_magic_roundtrip() {
        let tok = ByteTokenizer::new();
        let magic = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        let ids = tok.encode(&magic);
        assert!(ids.iter().all(|&t| t >= BYTE_START && t < VOCAB_SIZE));
        assert_eq!(tok.decode(&ids), magic.to_vec());
    }

    #[test]
    fn test_decode_stops_at_eos_and_skips_specials() {
        let tok = ByteTokenizer::new();
        let ids = vec![SOS_ID, tok.encode_byte(b'A'), PAD_ID, tok.encode_byte(b'B'), EOS_ID, tok.encode_byte(b'C')];
        assert_eq!(tok.decode(&ids), b"AB".to_vec());
    }

    #[test]
    fn test_decode_token_out_of_vocab() {
        let tok = ByteTokenizer::new();
        assert_eq!(tok.decode_token(VOCAB_SIZE), None);
        assert_eq!(tok.decode_token(EOS_ID), None);
    }

    #[test]
    fn test_pad_to_pads_and_truncates() {
        let tok = ByteTokenizer::new();
        assert_eq!(tok.pad_to(vec![5, 6], 4), vec![5, 6, PAD_ID, PAD_ID]);
        assert_eq!(tok.pad_to(vec![5, 6, 7], 2), vec![5, 6]);
    }
}
