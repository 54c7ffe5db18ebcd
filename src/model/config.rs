use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tokenizer::bytes::{EOS_ID, PAD_ID, SOS_ID, VOCAB_SIZE};

/// Which network family a model uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// LSTM encoder-decoder.
    Seq2Seq,
    /// LSTM encoder-decoder with additive attention.
    Attention,
    /// Encoder-decoder transformer stack.
    Transformer,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Seq2Seq, Variant::Attention, Variant::Transformer];

    /// Parse a `--model` name. Returns `None` for unknown names.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "seq2seq" => Some(Self::Seq2Seq),
            "attention" => Some(Self::Attention),
            "transformer" => Some(Self::Transformer),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seq2Seq => "seq2seq",
            Self::Attention => "attention",
            Self::Transformer => "transformer",
        }
    }

    /// Directory under the model root holding this variant's checkpoints.
    #[must_use]
    pub fn checkpoint_dir(self) -> &'static str {
        match self {
            Self::Seq2Seq => "s2s",
            Self::Attention => "attention",
            Self::Transformer => "transformer",
        }
    }

    /// File stem of the latest checkpoint.
    #[must_use]
    pub fn checkpoint_stem(self) -> &'static str {
        match self {
            Self::Seq2Seq => "simple_s2s_model_latest",
            Self::Attention => "attention_model_latest",
            Self::Transformer => "transformer_model_latest",
        }
    }

    /// Directory under the output root holding generated seeds.
    #[must_use]
    pub fn output_dir(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model hyperparameters.
///
/// Fixed for the lifetime of a model and stored alongside every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub variant: Variant,
    /// Encoder vocabulary size
    pub enc_vocab_size: usize,
    /// Decoder vocabulary size
    pub dec_vocab_size: usize,
    pub pad_token_id: u32,
    pub sos_token_id: u32,
    pub eos_token_id: u32,
    /// Maximum sequence length, both for padded inputs and generated outputs
    pub maxlen: usize,
    /// Token embedding dimension (`d_model` for the transformer)
    pub emb_dim: usize,
    /// LSTM hidden units (recurrent variants)
    pub units: usize,
    /// Encoder and decoder blocks (transformer)
    pub num_layers: usize,
    /// Attention heads (transformer)
    pub num_heads: usize,
    /// Feed-forward width (transformer)
    pub dff: usize,
    /// Dropout probability, applied only while training (transformer)
    pub dropout: f32,
}

impl ModelConfig {
    /// Byte-vocabulary config for `variant` with the remaining settings at their defaults.
    #[must_use]
    pub fn for_variant(variant: Variant, maxlen: usize, emb_dim: usize, units: usize) -> Self {
        Self {
            variant,
            maxlen,
            emb_dim,
            units,
            ..Self::default()
        }
    }

    /// Dimension per attention head.
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.emb_dim / self.num_heads
    }

    /// Validate that configuration is consistent.
    ///
    /// # Errors
    /// Returns an error if the configuration is internally inconsistent.
    pub fn validate(&self) -> Result<(), &'static str> {
        let specials = [self.pad_token_id, self.sos_token_id, self.eos_token_id];
        if self.enc_vocab_size <= specials.len() || self.dec_vocab_size <= specials.len() {
            return Err("vocab sizes must exceed the number of special tokens");
        }
        if specials
            .iter()
            .any(|&id| usize::try_from(id).map_or(true, |id| id >= self.dec_vocab_size))
        {
            return Err("special token ids must lie inside the decoder vocabulary");
        }
        if self.maxlen < 3 {
            return Err("maxlen must be at least 3");
        }
        if self.emb_dim == 0 {
            return Err("emb_dim must be positive");
        }
        if self.units == 0 {
            return Err("units must be positive");
        }
        if self.variant == Variant::Transformer {
            if self.num_layers == 0 || self.num_heads == 0 {
                return Err("num_layers and num_heads must be positive");
            }
            if !self.emb_dim.is_multiple_of(self.num_heads) {
                return Err("emb_dim must be divisible by num_heads");
            }
            if self.dff == 0 {
                return Err("dff must be positive");
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err("dropout must be in [0, 1)");
        }
        Ok(())
    }

    /// Tiny config for tests and smoke runs.
    #[must_use]
    pub fn tiny(variant: Variant) -> Self {
        Self {
            variant,
            maxlen: 8,
            emb_dim: 8,
            units: 16,
            num_layers: 1,
            num_heads: 2,
            dff: 16,
            ..Self::default()
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Seq2Seq,
            enc_vocab_size: VOCAB_SIZE as usize,
            dec_vocab_size: VOCAB_SIZE as usize,
            pad_token_id: PAD_ID,
            sos_token_id: SOS_ID,
            eos_token_id: EOS_ID,
            maxlen: 1000,
            emb_dim: 64,
            units: 256,
            num_layers: 4,
            num_heads: 4,
            dff: 512,
            dropout: 0.3,
        }
    }
}
