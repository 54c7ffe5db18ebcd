//! Embedding layers for the transformer stack.

use candle_core::{DType, Result, Tensor};
use candle_nn::{Embedding, Module, VarBuilder};

use super::config::ModelConfig;

/// Token embedding layer.
pub struct TokenEmbedding {
    /// Embedding weights
    embedding: Embedding,
    /// `sqrt(d_model)`, applied to every lookup
    scale: f64,
}

impl TokenEmbedding {
    /// Create a new token embedding layer.
    ///
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(vocab_size: usize, config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let embedding = candle_nn::embedding(vocab_size, config.emb_dim, vb)?;
        #[allow(clippy::cast_precision_loss)]
        let scale = (config.emb_dim as f64).sqrt();
        Ok(Self { embedding, scale })
    }

    /// Token IDs (batch, seq_len) -> embeddings (batch, seq_len, d_model).
    ///
    /// # Errors
    /// Returns an error if embedding lookup fails.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.embedding.forward(token_ids)? * self.scale
    }
}

/// Learned absolute position embedding, one row per position up to `maxlen`.
pub struct PositionEmbedding {
    embedding: Embedding,
    max_positions: usize,
}

impl PositionEmbedding {
    /// Create a new position embedding layer.
    ///
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let embedding = candle_nn::embedding(config.maxlen, config.emb_dim, vb)?;
        Ok(Self {
            embedding,
            max_positions: config.maxlen,
        })
    }

    /// Position embeddings for a (batch, seq_len) input, shape (1, seq_len, d_model).
    ///
    /// # Errors
    /// Returns an error if `seq_len` exceeds the table or tensor operations fail.
    #[allow(clippy::cast_possible_truncation)]
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = token_ids.dims2()?;
        if seq_len > self.max_positions {
            return Err(candle_core::Error::Msg(format!(
                "Sequence length {seq_len} exceeds maxlen {}",
                self.max_positions
            )));
        }
        let positions = Tensor::arange(0u32, seq_len as u32, token_ids.device())?;
        self.embedding.forward(&positions)?.unsqueeze(0)
    }
}

/// Token plus position embedding.
///
/// # Errors
/// Returns an error if either lookup fails.
pub fn embed(tokens: &TokenEmbedding, positions: &PositionEmbedding, ids: &Tensor) -> Result<Tensor> {
    let ids = if ids.dtype() == DType::U32 {
        ids.clone()
    } else {
        ids.to_dtype(DType::U32)?
    };
    tokens.forward(&ids)?.broadcast_add(&positions.forward(&ids)?)
}
