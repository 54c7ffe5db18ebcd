//! Transformer building blocks.
//!
//! Pre-norm encoder and decoder blocks with a GELU feed-forward network.

use candle_core::{Result, Tensor};
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};

use super::attention::MultiHeadAttention;
use super::config::ModelConfig;

pub(crate) fn layer_norm(config: &ModelConfig, vb: VarBuilder) -> Result<LayerNorm> {
    candle_nn::layer_norm(config.emb_dim, candle_nn::LayerNormConfig::default(), vb)
}

/// Feed-forward network: fc1 -> GELU -> fc2.
pub struct FeedForward {
    /// Up projection (d_model -> dff)
    fc1: Linear,
    /// Down projection (dff -> d_model)
    fc2: Linear,
}

impl FeedForward {
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let fc1 = candle_nn::linear(config.emb_dim, config.dff, vb.pp("fc1"))?;
        let fc2 = candle_nn::linear(config.dff, config.emb_dim, vb.pp("fc2"))?;
        Ok(Self { fc1, fc2 })
    }

    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.fc1.forward(x)?.gelu()?;
        self.fc2.forward(&h)
    }
}

/// Encoder block.
///
/// Structure: LayerNorm -> Self-attention -> Residual -> LayerNorm -> FFN -> Residual
pub struct EncoderBlock {
    ln_1: LayerNorm,
    attn: MultiHeadAttention,
    ln_2: LayerNorm,
    ffn: FeedForward,
    dropout: Dropout,
}

impl EncoderBlock {
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            ln_1: layer_norm(config, vb.pp("ln_1"))?,
            attn: MultiHeadAttention::new(config, vb.pp("attn"))?,
            ln_2: layer_norm(config, vb.pp("ln_2"))?,
            ffn: FeedForward::new(config, vb.pp("ffn"))?,
            dropout: Dropout::new(config.dropout),
        })
    }

    /// # Arguments
    /// * `x` - (batch, seq_len, d_model)
    /// * `bias` - Key-padding bias (batch, 1, 1, seq_len)
    /// * `train` - Enables dropout
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, x: &Tensor, bias: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.ln_1.forward(x)?;
        let h = self.attn.forward(&h, &h, bias)?;
        let x = (x + self.dropout.forward(&h, train)?)?;

        let h = self.ln_2.forward(&x)?;
        let h = self.ffn.forward(&h)?;
        x + self.dropout.forward(&h, train)?
    }
}

/// Decoder block.
///
/// Structure: causal self-attention, cross-attention over the encoder memory, FFN; each
/// sub-layer pre-normed with a residual connection.
pub struct DecoderBlock {
    ln_1: LayerNorm,
    self_attn: MultiHeadAttention,
    ln_2: LayerNorm,
    cross_attn: MultiHeadAttention,
    ln_3: LayerNorm,
    ffn: FeedForward,
    dropout: Dropout,
}

impl DecoderBlock {
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            ln_1: layer_norm(config, vb.pp("ln_1"))?,
            self_attn: MultiHeadAttention::new(config, vb.pp("self_attn"))?,
            ln_2: layer_norm(config, vb.pp("ln_2"))?,
            cross_attn: MultiHeadAttention::new(config, vb.pp("cross_attn"))?,
            ln_3: layer_norm(config, vb.pp("ln_3"))?,
            ffn: FeedForward::new(config, vb.pp("ffn"))?,
            dropout: Dropout::new(config.dropout),
        })
    }

    /// # Arguments
    /// * `x` - Decoder activations (batch, tgt_len, d_model)
    /// * `memory` - Encoder output (batch, src_len, d_model)
    /// * `self_bias` - Causal + target padding bias, broadcastable to (batch, 1, tgt_len, tgt_len)
    /// * `memory_bias` - Source padding bias (batch, 1, 1, src_len)
    /// * `train` - Enables dropout
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        self_bias: &Tensor,
        memory_bias: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let h = self.ln_1.forward(x)?;
        let h = self.self_attn.forward(&h, &h, self_bias)?;
        let x = (x + self.dropout.forward(&h, train)?)?;

        let h = self.ln_2.forward(&x)?;
        let h = self.cross_attn.forward(&h, memory, memory_bias)?;
        let x = (x + self.dropout.forward(&h, train)?)?;

        let h = self.ln_3.forward(&x)?;
        let h = self.ffn.forward(&h)?;
        x + self.dropout.forward(&h, train)?
    }
}
