//! Attention layers.
//!
//! - [`AdditiveAttention`]: Bahdanau-style scorer used by the attention seq2seq decoder.
//! - [`MultiHeadAttention`]: scaled dot-product attention used by the transformer stack.
//!
//! Masked positions get [`MASK_VALUE`] added to their scores before the softmax, which drives
//! their weight to exactly 0.0 in f32.

use candle_core::{D, Device, Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

use super::config::ModelConfig;

/// Additive score for masked-out positions.
pub const MASK_VALUE: f64 = -1e9;

/// Additive bias from a real-token mask: 0.0 where `mask == 1`, [`MASK_VALUE`] where `mask == 0`.
///
/// Output has the same shape as `mask`.
///
/// # Errors
/// Returns an error if tensor operations fail.
pub fn mask_bias(mask: &Tensor) -> Result<Tensor> {
    mask.affine(-MASK_VALUE, MASK_VALUE)
}

/// Key-padding bias for multi-head attention.
///
/// `(B, T)` real-token mask -> `(B, 1, 1, T)` additive bias.
///
/// # Errors
/// Returns an error if tensor operations fail.
pub fn key_padding_bias(mask: &Tensor) -> Result<Tensor> {
    mask_bias(mask)?.unsqueeze(1)?.unsqueeze(1)
}

/// Create a causal attention mask.
///
/// Returns a mask where position (i, j) is [`MASK_VALUE`] if j > i, else 0.
/// This prevents attending to future tokens.
///
/// # Errors
/// Returns an error if tensor creation fails.
#[allow(clippy::cast_possible_truncation)]
pub fn create_causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let masked = MASK_VALUE as f32;
    let mask_data: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j <= i { 0.0 } else { masked }))
        .collect();

    let mask = Tensor::from_vec(mask_data, (seq_len, seq_len), device)?;

    // Add batch and head dimensions: (T, T) -> (1, 1, T, T)
    mask.unsqueeze(0)?.unsqueeze(0)
}

/// Additive (Bahdanau) attention scorer.
///
/// `score(h, s_j) = v^T tanh(W_q h + W_k s_j)`; PAD positions are masked before the softmax.
pub struct AdditiveAttention {
    w_query: Linear,
    w_keys: Linear,
    v: Linear,
}

impl AdditiveAttention {
    /// Create a new additive scorer.
    ///
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(query_dim: usize, key_dim: usize, attn_dim: usize, vb: VarBuilder) -> Result<Self> {
        let w_query = candle_nn::linear_no_bias(query_dim, attn_dim, vb.pp("w_query"))?;
        let w_keys = candle_nn::linear_no_bias(key_dim, attn_dim, vb.pp("w_keys"))?;
        let v = candle_nn::linear_no_bias(attn_dim, 1, vb.pp("v"))?;
        Ok(Self { w_query, w_keys, v })
    }

    /// Project encoder states once per encoded sequence: (B, T, key_dim) -> (B, T, attn_dim).
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn project_keys(&self, keys: &Tensor) -> Result<Tensor> {
        self.w_keys.forward(keys)
    }

    /// Alignment weights over encoder positions.
    ///
    /// # Arguments
    /// * `query` - Decoder hidden state (B, query_dim)
    /// * `projected_keys` - Output of [`Self::project_keys`], (B, T, attn_dim)
    /// * `mask` - Encoder real-token mask (B, T)
    ///
    /// # Returns
    /// Weights of shape (B, T); each row sums to 1 over real positions and is 0 at PAD.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn weights(&self, query: &Tensor, projected_keys: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let q = self.w_query.forward(query)?.unsqueeze(1)?;
        let energy = projected_keys.broadcast_add(&q)?.tanh()?;
        let scores = self.v.forward(&energy)?.squeeze(D::Minus1)?;
        let scores = (scores + mask_bias(mask)?)?;
        candle_nn::ops::softmax_last_dim(&scores)
    }

    /// Context vector and weights for one decoder step.
    ///
    /// # Arguments
    /// * `query` - Decoder hidden state (B, query_dim)
    /// * `projected_keys` - (B, T, attn_dim)
    /// * `values` - Encoder states (B, T, key_dim)
    /// * `mask` - Encoder real-token mask (B, T)
    ///
    /// # Returns
    /// `(context (B, key_dim), weights (B, T))`
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(
        &self,
        query: &Tensor,
        projected_keys: &Tensor,
        values: &Tensor,
        mask: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let weights = self.weights(query, projected_keys, mask)?;
        let context = weights.unsqueeze(1)?.matmul(values)?.squeeze(1)?;
        Ok((context, weights))
    }
}

/// Multi-head scaled dot-product attention.
///
/// Queries come from one sequence, keys and values from another (the same one for
/// self-attention).
pub struct MultiHeadAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    /// Output projection (d_model -> d_model)
    o_proj: Linear,
    n_head: usize,
    d_model: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    /// Create a new multi-head attention layer.
    ///
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let d_model = config.emb_dim;
        Ok(Self {
            q_proj: candle_nn::linear(d_model, d_model, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear(d_model, d_model, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear(d_model, d_model, vb.pp("v_proj"))?,
            o_proj: candle_nn::linear(d_model, d_model, vb.pp("o_proj"))?,
            n_head: config.num_heads,
            d_model,
            head_dim: config.head_dim(),
        })
    }

    /// (B, T, C) -> (B, n_head, T, head_dim)
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        x.reshape((b, t, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `query` - (B, Tq, d_model)
    /// * `kv` - (B, Tk, d_model)
    /// * `bias` - Additive mask broadcastable to (B, n_head, Tq, Tk)
    ///
    /// # Returns
    /// Output tensor of shape (B, Tq, d_model)
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, query: &Tensor, kv: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let (b, tq, _) = query.dims3()?;

        let q = self.split_heads(&self.q_proj.forward(query)?)?;
        let k = self.split_heads(&self.k_proj.forward(kv)?)?;
        let v = self.split_heads(&self.v_proj.forward(kv)?)?;

        // softmax(QK^T / sqrt(d_k) + bias) * V
        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let k_t = k.transpose(D::Minus2, D::Minus1)?.contiguous()?;
        let att = (q.matmul(&k_t)? * scale)?;
        let att = att.broadcast_add(bias)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;

        // (B, n_head, Tq, Tk) @ (B, n_head, Tk, head_dim)
        let y = att.matmul(&v)?;
        let y = y
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, tq, self.d_model))?;

        self.o_proj.forward(&y)
    }
}
