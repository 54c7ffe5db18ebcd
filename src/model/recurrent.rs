//! Masked LSTM recurrence.
//!
//! Rows whose mask is 0 at a step keep their previous `(h, c)` unchanged, so trailing `<PAD>`
//! positions never touch the state no matter how many there are.

use candle_core::{DType, IndexOp, Result, Tensor};
use candle_nn::VarBuilder;
use candle_nn::rnn::{LSTM, LSTMConfig, LSTMState, RNN};

/// Real-token mask for a batch of token IDs: 1.0 where `token != pad_id`, 0.0 at padding.
///
/// # Errors
/// Returns an error if tensor operations fail.
pub fn padding_mask(token_ids: &Tensor, pad_id: u32) -> Result<Tensor> {
    token_ids.ne(pad_id)?.to_dtype(DType::F32)
}

/// Single-layer LSTM that skips masked steps.
pub struct MaskedLstm {
    lstm: LSTM,
}

impl MaskedLstm {
    /// Create a new masked LSTM.
    ///
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(in_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let lstm = candle_nn::rnn::lstm(in_dim, hidden_dim, LSTMConfig::default(), vb)?;
        Ok(Self { lstm })
    }

    /// All-zero `(h, c)` for `batch` rows.
    ///
    /// # Errors
    /// Returns an error if tensor creation fails.
    pub fn zero_state(&self, batch: usize) -> Result<LSTMState> {
        self.lstm.zero_state(batch)
    }

    /// Advance one step.
    ///
    /// # Arguments
    /// * `x` - Step input of shape (batch, in_dim)
    /// * `mask` - Shape (batch,), 1.0 for real tokens and 0.0 for padding
    /// * `state` - Current state
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn step(&self, x: &Tensor, mask: &Tensor, state: &LSTMState) -> Result<LSTMState> {
        let next = self.lstm.step(x, state)?;
        let keep = mask.unsqueeze(1)?;
        let carry = keep.affine(-1.0, 1.0)?;
        let blend = |new: &Tensor, old: &Tensor| -> Result<Tensor> {
            new.broadcast_mul(&keep)? + old.broadcast_mul(&carry)?
        };
        Ok(LSTMState {
            h: blend(&next.h, &state.h)?,
            c: blend(&next.c, &state.c)?,
        })
    }

    /// Run a whole sequence.
    ///
    /// # Arguments
    /// * `xs` - Inputs of shape (batch, seq_len, in_dim)
    /// * `mask` - Shape (batch, seq_len)
    /// * `init` - Initial state
    ///
    /// # Returns
    /// Per-step hidden states (batch, seq_len, hidden_dim) and the final state.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn seq(&self, xs: &Tensor, mask: &Tensor, init: LSTMState) -> Result<(Tensor, LSTMState)> {
        let (_, seq_len, _) = xs.dims3()?;
        let mut state = init;
        let mut outputs = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let x = xs.i((.., t, ..))?.contiguous()?;
            let m = mask.i((.., t))?.contiguous()?;
            state = self.step(&x, &m, &state)?;
            outputs.push(state.h.clone());
        }
        Ok((Tensor::stack(&outputs, 1)?, state))
    }
}
