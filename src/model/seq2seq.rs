//! Recurrent encoder-decoder models.
//!
//! [`Seq2Seq`] conditions the decoder only on the encoder's final `(h, c)`.
//! [`AttentionSeq2Seq`] additionally attends over every encoder state at each decoder step.
//!
//! The teacher-forced pass is a loop over the same `step` used during generation, so position
//! `i` of [`forward`](Seq2Seq::forward) matches step `i` of free-running decoding given the same
//! prefix.

use candle_core::{D, Device, IndexOp, Result, Tensor};
use candle_nn::rnn::LSTMState;
use candle_nn::{Embedding, Linear, Module, VarBuilder};

use super::EncoderOutput;
use super::attention::AdditiveAttention;
use super::config::ModelConfig;
use super::recurrent::{MaskedLstm, padding_mask};

/// Embedding + masked LSTM over the input sequence.
pub struct Encoder {
    embedding: Embedding,
    lstm: MaskedLstm,
    pad_id: u32,
}

impl Encoder {
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let embedding =
            candle_nn::embedding(config.enc_vocab_size, config.emb_dim, vb.pp("embedding"))?;
        let lstm = MaskedLstm::new(config.emb_dim, config.units, vb.pp("lstm"))?;
        Ok(Self {
            embedding,
            lstm,
            pad_id: config.pad_token_id,
        })
    }

    /// Encode token IDs of shape (batch, seq_len).
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, input_ids: &Tensor) -> Result<EncoderOutput> {
        let (batch, _) = input_ids.dims2()?;
        let mask = padding_mask(input_ids, self.pad_id)?;
        let xs = self.embedding.forward(input_ids)?;
        let (states, last) = self.lstm.seq(&xs, &mask, self.lstm.zero_state(batch)?)?;
        Ok(EncoderOutput {
            states,
            mask,
            summary: Some(last),
            projected_keys: None,
        })
    }
}

/// Shared decoder input handling: embed one token per row and advance the masked LSTM.
struct RecurrentCore {
    embedding: Embedding,
    lstm: MaskedLstm,
    pad_id: u32,
}

impl RecurrentCore {
    fn new(config: &ModelConfig, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            embedding: candle_nn::embedding(
                config.dec_vocab_size,
                config.emb_dim,
                vb.pp("embedding"),
            )?,
            lstm: MaskedLstm::new(config.emb_dim, config.units, vb.pp("lstm"))?,
            pad_id: config.pad_token_id,
        })
    }

    /// `tokens` (batch,) -> next state.
    fn step(&self, tokens: &Tensor, state: &LSTMState) -> Result<LSTMState> {
        let mask = padding_mask(tokens, self.pad_id)?;
        let x = self.embedding.forward(tokens)?;
        self.lstm.step(&x, &mask, state)
    }
}

fn summary(encoded: &EncoderOutput) -> Result<&LSTMState> {
    encoded
        .summary
        .as_ref()
        .ok_or_else(|| candle_core::Error::Msg("recurrent decoder needs an encoder summary".into()))
}

/// Run `step` over every column of `decoder_input` and stack the logits.
fn teacher_forced<F>(decoder_input: &Tensor, init: LSTMState, mut step: F) -> Result<Tensor>
where
    F: FnMut(&Tensor, &LSTMState) -> Result<(Tensor, LSTMState)>,
{
    let (_, seq_len) = decoder_input.dims2()?;
    let mut state = init;
    let mut logits = Vec::with_capacity(seq_len);
    for t in 0..seq_len {
        let tokens = decoder_input.i((.., t))?.contiguous()?;
        let (out, next) = step(&tokens, &state)?;
        logits.push(out);
        state = next;
    }
    Tensor::stack(&logits, 1)
}

/// Decoder conditioned only on the encoder summary.
pub struct Decoder {
    core: RecurrentCore,
    /// Output projection (units -> dec_vocab_size)
    out: Linear,
}

impl Decoder {
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            core: RecurrentCore::new(config, &vb)?,
            out: candle_nn::linear(config.units, config.dec_vocab_size, vb.pp("out"))?,
        })
    }

    /// One decoder step.
    ///
    /// # Arguments
    /// * `tokens` - Previous output token per row, shape (batch,)
    /// * `state` - Current `(h, c)`
    ///
    /// # Returns
    /// Logits (batch, dec_vocab_size) and the updated state.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn step(&self, tokens: &Tensor, state: &LSTMState) -> Result<(Tensor, LSTMState)> {
        let next = self.core.step(tokens, state)?;
        let logits = self.out.forward(&next.h)?;
        Ok((logits, next))
    }
}

/// Decoder with additive attention over the encoder states.
pub struct AttentionDecoder {
    core: RecurrentCore,
    scorer: AdditiveAttention,
    /// Fuses `[context; h]` back to `units`
    combine: Linear,
    /// Output projection (units -> dec_vocab_size)
    out: Linear,
}

impl AttentionDecoder {
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let units = config.units;
        Ok(Self {
            core: RecurrentCore::new(config, &vb)?,
            scorer: AdditiveAttention::new(units, units, units, vb.pp("attention"))?,
            combine: candle_nn::linear(2 * units, units, vb.pp("combine"))?,
            out: candle_nn::linear(units, config.dec_vocab_size, vb.pp("out"))?,
        })
    }

    #[must_use]
    pub fn scorer(&self) -> &AdditiveAttention {
        &self.scorer
    }

    /// One decoder step.
    ///
    /// # Arguments
    /// * `tokens` - Previous output token per row, shape (batch,)
    /// * `state` - Current `(h, c)`
    /// * `encoded` - Encoder output with `projected_keys` filled in
    ///
    /// # Returns
    /// Logits (batch, dec_vocab_size), attention weights (batch, src_len) and the updated state.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn step(
        &self,
        tokens: &Tensor,
        state: &LSTMState,
        encoded: &EncoderOutput,
    ) -> Result<(Tensor, Tensor, LSTMState)> {
        let keys = encoded.projected_keys.as_ref().ok_or_else(|| {
            candle_core::Error::Msg("attention decoder needs projected encoder keys".into())
        })?;
        let next = self.core.step(tokens, state)?;
        let (context, weights) = self
            .scorer
            .forward(&next.h, keys, &encoded.states, &encoded.mask)?;
        let fused = Tensor::cat(&[&context, &next.h], D::Minus1)?;
        let fused = self.combine.forward(&fused)?.tanh()?;
        let logits = self.out.forward(&fused)?;
        Ok((logits, weights, next))
    }
}

/// Plain LSTM encoder-decoder.
pub struct Seq2Seq {
    encoder: Encoder,
    decoder: Decoder,
    device: Device,
}

impl Seq2Seq {
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            encoder: Encoder::new(config, vb.pp("encoder"))?,
            decoder: Decoder::new(config, vb.pp("decoder"))?,
            device: vb.device().clone(),
        })
    }

    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn encode(&self, input_ids: &Tensor) -> Result<EncoderOutput> {
        self.encoder.forward(input_ids)
    }

    /// Single-step decode for generation.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn step(&self, token: u32, state: &LSTMState) -> Result<(Tensor, LSTMState)> {
        let tokens = Tensor::new(&[token], &self.device)?;
        self.decoder.step(&tokens, state)
    }

    /// Teacher-forced logits (batch, tgt_len, dec_vocab_size).
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, input_ids: &Tensor, decoder_input: &Tensor) -> Result<Tensor> {
        let encoded = self.encode(input_ids)?;
        let init = summary(&encoded)?.clone();
        teacher_forced(decoder_input, init, |tokens, state| {
            self.decoder.step(tokens, state)
        })
    }
}

/// LSTM encoder-decoder with additive attention.
pub struct AttentionSeq2Seq {
    encoder: Encoder,
    decoder: AttentionDecoder,
    device: Device,
}

impl AttentionSeq2Seq {
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            encoder: Encoder::new(config, vb.pp("encoder"))?,
            decoder: AttentionDecoder::new(config, vb.pp("decoder"))?,
            device: vb.device().clone(),
        })
    }

    /// Encode and project the attention keys once.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn encode(&self, input_ids: &Tensor) -> Result<EncoderOutput> {
        let mut encoded = self.encoder.forward(input_ids)?;
        encoded.projected_keys = Some(self.decoder.scorer().project_keys(&encoded.states)?);
        Ok(encoded)
    }

    /// Single-step decode for generation; also returns the attention weights (batch, src_len).
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn step(
        &self,
        token: u32,
        state: &LSTMState,
        encoded: &EncoderOutput,
    ) -> Result<(Tensor, Tensor, LSTMState)> {
        let tokens = Tensor::new(&[token], &self.device)?;
        self.decoder.step(&tokens, state, encoded)
    }

    /// Teacher-forced logits (batch, tgt_len, dec_vocab_size).
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, input_ids: &Tensor, decoder_input: &Tensor) -> Result<Tensor> {
        let encoded = self.encode(input_ids)?;
        let init = summary(&encoded)?.clone();
        teacher_forced(decoder_input, init, |tokens, state| {
            let (logits, _, next) = self.decoder.step(tokens, state, &encoded)?;
            Ok((logits, next))
        })
    }
}

pub(crate) fn initial_state(encoded: &EncoderOutput) -> Result<LSTMState> {
    summary(encoded).cloned()
}
