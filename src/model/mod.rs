//! Sequence models.
//!
//! Three interchangeable encoder-decoder networks behind one [`SequenceModel`] enum:
//! a plain LSTM pair, an LSTM pair with additive attention, and a transformer.

pub mod attention;
pub mod config;
pub mod embedding;
pub mod layers;
pub mod recurrent;
pub mod seq2seq;
pub mod transformer;

use candle_core::{D, DType, Device, IndexOp, Result, Tensor};
use candle_nn::rnn::LSTMState;
use candle_nn::{VarBuilder, VarMap};

pub use attention::{AdditiveAttention, MASK_VALUE, MultiHeadAttention, create_causal_mask};
pub use config::{ModelConfig, Variant};
pub use seq2seq::{AttentionSeq2Seq, Seq2Seq};
pub use transformer::TransformerSeq2Seq;

/// What the encoder hands to the decoder.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Per-position representations (batch, src_len, hidden)
    pub states: Tensor,
    /// Real-token mask (batch, src_len), 0.0 at PAD
    pub mask: Tensor,
    /// Final `(h, c)` of the recurrent encoder; `None` for the transformer
    pub summary: Option<LSTMState>,
    /// Attention keys projected once per encoded sequence (attention variant only)
    pub projected_keys: Option<Tensor>,
}

/// Decoder state threaded through generation, moved from one step to the next.
#[derive(Debug, Clone)]
pub enum DecoderState {
    /// LSTM `(h, c)` of the recurrent decoders
    Recurrent(LSTMState),
    /// Tokens fed to the transformer decoder so far
    Prefix(Vec<u32>),
}

/// One of the three network variants, all sharing the same encode / step / forward contract.
pub enum SequenceModel {
    Plain(Seq2Seq),
    Attention(AttentionSeq2Seq),
    Transformer(TransformerSeq2Seq),
}

fn state_mismatch(variant: Variant) -> candle_core::Error {
    candle_core::Error::Msg(format!("decoder state does not belong to the {variant} model"))
}

impl SequenceModel {
    /// Build the network selected by `config.variant` on top of `vb`.
    ///
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(match config.variant {
            Variant::Seq2Seq => Self::Plain(Seq2Seq::new(config, vb)?),
            Variant::Attention => Self::Attention(AttentionSeq2Seq::new(config, vb)?),
            Variant::Transformer => Self::Transformer(TransformerSeq2Seq::new(config, vb)?),
        })
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        match self {
            Self::Plain(_) => Variant::Seq2Seq,
            Self::Attention(_) => Variant::Attention,
            Self::Transformer(_) => Variant::Transformer,
        }
    }

    /// Encode one batch of padded token IDs (batch, src_len).
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn encode(&self, input_ids: &Tensor) -> Result<EncoderOutput> {
        match self {
            Self::Plain(m) => m.encode(input_ids),
            Self::Attention(m) => m.encode(input_ids),
            Self::Transformer(m) => m.encode(input_ids, false),
        }
    }

    /// Decoder state before the first step.
    ///
    /// # Errors
    /// Returns an error if the encoder output lacks what this variant needs.
    pub fn initial_state(&self, encoded: &EncoderOutput) -> Result<DecoderState> {
        match self {
            Self::Plain(_) | Self::Attention(_) => {
                Ok(DecoderState::Recurrent(seq2seq::initial_state(encoded)?))
            }
            Self::Transformer(_) => Ok(DecoderState::Prefix(Vec::new())),
        }
    }

    /// Feed `token` and return the next-token distribution (dec_vocab_size,) with the new state.
    ///
    /// # Errors
    /// Returns an error if `state` belongs to another variant or tensor operations fail.
    pub fn decode_step(
        &self,
        token: u32,
        encoded: &EncoderOutput,
        state: DecoderState,
    ) -> Result<(Tensor, DecoderState)> {
        let (logits, next) = match (self, state) {
            (Self::Plain(m), DecoderState::Recurrent(s)) => {
                let (logits, next) = m.step(token, &s)?;
                (logits.squeeze(0)?, DecoderState::Recurrent(next))
            }
            (Self::Attention(m), DecoderState::Recurrent(s)) => {
                let (logits, _, next) = m.step(token, &s, encoded)?;
                (logits.squeeze(0)?, DecoderState::Recurrent(next))
            }
            (Self::Transformer(m), DecoderState::Prefix(mut prefix)) => {
                prefix.push(token);
                (m.step(&prefix, encoded)?, DecoderState::Prefix(prefix))
            }
            (model, _) => return Err(state_mismatch(model.variant())),
        };
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        Ok((probs, next))
    }

    /// Attention weights (src_len,) the attention decoder assigns when fed `token`.
    ///
    /// `None` for the variants without an additive scorer.
    ///
    /// # Errors
    /// Returns an error if `state` belongs to another variant or tensor operations fail.
    pub fn attention_weights(
        &self,
        token: u32,
        encoded: &EncoderOutput,
        state: &DecoderState,
    ) -> Result<Option<Tensor>> {
        match (self, state) {
            (Self::Attention(m), DecoderState::Recurrent(s)) => {
                let (_, weights, _) = m.step(token, s, encoded)?;
                Ok(Some(weights.i(0)?))
            }
            (Self::Attention(_), DecoderState::Prefix(_)) => {
                Err(state_mismatch(Variant::Attention))
            }
            _ => Ok(None),
        }
    }

    /// Teacher-forced logits (batch, tgt_len, dec_vocab_size).
    ///
    /// `train` enables dropout where the variant has any.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, input_ids: &Tensor, decoder_input: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Plain(m) => m.forward(input_ids, decoder_input),
            Self::Attention(m) => m.forward(input_ids, decoder_input),
            Self::Transformer(m) => m.forward(input_ids, decoder_input, train),
        }
    }
}

/// Learned parameters together with the network built on them.
pub struct Seq2SeqModel {
    config: ModelConfig,
    varmap: VarMap,
    network: SequenceModel,
    device: Device,
}

impl std::fmt::Debug for Seq2SeqModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seq2SeqModel")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl Seq2SeqModel {
    /// Randomly initialized model for `config`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidConfig`] if the config is inconsistent, or a tensor error
    /// if weight creation fails.
    pub fn fresh(config: ModelConfig, device: &Device) -> crate::Result<Self> {
        config
            .validate()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let network = SequenceModel::new(&config, vb)?;
        Ok(Self {
            config,
            varmap,
            network,
            device: device.clone(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    #[must_use]
    pub fn network(&self) -> &SequenceModel {
        &self.network
    }

    #[must_use]
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub(crate) fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }
}
