//! Encoder-decoder transformer stack.
//!
//! Same external contract as the recurrent models (token sequence in, next-token logits out),
//! computed in parallel over positions. Single-step decoding re-runs the decoder over the
//! whole prefix and keeps the last position.

use candle_core::{Device, IndexOp, Result, Tensor};
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};

use super::EncoderOutput;
use super::attention::{create_causal_mask, key_padding_bias};
use super::config::ModelConfig;
use super::embedding::{PositionEmbedding, TokenEmbedding, embed};
use super::layers::{DecoderBlock, EncoderBlock, layer_norm};
use super::recurrent::padding_mask;

/// Transformer encoder-decoder.
pub struct TransformerSeq2Seq {
    src_embedding: TokenEmbedding,
    src_positions: PositionEmbedding,
    tgt_embedding: TokenEmbedding,
    tgt_positions: PositionEmbedding,
    encoder: Vec<EncoderBlock>,
    decoder: Vec<DecoderBlock>,
    /// Final encoder layer norm
    ln_enc: LayerNorm,
    /// Final decoder layer norm
    ln_dec: LayerNorm,
    /// Projects d_model -> dec_vocab_size
    lm_head: Linear,
    dropout: Dropout,
    pad_id: u32,
    device: Device,
}

impl TransformerSeq2Seq {
    /// Create a new transformer.
    ///
    /// # Errors
    /// Returns an error if weight creation fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let enc_vb = vb.pp("encoder");
        let dec_vb = vb.pp("decoder");

        let mut encoder = Vec::with_capacity(config.num_layers);
        let mut decoder = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            encoder.push(EncoderBlock::new(config, enc_vb.pp(format!("blocks.{i}")))?);
            decoder.push(DecoderBlock::new(config, dec_vb.pp(format!("blocks.{i}")))?);
        }

        Ok(Self {
            src_embedding: TokenEmbedding::new(
                config.enc_vocab_size,
                config,
                enc_vb.pp("token_embedding"),
            )?,
            src_positions: PositionEmbedding::new(config, enc_vb.pp("pos_embedding"))?,
            tgt_embedding: TokenEmbedding::new(
                config.dec_vocab_size,
                config,
                dec_vb.pp("token_embedding"),
            )?,
            tgt_positions: PositionEmbedding::new(config, dec_vb.pp("pos_embedding"))?,
            encoder,
            decoder,
            ln_enc: layer_norm(config, enc_vb.pp("ln_f"))?,
            ln_dec: layer_norm(config, dec_vb.pp("ln_f"))?,
            lm_head: candle_nn::linear(config.emb_dim, config.dec_vocab_size, vb.pp("lm_head"))?,
            dropout: Dropout::new(config.dropout),
            pad_id: config.pad_token_id,
            device: vb.device().clone(),
        })
    }

    /// Encode token IDs (batch, src_len) into the memory the decoder attends over.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn encode(&self, input_ids: &Tensor, train: bool) -> Result<EncoderOutput> {
        let mask = padding_mask(input_ids, self.pad_id)?;
        let bias = key_padding_bias(&mask)?;

        let mut x = embed(&self.src_embedding, &self.src_positions, input_ids)?;
        x = self.dropout.forward(&x, train)?;
        for block in &self.encoder {
            x = block.forward(&x, &bias, train)?;
        }
        let states = self.ln_enc.forward(&x)?;

        Ok(EncoderOutput {
            states,
            mask,
            summary: None,
            projected_keys: None,
        })
    }

    /// Decoder logits (batch, tgt_len, dec_vocab_size) for a full decoder input.
    ///
    /// Position `i` sees decoder inputs `0..=i` only.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn decode(
        &self,
        encoded: &EncoderOutput,
        decoder_input: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (_, t) = decoder_input.dims2()?;
        let causal = create_causal_mask(t, &self.device)?;
        let tgt_mask = padding_mask(decoder_input, self.pad_id)?;
        let self_bias = causal.broadcast_add(&key_padding_bias(&tgt_mask)?)?;
        let memory_bias = key_padding_bias(&encoded.mask)?;

        let mut x = embed(&self.tgt_embedding, &self.tgt_positions, decoder_input)?;
        x = self.dropout.forward(&x, train)?;
        for block in &self.decoder {
            x = block.forward(&x, &encoded.states, &self_bias, &memory_bias, train)?;
        }
        let x = self.ln_dec.forward(&x)?;
        self.lm_head.forward(&x)
    }

    /// Teacher-forced logits (batch, tgt_len, dec_vocab_size).
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, input_ids: &Tensor, decoder_input: &Tensor, train: bool) -> Result<Tensor> {
        let encoded = self.encode(input_ids, train)?;
        self.decode(&encoded, decoder_input, train)
    }

    /// Logits for the last position of `prefix`, shape (dec_vocab_size,).
    ///
    /// # Errors
    /// Returns an error if `prefix` is empty or tensor operations fail.
    pub fn step(&self, prefix: &[u32], encoded: &EncoderOutput) -> Result<Tensor> {
        if prefix.is_empty() {
            return Err(candle_core::Error::Msg("decoder prefix is empty".into()));
        }
        let ids = Tensor::new(prefix, &self.device)?.unsqueeze(0)?;
        let logits = self.decode(encoded, &ids, false)?;
        logits.i((0, prefix.len() - 1))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::DType;

    use super::*;
    use crate::model::config::Variant;

    fn build() -> (ModelConfig, TransformerSeq2Seq, candle_nn::VarMap) {
        let device = Device::Cpu;
        let config = ModelConfig::tiny(Variant::Transformer);
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = TransformerSeq2Seq::new(&config, vb).unwrap();
        (config, model, varmap)
    }

    #[test]
    fn test_forward_shapes_with_random_init() {
        let (config, model, _varmap) = build();
        let device = Device::Cpu;
        let input = Tensor::new(&[[10u32, 11, 12, 0], [13, 0, 0, 0]], &device).unwrap();
        let dec_in = Tensor::new(&[[1u32, 10, 11], [1, 13, 2]], &device).unwrap();
        let logits = model.forward(&input, &dec_in, false).unwrap();
        assert_eq!(logits.dims(), &[2, 3, config.dec_vocab_size]);
    }

    #[test]
    fn test_step_matches_teacher_forced_position() {
        let (_, model, _varmap) = build();
        let device = Device::Cpu;
        let input = Tensor::new(&[[10u32, 11, 12, 0]], &device).unwrap();
        let encoded = model.encode(&input, false).unwrap();

        let prefix = [1u32, 40, 41];
        let full = model
            .decode(&encoded, &Tensor::new(&[prefix], &device).unwrap(), false)
            .unwrap();
        let expected: Vec<f32> = full.i((0, 1)).unwrap().to_vec1().unwrap();
        let got: Vec<f32> = model.step(&prefix[..2], &encoded).unwrap().to_vec1().unwrap();
        for (a, b) in expected.iter().zip(&got) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_empty_prefix_is_error() {
        let (_, model, _varmap) = build();
        let input = Tensor::new(&[[10u32]], &Device::Cpu).unwrap();
        let encoded = model.encode(&input, false).unwrap();
        assert!(model.step(&[], &encoded).is_err());
    }
}
