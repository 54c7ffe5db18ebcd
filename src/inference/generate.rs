//! Greedy generation loop.
//!
//! Encodes one input sequence, then feeds the decoder its own previous prediction starting from
//! `<SOS>` until it emits `<EOS>` or `maxlen` tokens have been produced.

use candle_core::Tensor;
use log::debug;

use crate::error::{Error, Result};
use crate::model::{ModelConfig, Seq2SeqModel};

/// One generated sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    /// Emitted tokens, truncated after the first `<EOS>` (inclusive)
    pub tokens: Vec<u32>,
    /// Whether generation stopped on `<EOS>` rather than the length bound
    pub terminated_by_eos: bool,
}

impl Generated {
    /// Fixed-length copy of the output, truncated or right-padded with `pad_id`.
    #[must_use]
    pub fn to_padded(&self, len: usize, pad_id: u32) -> Vec<u32> {
        let mut out = self.tokens.clone();
        out.resize(len, pad_id);
        out
    }
}

/// Index of the largest finite value; the first one wins ties.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn argmax(values: &[f32]) -> u32 {
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate() {
        if v.is_finite() && v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    best_idx as u32
}

fn check_tokens(tokens: &[u32], min_len: usize, maxlen: usize, vocab_size: usize) -> Result<()> {
    if tokens.len() < min_len || tokens.len() > maxlen {
        return Err(Error::InvalidSequence {
            len: tokens.len(),
            maxlen,
        });
    }
    if let Some((position, &token)) = tokens
        .iter()
        .enumerate()
        .find(|&(_, &t)| usize::try_from(t).map_or(true, |t| t >= vocab_size))
    {
        return Err(Error::TokenOutOfRange {
            token,
            position,
            vocab_size,
        });
    }
    Ok(())
}

/// Check an input sequence against the model's length and vocabulary bounds.
///
/// # Errors
/// Returns [`Error::InvalidSequence`] for an empty or over-long sequence and
/// [`Error::TokenOutOfRange`] for the first token outside the encoder vocabulary.
pub fn validate_sequence(config: &ModelConfig, tokens: &[u32]) -> Result<()> {
    check_tokens(tokens, 1, config.maxlen, config.enc_vocab_size)
}

/// Check a decoder target (`<SOS> ... <EOS>`, padded) before teacher forcing.
///
/// A target needs at least two tokens: one decoder input and one label.
///
/// # Errors
/// Returns [`Error::InvalidSequence`] for a target shorter than 2 or longer than `maxlen` and
/// [`Error::TokenOutOfRange`] for the first token outside the decoder vocabulary.
pub fn validate_target(config: &ModelConfig, tokens: &[u32]) -> Result<()> {
    check_tokens(tokens, 2, config.maxlen, config.dec_vocab_size)
}

/// Generate one output sequence for `input` with greedy decoding.
///
/// # Arguments
/// * `model` - Trained or fresh model, borrowed for the whole call
/// * `input` - Encoder tokens, possibly right-padded, length `1..=maxlen`
///
/// # Returns
/// At most `maxlen` tokens; the last one is `<EOS>` iff `terminated_by_eos`.
///
/// # Errors
/// Returns an error if `input` fails validation or model inference fails.
pub fn generate(model: &Seq2SeqModel, input: &[u32]) -> Result<Generated> {
    let config = model.config();
    validate_sequence(config, input)?;
    let network = model.network();

    let ids = Tensor::new(input, model.device())?.unsqueeze(0)?;
    let encoded = network.encode(&ids)?;
    let mut state = network.initial_state(&encoded)?;

    let mut token = config.sos_token_id;
    let mut tokens = Vec::with_capacity(config.maxlen);
    while tokens.len() < config.maxlen {
        let (probs, next) = network.decode_step(token, &encoded, state)?;
        state = next;
        token = argmax(&probs.to_vec1::<f32>()?);
        tokens.push(token);
        if token == config.eos_token_id {
            debug!("generated {} tokens, stopped on <EOS>", tokens.len());
            return Ok(Generated {
                tokens,
                terminated_by_eos: true,
            });
        }
    }

    debug!("generated {} tokens, hit maxlen", tokens.len());
    Ok(Generated {
        tokens,
        terminated_by_eos: false,
    })
}

/// Generate for every input in order.
///
/// # Errors
/// Returns the first error any single generation returns.
pub fn generate_all<I>(model: &Seq2SeqModel, inputs: I) -> Result<Vec<Generated>>
where
    I: IntoIterator,
    I::Item: AsRef<[u32]>,
{
    inputs
        .into_iter()
        .map(|input| generate(model, input.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;
    use crate::model::Variant;

    #[test]
    fn test_argmax_first_index_wins_ties() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[f32::NAN, 0.2, 0.1]), 1);
    }

    #[test]
    fn test_to_padded() {
        let g = Generated {
            tokens: vec![10, 11, 2],
            terminated_by_eos: true,
        };
        assert_eq!(g.to_padded(5, 0), vec![10, 11, 2, 0, 0]);
        assert_eq!(g.to_padded(2, 0), vec![10, 11]);
    }

    #[test]
    fn test_validate_sequence() {
        let config = ModelConfig::tiny(Variant::Seq2Seq);
        assert!(validate_sequence(&config, &[10, 11]).is_ok());
        assert!(validate_target(&config, &[1, 10, 2]).is_ok());
        assert!(matches!(
            validate_target(&config, &[1]),
            Err(Error::InvalidSequence { len: 1, .. })
        ));
        assert!(matches!(
            validate_sequence(&config, &[]),
            Err(Error::InvalidSequence { len: 0, .. })
        ));
        assert!(matches!(
            validate_sequence(&config, &vec![10; config.maxlen + 1]),
            Err(Error::InvalidSequence { .. })
        ));
        assert!(matches!(
            validate_sequence(&config, &[10, 259, 11]),
            Err(Error::TokenOutOfRange {
                token: 259,
                position: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_generation_is_bounded_for_every_variant() {
        for variant in Variant::ALL {
            let model = Seq2SeqModel::fresh(ModelConfig::tiny(variant), &Device::Cpu).unwrap();
            let out = generate(&model, &[10, 11, 12, 0]).unwrap();
            assert!(!out.tokens.is_empty());
            assert!(out.tokens.len() <= model.config().maxlen);
            assert_eq!(
                out.terminated_by_eos,
                out.tokens.last() == Some(&model.config().eos_token_id)
            );
        }
    }

    #[test]
    fn test_generate_all_preserves_order() {
        let model = Seq2SeqModel::fresh(ModelConfig::tiny(Variant::Seq2Seq), &Device::Cpu).unwrap();
        let inputs = vec![vec![10u32, 11], vec![12u32, 13, 14]];
        let all = generate_all(&model, &inputs).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], generate(&model, &inputs[1]).unwrap());
    }
}
