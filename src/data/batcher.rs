//! Train/held-out splitting and fixed-size batching.

use candle_core::{Device, Tensor};
use rand::Rng;
use rand::seq::SliceRandom;

use super::loader::SequencePair;
use crate::error::{Error, Result};

/// A batch of index-aligned sequences.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Encoder input, shape (batch, maxlen), `u32`
    pub input: Tensor,
    /// Decoder target including `<SOS>`/`<EOS>`, shape (batch, maxlen), `u32`
    pub target: Tensor,
    rows: usize,
}

impl Batch {
    /// Number of sequences in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Split pairs into (training, held-out).
///
/// The first `round(n * (1 - test_ratio))` pairs train; `test_ratio == 0.0` keeps everything for
/// training.
///
/// # Errors
/// Returns an error if `test_ratio` is outside `[0.0, 1.0)`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn split(
    mut pairs: Vec<SequencePair>,
    test_ratio: f32,
) -> Result<(Vec<SequencePair>, Vec<SequencePair>)> {
    if !(0.0..1.0).contains(&test_ratio) {
        return Err(Error::InvalidConfig(format!(
            "test_ratio must be in [0.0, 1.0), got {test_ratio}"
        )));
    }
    let n = pairs.len();
    let n_train = ((n as f32) * (1.0 - test_ratio)).round() as usize;
    let held_out = pairs.split_off(n_train.min(n));
    Ok((pairs, held_out))
}

/// Groups sequence pairs into tensors of at most `batch_size` rows.
#[derive(Debug, Clone)]
pub struct Batcher {
    batch_size: usize,
    device: Device,
}

impl Batcher {
    /// # Errors
    /// Returns an error if `batch_size` is zero.
    pub fn new(batch_size: usize, device: &Device) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        Ok(Self {
            batch_size,
            device: device.clone(),
        })
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batch `pairs` in order. The last batch may be smaller.
    ///
    /// # Errors
    /// Returns an error if sequences differ in length.
    pub fn batches(&self, pairs: &[SequencePair]) -> Result<Vec<Batch>> {
        let refs: Vec<&SequencePair> = pairs.iter().collect();
        self.collate(&refs)
    }

    /// Batch `pairs` after shuffling their order once.
    ///
    /// # Errors
    /// Returns an error if sequences differ in length.
    pub fn shuffled_batches<R: Rng + ?Sized>(
        &self,
        pairs: &[SequencePair],
        rng: &mut R,
    ) -> Result<Vec<Batch>> {
        let mut refs: Vec<&SequencePair> = pairs.iter().collect();
        refs.shuffle(rng);
        self.collate(&refs)
    }

    fn collate(&self, pairs: &[&SequencePair]) -> Result<Vec<Batch>> {
        let Some(first) = pairs.first() else {
            return Ok(Vec::new());
        };
        let seq_len = first.input.len();

        let mut out = Vec::with_capacity(pairs.len().div_ceil(self.batch_size));
        for chunk in pairs.chunks(self.batch_size) {
            let mut inputs = Vec::with_capacity(chunk.len() * seq_len);
            let mut targets = Vec::with_capacity(chunk.len() * seq_len);
            for pair in chunk {
                for seq in [&pair.input, &pair.target] {
                    if seq.len() != seq_len {
                        return Err(Error::InvalidSequence {
                            len: seq.len(),
                            maxlen: seq_len,
                        });
                    }
                }
                inputs.extend_from_slice(&pair.input);
                targets.extend_from_slice(&pair.target);
            }
            out.push(Batch {
                input: Tensor::from_vec(inputs, (chunk.len(), seq_len), &self.device)?,
                target: Tensor::from_vec(targets, (chunk.len(), seq_len), &self.device)?,
                rows: chunk.len(),
            });
        }
        Ok(out)
    }
}
