//! Teacher-forced training with early stopping.
//!
//! Each epoch walks a freshly shuffled set of batches, takes one AdamW step per batch, then
//! scores the held-out split (if any). Training stops once the monitored loss has failed to
//! improve for `patience` consecutive epochs.

use candle_core::{D, DType, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::data::{Batch, Batcher, SequencePair};
use crate::error::{Error, Result};
use crate::inference::{validate_sequence, validate_target};
use crate::model::{ModelConfig, Seq2SeqModel};

/// Optimizer and schedule settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    /// Epochs without improvement tolerated before stopping
    pub patience: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seeds the per-epoch shuffle
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 2,
            patience: 10,
            batch_size: 8,
            learning_rate: 1e-3,
            seed: 0,
        }
    }
}

/// Losses recorded for one epoch (1-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub held_out_loss: Option<f32>,
}

impl EpochStats {
    /// Loss used for early stopping: held-out when available, training otherwise.
    #[must_use]
    pub fn monitored(&self) -> f32 {
        self.held_out_loss.unwrap_or(self.train_loss)
    }
}

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub history: Vec<EpochStats>,
    /// Epoch with the lowest monitored loss
    pub best_epoch: usize,
    pub best_loss: f32,
    /// True if patience ran out before `epochs`
    pub stopped_early: bool,
}

/// Mean cross-entropy over non-PAD labels.
///
/// # Arguments
/// * `logits` - (batch, seq_len, vocab)
/// * `labels` - (batch, seq_len), `u32`
/// * `pad_id` - Label value excluded from the mean
///
/// # Errors
/// Returns an error if shapes disagree or tensor operations fail.
pub fn masked_loss(logits: &Tensor, labels: &Tensor, pad_id: u32) -> candle_core::Result<Tensor> {
    let labels = labels.contiguous()?;
    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    let picked = log_probs
        .gather(&labels.unsqueeze(D::Minus1)?, D::Minus1)?
        .squeeze(D::Minus1)?;
    let mask = labels.ne(pad_id)?.to_dtype(DType::F32)?;
    let total = (picked * &mask)?.sum_all()?.neg()?;
    let count = mask.sum_all()?.maximum(1.0)?;
    total / count
}

fn validate_pairs(config: &ModelConfig, pairs: &[SequencePair]) -> Result<()> {
    for pair in pairs {
        validate_sequence(config, &pair.input)?;
        validate_target(config, &pair.target)?;
    }
    Ok(())
}

/// Drives training for one model.
pub struct Trainer<'a> {
    model: &'a mut Seq2SeqModel,
    optimizer: AdamW,
    batcher: Batcher,
    config: TrainConfig,
    rng: StdRng,
}

impl<'a> Trainer<'a> {
    /// # Errors
    /// Returns an error if the batch size is zero or the optimizer cannot be built.
    pub fn new(model: &'a mut Seq2SeqModel, config: TrainConfig) -> Result<Self> {
        let batcher = Batcher::new(config.batch_size, model.device())?;
        let params = ParamsAdamW {
            lr: config.learning_rate,
            ..ParamsAdamW::default()
        };
        let optimizer = AdamW::new(model.varmap().all_vars(), params)?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            model,
            optimizer,
            batcher,
            config,
            rng,
        })
    }

    fn batch_loss(&self, batch: &Batch, train: bool) -> candle_core::Result<Tensor> {
        let (_, len) = batch.target.dims2()?;
        let decoder_input = batch.target.narrow(1, 0, len - 1)?.contiguous()?;
        let labels = batch.target.narrow(1, 1, len - 1)?;
        let logits = self
            .model
            .network()
            .forward(&batch.input, &decoder_input, train)?;
        masked_loss(&logits, &labels, self.model.config().pad_token_id)
    }

    /// One optimizer step on `batch`; returns the loss before the update.
    ///
    /// # Errors
    /// Returns an error if the forward or backward pass fails.
    pub fn train_step(&mut self, batch: &Batch) -> Result<f32> {
        let loss = self.batch_loss(batch, true)?;
        self.optimizer.backward_step(&loss)?;
        Ok(loss.to_scalar::<f32>()?)
    }

    /// Mean loss over `pairs` without updating parameters.
    ///
    /// # Errors
    /// Returns an error if the forward pass fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(&self, pairs: &[SequencePair]) -> Result<f32> {
        let batches = self.batcher.batches(pairs)?;
        let mut sum = 0.0f32;
        for batch in &batches {
            sum += self.batch_loss(batch, false)?.to_scalar::<f32>()?;
        }
        Ok(sum / batches.len().max(1) as f32)
    }

    /// Train on `train`, monitoring `held_out` when it is non-empty.
    ///
    /// # Errors
    /// Returns an error if `train` is empty, a pair falls outside the model's length or
    /// vocabulary bounds, the sequences are ragged, or a step fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(&mut self, train: &[SequencePair], held_out: &[SequencePair]) -> Result<TrainReport> {
        if train.is_empty() {
            return Err(Error::InvalidConfig("no training pairs".into()));
        }
        validate_pairs(self.model.config(), train)?;
        validate_pairs(self.model.config(), held_out)?;
        info!(
            "training {} on {} pairs ({} held out), {} epochs, patience {}",
            self.model.config().variant,
            train.len(),
            held_out.len(),
            self.config.epochs,
            self.config.patience
        );

        let mut history = Vec::with_capacity(self.config.epochs);
        let mut best: Option<(usize, f32)> = None;
        let mut stale = 0usize;
        let mut stopped_early = false;

        for epoch in 1..=self.config.epochs {
            let batches = self.batcher.shuffled_batches(train, &mut self.rng)?;
            let mut sum = 0.0f32;
            for (i, batch) in batches.iter().enumerate() {
                let loss = self.train_step(batch)?;
                debug!("epoch {epoch} batch {}/{}: loss {loss:.4}", i + 1, batches.len());
                sum += loss;
            }
            let train_loss = sum / batches.len() as f32;
            let held_out_loss = if held_out.is_empty() {
                None
            } else {
                Some(self.evaluate(held_out)?)
            };
            let stats = EpochStats {
                epoch,
                train_loss,
                held_out_loss,
            };
            match held_out_loss {
                Some(h) => info!("epoch {epoch}: loss {train_loss:.4}, held-out loss {h:.4}"),
                None => info!("epoch {epoch}: loss {train_loss:.4}"),
            }

            let monitored = stats.monitored();
            history.push(stats);
            if best.is_none_or(|(_, b)| monitored < b) {
                best = Some((epoch, monitored));
                stale = 0;
            } else {
                stale += 1;
                if stale >= self.config.patience && epoch < self.config.epochs {
                    info!("no improvement for {stale} epochs, stopping");
                    stopped_early = true;
                    break;
                }
            }
        }

        let (best_epoch, best_loss) = best.unwrap_or((0, f32::INFINITY));
        Ok(TrainReport {
            history,
            best_epoch,
            best_loss,
            stopped_early,
        })
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;
    use crate::data::make_pair;
    use crate::model::{ModelConfig, Variant};
    use crate::tokenizer::ByteTokenizer;

    fn samples(config: &ModelConfig) -> Vec<SequencePair> {
        let tok = ByteTokenizer::new();
        [&b"\x89PNG"[..], b"GIF8", b"RIFF", b"\xff\xd8\xff"]
            .iter()
            .map(|b| make_pair(b, config.maxlen, tok))
            .collect()
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_masked_loss_uniform_logits() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((1, 3, 5), DType::F32, &device).unwrap();
        let labels = Tensor::new(&[[3u32, 4, 0]], &device).unwrap();
        let loss: f32 = masked_loss(&logits, &labels, 0).unwrap().to_scalar().unwrap();
        assert!((loss - (5.0f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn test_masked_loss_ignores_pad_positions() {
        let device = Device::Cpu;
        let labels = Tensor::new(&[[3u32, 0]], &device).unwrap();
        let a = Tensor::new(&[[[0.0f32, 0.0, 0.0, 2.0], [0.0, 0.0, 0.0, 0.0]]], &device).unwrap();
        let b = Tensor::new(&[[[0.0f32, 0.0, 0.0, 2.0], [9.0, -3.0, 4.0, 1.0]]], &device).unwrap();
        let la: f32 = masked_loss(&a, &labels, 0).unwrap().to_scalar().unwrap();
        let lb: f32 = masked_loss(&b, &labels, 0).unwrap().to_scalar().unwrap();
        assert!((la - lb).abs() < 1e-6);
    }

    #[test]
    fn test_masked_loss_all_pad_is_zero() {
        let device = Device::Cpu;
        let logits = Tensor::ones((1, 2, 4), DType::F32, &device).unwrap();
        let labels = Tensor::zeros((1, 2), DType::U32, &device).unwrap();
        let loss: f32 = masked_loss(&logits, &labels, 0).unwrap().to_scalar().unwrap();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_loss_decreases_on_repeated_batch() {
        for variant in Variant::ALL {
            let config = ModelConfig {
                dropout: 0.0,
                ..ModelConfig::tiny(variant)
            };
            let pairs = samples(&config);
            let mut model = Seq2SeqModel::fresh(config, &Device::Cpu).unwrap();
            let mut trainer = Trainer::new(
                &mut model,
                TrainConfig {
                    learning_rate: 1e-2,
                    batch_size: 4,
                    ..TrainConfig::default()
                },
            )
            .unwrap();
            let batch = trainer.batcher.batches(&pairs).unwrap().remove(0);
            let first = trainer.train_step(&batch).unwrap();
            let mut last = first;
            for _ in 0..30 {
                last = trainer.train_step(&batch).unwrap();
            }
            assert!(last < first, "{variant}: {first} -> {last}");
        }
    }

    #[test]
    fn test_early_stopping_honors_patience() {
        let config = ModelConfig::tiny(Variant::Seq2Seq);
        let pairs = samples(&config);
        let mut model = Seq2SeqModel::fresh(config, &Device::Cpu).unwrap();
        // A zero learning rate leaves the held-out loss flat after the first epoch.
        let mut trainer = Trainer::new(
            &mut model,
            TrainConfig {
                epochs: 10,
                patience: 2,
                batch_size: 2,
                learning_rate: 0.0,
                seed: 1,
            },
        )
        .unwrap();
        let report = trainer.fit(&pairs[..3], &pairs[3..]).unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.history.len(), 3);
        assert_eq!(report.best_epoch, 1);
    }

    #[test]
    fn test_fit_runs_all_epochs_while_improving() {
        let config = ModelConfig::tiny(Variant::Attention);
        let pairs = samples(&config);
        let mut model = Seq2SeqModel::fresh(config, &Device::Cpu).unwrap();
        let mut trainer = Trainer::new(
            &mut model,
            TrainConfig {
                epochs: 3,
                patience: 10,
                batch_size: 4,
                learning_rate: 1e-2,
                seed: 0,
            },
        )
        .unwrap();
        let report = trainer.fit(&pairs, &[]).unwrap();
        assert!(!report.stopped_early);
        assert_eq!(report.history.len(), 3);
        assert!(report.history.iter().all(|s| s.held_out_loss.is_none()));
    }

    #[test]
    fn test_fit_rejects_out_of_range_pairs() {
        for variant in Variant::ALL {
            let config = ModelConfig::tiny(variant);
            let maxlen = config.maxlen;
            let good = samples(&config);
            let mut model = Seq2SeqModel::fresh(config, &Device::Cpu).unwrap();
            let mut trainer = Trainer::new(&mut model, TrainConfig::default()).unwrap();

            let mut bad_token = good.clone();
            bad_token[1].input[2] = 300;
            assert!(matches!(
                trainer.fit(&bad_token, &[]),
                Err(Error::TokenOutOfRange {
                    token: 300,
                    position: 2,
                    ..
                })
            ));

            let mut bad_target = good.clone();
            bad_target[0].target[1] = 259;
            assert!(matches!(
                trainer.fit(&good, &bad_target),
                Err(Error::TokenOutOfRange { token: 259, .. })
            ));

            let long = vec![
                SequencePair {
                    input: vec![10; 20],
                    target: vec![11; 20],
                };
                2
            ];
            assert!(matches!(
                trainer.fit(&long, &[]),
                Err(Error::InvalidSequence { len: 20, maxlen: m }) if m == maxlen
            ));
        }
    }

    #[test]
    fn test_fit_rejects_empty_training_set() {
        let mut model =
            Seq2SeqModel::fresh(ModelConfig::tiny(Variant::Seq2Seq), &Device::Cpu).unwrap();
        let mut trainer = Trainer::new(&mut model, TrainConfig::default()).unwrap();
        assert!(trainer.fit(&[], &[]).is_err());
    }
}
