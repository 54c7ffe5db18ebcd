//! Checkpoint save, load and rotation.
//!
//! A checkpoint is a set of files in `<model_root>/<variant dir>/<format>/`:
//! - `<stem>.safetensors` holding every parameter of the model
//! - `checkpoint`, a JSON marker naming the weights file and recording the [`ModelConfig`]
//!
//! Saving over an existing checkpoint first renames the whole set with a `_%Y%m%d-%H%M%S`
//! suffix, so older runs stay on disk. The rotated marker is rewritten to name the rotated
//! weights file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Device;
use log::{info, warn};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{ModelConfig, Seq2SeqModel, Variant};

/// File name of the checkpoint marker.
pub const MARKER_FILE: &str = "checkpoint";

/// Extension of the weights file.
pub const WEIGHTS_EXTENSION: &str = "safetensors";

/// Contents of the `checkpoint` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMarker {
    /// Weights file name, relative to the checkpoint directory
    pub weights: String,
    /// RFC 3339 save time
    pub saved_at: String,
    pub config: ModelConfig,
}

/// Well-known location of one variant's checkpoint for one file format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    dir: PathBuf,
    variant: Variant,
}

impl CheckpointPaths {
    #[must_use]
    pub fn new(model_root: &Path, variant: Variant, format: &str) -> Self {
        Self {
            dir: model_root.join(variant.checkpoint_dir()).join(format),
            variant,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.variant
    }

    #[must_use]
    pub fn marker(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    #[must_use]
    pub fn weights_file_name(&self) -> String {
        format!("{}.{WEIGHTS_EXTENSION}", self.variant.checkpoint_stem())
    }

    #[must_use]
    pub fn weights(&self) -> PathBuf {
        self.dir.join(self.weights_file_name())
    }

    /// Whether a checkpoint is present (its marker exists).
    #[must_use]
    pub fn exists(&self) -> bool {
        self.marker().is_file()
    }

    fn members(&self) -> [String; 2] {
        [MARKER_FILE.to_string(), self.weights_file_name()]
    }

    /// Rename the current checkpoint set out of the way.
    ///
    /// Returns the suffix used, or `None` when there was nothing to rotate.
    ///
    /// # Errors
    /// Returns an error if a rename fails; files already renamed are moved back first.
    pub fn rotate(&self) -> Result<Option<String>> {
        if !self.exists() {
            return Ok(None);
        }
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let suffix = self.free_suffix(&stamp);

        let mut renamed: Vec<(PathBuf, PathBuf)> = Vec::new();
        for name in self.members() {
            let from = self.dir.join(&name);
            if !from.exists() {
                warn!("checkpoint member {} is missing, not rotated", from.display());
                continue;
            }
            let to = self.dir.join(rotated_name(&name, &suffix));
            if let Err(e) = fs::rename(&from, &to) {
                for (orig, moved) in renamed.iter().rev() {
                    if let Err(undo) = fs::rename(moved, orig) {
                        warn!("could not restore {}: {undo}", orig.display());
                    }
                }
                return Err(e.into());
            }
            renamed.push((from, to));
        }

        let rotated_weights = rotated_name(&self.weights_file_name(), &suffix);
        if self.dir.join(&rotated_weights).is_file() {
            let rotated_marker = self.dir.join(rotated_name(MARKER_FILE, &suffix));
            if let Err(e) = repoint_marker(&rotated_marker, &rotated_weights) {
                warn!("could not update {}: {e}", rotated_marker.display());
            }
        }

        info!("rotated previous checkpoint in {} to suffix {suffix}", self.dir.display());
        Ok(Some(suffix))
    }

    /// `stamp`, or `stamp-1`, `stamp-2`, ... if an earlier rotation already took it.
    fn free_suffix(&self, stamp: &str) -> String {
        let taken = |suffix: &str| {
            self.members()
                .iter()
                .any(|name| self.dir.join(rotated_name(name, suffix)).exists())
        };
        if !taken(stamp) {
            return stamp.to_string();
        }
        (1usize..)
            .map(|n| format!("{stamp}-{n}"))
            .find(|s| !taken(s))
            .unwrap_or_else(|| stamp.to_string())
    }
}

/// `checkpoint` -> `checkpoint_<suffix>`, `a.safetensors` -> `a_<suffix>.safetensors`.
#[must_use]
pub fn rotated_name(name: &str, suffix: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{suffix}.{ext}"),
        _ => format!("{name}_{suffix}"),
    }
}

/// Point the marker at `path` to `weights`, leaving its other fields as they are.
fn repoint_marker(path: &Path, weights: &str) -> Result<()> {
    let raw = fs::read_to_string(path)?;
    let mut marker: CheckpointMarker =
        serde_json::from_str(&raw).map_err(|e| Error::corrupt(path, e))?;
    marker.weights = weights.to_string();
    fs::write(path, serde_json::to_string_pretty(&marker)?)?;
    Ok(())
}

/// Save `model` at `paths`, rotating any checkpoint already there.
///
/// # Errors
/// Returns an error if rotation, weight serialization or marker writing fails.
pub fn save(model: &Seq2SeqModel, paths: &CheckpointPaths) -> Result<()> {
    fs::create_dir_all(paths.dir())?;
    paths.rotate()?;

    let weights = paths.weights();
    model.varmap().save(&weights)?;

    let marker = CheckpointMarker {
        weights: paths.weights_file_name(),
        saved_at: chrono::Local::now().to_rfc3339(),
        config: model.config().clone(),
    };
    fs::write(paths.marker(), serde_json::to_string_pretty(&marker)?)?;
    info!("saved checkpoint {}", weights.display());
    Ok(())
}

/// Read and check the marker at `paths`.
///
/// # Errors
/// Returns [`Error::CheckpointMissing`] if there is no marker and [`Error::CheckpointCorrupt`]
/// if it cannot be parsed or describes another variant.
pub fn read_marker(paths: &CheckpointPaths) -> Result<CheckpointMarker> {
    let marker_path = paths.marker();
    if !marker_path.is_file() {
        return Err(Error::CheckpointMissing(marker_path));
    }
    let raw = fs::read_to_string(&marker_path)?;
    let marker: CheckpointMarker =
        serde_json::from_str(&raw).map_err(|e| Error::corrupt(&marker_path, e))?;
    marker
        .config
        .validate()
        .map_err(|e| Error::corrupt(&marker_path, e))?;
    if marker.config.variant != paths.variant() {
        return Err(Error::corrupt(
            &marker_path,
            format!(
                "marker describes a {} model, expected {}",
                marker.config.variant,
                paths.variant()
            ),
        ));
    }
    Ok(marker)
}

/// Rebuild the model recorded at `paths` and load its weights.
///
/// # Errors
/// Returns [`Error::CheckpointMissing`] if there is no marker and [`Error::CheckpointCorrupt`]
/// if the marker or weights cannot be used.
pub fn load(paths: &CheckpointPaths, device: &Device) -> Result<Seq2SeqModel> {
    let marker = read_marker(paths)?;
    let weights = paths.dir().join(&marker.weights);
    let data = fs::read(&weights).map_err(|e| Error::corrupt(&weights, e))?;
    let tensors = SafeTensors::deserialize(&data).map_err(|e| Error::corrupt(&weights, e))?;

    let mut model = Seq2SeqModel::fresh(marker.config, device)?;
    let stored: HashSet<&str> = tensors.names().into_iter().map(String::as_str).collect();
    let missing: Vec<String> = {
        let vars = model
            .varmap()
            .data()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        vars.keys()
            .filter(|name| !stored.contains(name.as_str()))
            .cloned()
            .collect()
    };
    if !missing.is_empty() {
        return Err(Error::corrupt(
            &weights,
            format!("missing tensors: {}", missing.join(", ")),
        ));
    }

    model
        .varmap_mut()
        .load(&weights)
        .map_err(|e| Error::corrupt(&weights, e))?;
    info!("loaded checkpoint {}", weights.display());
    Ok(model)
}
