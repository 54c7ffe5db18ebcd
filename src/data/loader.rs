//! Sample-file loading.
//!
//! Every regular file under the dataset directory becomes one (input, target) pair:
//! - input:  `bytes[..maxlen]` tokenized, right-padded to `maxlen`
//! - target: `<SOS> bytes[..maxlen-2] <EOS>` tokenized, right-padded to `maxlen`

use std::path::Path;

use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::tokenizer::ByteTokenizer;

/// Smallest `maxlen` that leaves room for `<SOS>`, one byte and `<EOS>`.
pub const MIN_MAXLEN: usize = 3;

/// One index-aligned training example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePair {
    pub input: Vec<u32>,
    pub target: Vec<u32>,
}

/// All pairs loaded from a dataset directory.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// One pair per non-empty sample, in path order
    pub pairs: Vec<SequencePair>,
    pub maxlen: usize,
}

impl Dataset {
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Build the padded (input, target) pair for one sample.
#[must_use]
pub fn make_pair(bytes: &[u8], maxlen: usize, tokenizer: ByteTokenizer) -> SequencePair {
    let input_len = bytes.len().min(maxlen);
    let input = tokenizer.pad_to(tokenizer.encode(&bytes[..input_len]), maxlen);

    let body_len = bytes.len().min(maxlen.saturating_sub(2));
    let mut target = Vec::with_capacity(maxlen);
    target.push(tokenizer.sos_id());
    target.extend(tokenizer.encode(&bytes[..body_len]));
    target.push(tokenizer.eos_id());
    let target = tokenizer.pad_to(target, maxlen);

    SequencePair { input, target }
}

/// Load every sample file under `dir`.
///
/// Files are visited in path order so repeated runs see the same dataset. Empty files are
/// skipped.
///
/// # Errors
/// Returns an error if `maxlen` is too small, a file cannot be read, or no usable file exists.
pub fn load_dataset(dir: &Path, maxlen: usize, tokenizer: ByteTokenizer) -> Result<Dataset> {
    if maxlen < MIN_MAXLEN {
        return Err(Error::InvalidConfig(format!(
            "maxlen must be at least {MIN_MAXLEN}, got {maxlen}"
        )));
    }
    if !dir.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("dataset directory not found: {}", dir.display()),
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        match entry {
            Ok(e) if e.file_type().is_file() => files.push(e.into_path()),
            Ok(_) => {}
            Err(err) => warn!("skipping unreadable entry: {err}"),
        }
    }

    let mut dataset = Dataset {
        maxlen,
        ..Dataset::default()
    };
    for path in files {
        let bytes = std::fs::read(&path)?;
        if bytes.is_empty() {
            warn!("skipping empty sample {}", path.display());
            continue;
        }
        debug!("loaded {} ({} bytes)", path.display(), bytes.len());
        dataset.pairs.push(make_pair(&bytes, maxlen, tokenizer));
    }

    if dataset.is_empty() {
        return Err(Error::EmptyDataset(dir.to_path_buf()));
    }
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{EOS_ID, PAD_ID, SOS_ID};

    #[test]
    fn test_make_pair_short_sample() {
        let tok = ByteTokenizer::new();
        let pair = make_pair(&[0x89, 0x50], 6, tok);
        assert_eq!(
            pair.input,
            vec![tok.encode_byte(0x89), tok.encode_byte(0x50), PAD_ID, PAD_ID, PAD_ID, PAD_ID]
        );
        assert_eq!(
            pair.target,
            vec![SOS_ID, tok.encode_byte(0x89), tok.encode_byte(0x50), EOS_ID, PAD_ID, PAD_ID]
        );
    }

    #[test]
    fn test_make_pair_truncates_long_sample() {
        let tok = ByteTokenizer::new();
        let bytes: Vec<u8> = (0..20).collect();
        let pair = make_pair(&bytes, 5, tok);
        assert_eq!(pair.input.len(), 5);
        assert_eq!(pair.target.len(), 5);
        assert_eq!(pair.input, tok.encode(&bytes[..5]));
        assert_eq!(pair.target[0], SOS_ID);
        assert_eq!(pair.target[4], EOS_ID);
        assert_eq!(&pair.target[1..4], tok.encode(&bytes[..3]).as_slice());
    }

    #[test]
    fn test_load_dataset_reads_sorted_and_skips_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), [1u8, 2, 3]).unwrap();
        std::fs::write(dir.path().join("a.png"), [9u8]).unwrap();
        std::fs::write(dir.path().join("empty.png"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.png"), [7u8; 10]).unwrap();

        let tok = ByteTokenizer::new();
        let ds = load_dataset(dir.path(), 8, tok).unwrap();
        assert_eq!(ds.len(), 3);
        let firsts: Vec<u32> = ds.pairs.iter().map(|p| p.input[0]).collect();
        assert_eq!(
            firsts,
            vec![tok.encode_byte(9), tok.encode_byte(1), tok.encode_byte(7)]
        );
        for pair in &ds.pairs {
            assert_eq!(pair.input.len(), 8);
            assert_eq!(pair.target.len(), 8);
        }
    }

    #[test]
    fn test_load_dataset_empty_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dataset(dir.path(), 8, ByteTokenizer::new()).unwrap_err();
        assert!(matches!(err, Error::EmptyDataset(_)));
    }

    #[test]
    fn test_load_dataset_rejects_tiny_maxlen() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), [1u8]).unwrap();
        let err = load_dataset(dir.path(), 2, ByteTokenizer::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
