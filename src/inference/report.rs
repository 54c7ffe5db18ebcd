//! Seed file writer.
//!
//! Every generated sequence becomes one `seed_NNNNN.bin` file holding its decoded bytes; a
//! `report.json` next to them summarizes the run.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::inference::generate::Generated;
use crate::tokenizer::ByteTokenizer;

/// Report file name inside the output directory.
pub const REPORT_FILE: &str = "report.json";

/// Per-seed summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub file: String,
    /// Tokens emitted, `<EOS>` included
    pub tokens: usize,
    /// Bytes written after dropping special tokens
    pub bytes: usize,
    pub terminated_by_eos: bool,
}

/// Contents of `report.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    /// RFC 3339 timestamp of the run
    pub created_at: String,
    pub seeds: Vec<SeedEntry>,
}

/// File name of the `index`-th seed.
#[must_use]
pub fn seed_file_name(index: usize) -> String {
    format!("seed_{index:05}.bin")
}

/// Write one seed file per generated sequence plus `report.json` under `dir`.
///
/// # Errors
/// Returns an error if the directory cannot be created or any file cannot be written.
pub fn write_seeds(dir: &Path, generated: &[Generated], tokenizer: ByteTokenizer) -> Result<SeedReport> {
    fs::create_dir_all(dir)?;

    let mut seeds = Vec::with_capacity(generated.len());
    for (i, g) in generated.iter().enumerate() {
        let file = seed_file_name(i);
        let bytes = tokenizer.decode(&g.tokens);
        fs::write(dir.join(&file), &bytes)?;
        seeds.push(SeedEntry {
            file,
            tokens: g.tokens.len(),
            bytes: bytes.len(),
            terminated_by_eos: g.terminated_by_eos,
        });
    }

    let report = SeedReport {
        created_at: chrono::Local::now().to_rfc3339(),
        seeds,
    };
    fs::write(dir.join(REPORT_FILE), serde_json::to_string_pretty(&report)?)?;
    info!("wrote {} seeds to {}", report.seeds.len(), dir.display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_seeds_and_report() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("seq2seq").join("PNG");
        let tok = ByteTokenizer::new();

        let generated = vec![
            Generated {
                tokens: vec![0x89 + 3, u32::from(b'P') + 3, 2],
                terminated_by_eos: true,
            },
            Generated {
                tokens: vec![1, 70, 0],
                terminated_by_eos: false,
            },
        ];
        let report = write_seeds(&dir, &generated, tok).unwrap();

        assert_eq!(fs::read(dir.join("seed_00000.bin")).unwrap(), vec![0x89, b'P']);
        assert_eq!(fs::read(dir.join("seed_00001.bin")).unwrap(), vec![67]);
        assert_eq!(report.seeds[0].tokens, 3);
        assert_eq!(report.seeds[0].bytes, 2);
        assert!(!report.seeds[1].terminated_by_eos);

        let on_disk: SeedReport =
            serde_json::from_str(&fs::read_to_string(dir.join(REPORT_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk, report);
    }

    #[test]
    fn test_seed_file_name() {
        assert_eq!(seed_file_name(7), "seed_00007.bin");
    }
}
