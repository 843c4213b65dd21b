//! Patient records held by one provider.
//!
//! Records never leave the provider process; only aggregates over them are served.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Conditions the synthetic generator draws from.
pub const CONDITIONS: [&str; 5] = ["diabetes", "hypertension", "asthma", "influenza", "migraine"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unable to read dataset: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid dataset: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub condition: String,
    pub age: u8,
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<PatientRecord>,
}

/// Generate one synthetic record.
fn gen_record(rng: &mut ChaCha20Rng) -> PatientRecord {
    let condition = CONDITIONS[(rng.next_u32() as usize) % CONDITIONS.len()];
    let age = (rng.next_u32() % 91) as u8; // [0, 90]

    PatientRecord {
        condition: condition.to_string(),
        age,
    }
}

/// Derive a deterministic RNG seed for a provider's synthetic records.
fn dataset_seed(seed: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[0..8].copy_from_slice(&0x505249565f414747u64.to_le_bytes()); // "PRIV_AGG"
    out[8..16].copy_from_slice(&seed.to_le_bytes());
    out[16..].copy_from_slice(&[7u8; 16]);
    out
}

impl Dataset {
    pub fn new(records: Vec<PatientRecord>) -> Self {
        Self { records }
    }

    /// Load a JSON array of `{"condition", "age"}` objects.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let raw = fs::read_to_string(path)?;
        Ok(Self::new(serde_json::from_str(&raw)?))
    }

    /// Reproducible synthetic records; the same seed always yields the same dataset.
    pub fn synthetic(seed: u64, size: usize) -> Self {
        let mut rng = ChaCha20Rng::from_seed(dataset_seed(seed));
        Self::new((0..size).map(|_| gen_record(&mut rng)).collect())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(sum of ages, number of records)` for `condition`, matched case-insensitively.
    pub fn sum_and_count(&self, condition: &str) -> (u64, u64) {
        let condition = condition.trim();
        self.records
            .iter()
            .filter(|r| r.condition.eq_ignore_ascii_case(condition))
            .fold((0, 0), |(sum, count), r| (sum + u64::from(r.age), count + 1))
    }

    pub fn average_age(&self, condition: &str) -> Option<f64> {
        match self.sum_and_count(condition) {
            (_, 0) => None,
            (sum, count) => Some(sum as f64 / count as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(condition: &str, age: u8) -> PatientRecord {
        PatientRecord {
            condition: condition.to_string(),
            age,
        }
    }

    #[test]
    fn aggregates_match_condition_case_insensitively() {
        let ds = Dataset::new(vec![record("Diabetes", 40), record("diabetes", 50), record("asthma", 9)]);

        assert_eq!(ds.sum_and_count("DIABETES"), (90, 2));
        assert_eq!(ds.average_age("diabetes"), Some(45.0));
        assert_eq!(ds.average_age("gout"), None);
        assert_eq!(ds.sum_and_count("gout"), (0, 0));
    }

    #[test]
    fn synthetic_data_is_reproducible() {
        let a = Dataset::synthetic(1, 500);
        let b = Dataset::synthetic(1, 500);
        let c = Dataset::synthetic(2, 500);

        assert_eq!(a.records, b.records);
        assert_ne!(a.records, c.records);
        assert_eq!(a.len(), 500);
        assert!(a.records.iter().all(|r| r.age <= 90 && CONDITIONS.contains(&r.condition.as_str())));
    }

    #[test]
    fn loads_json_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"condition": "flu", "age": 30}}, {{"condition": "flu", "age": 34}}]"#).unwrap();

        let ds = Dataset::load(file.path()).unwrap();
        assert_eq!(ds.average_age("flu"), Some(32.0));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "not json").unwrap();
        assert!(matches!(Dataset::load(bad.path()), Err(DatasetError::Parse(_))));
    }
}
