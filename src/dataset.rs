//! Historical dataset loader (JSON Lines).
//!
//! One `SensorReading` object per line, optionally carrying the
//! `Irrigation` / `Fertilization` / `Energy` ground-truth labels. Blank lines
//! are ignored; lines that are not a JSON object are counted and skipped so a
//! few corrupt rows do not block startup.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::models::SensorReading;
use crate::source::parse_reading;

// ---

#[derive(Debug, Default)]
pub struct Dataset {
    pub readings: Vec<SensorReading>,
    pub total_lines: usize,
    pub skipped_lines: usize,
}

/// Load every reading from a JSON Lines file.
pub fn load_jsonl(path: &Path) -> Result<Dataset> {
    // ---
    let file = File::open(path)
        .with_context(|| format!("Failed to open dataset {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut dataset = Dataset::default();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("Failed to read line {} of {}", line_num + 1, path.display())
        })?;
        if line.trim().is_empty() {
            continue;
        }
        dataset.total_lines += 1;

        match parse_reading(&line) {
            Some(reading) => dataset.readings.push(reading),
            None => {
                debug!(line = line_num + 1, "Skipping unparsable dataset line");
                dataset.skipped_lines += 1;
            }
        }
    }

    info!(
        path = %path.display(),
        readings = dataset.readings.len(),
        skipped = dataset.skipped_lines,
        "Dataset loaded"
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_skips_blank_and_corrupt_lines() {
        // ---
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"Soil_moisture_pct": 25, "Irrigation": "SI"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, "[1, 2]").unwrap();
        writeln!(file, r#"{{"Soil_moisture_pct": 70, "Irrigation": "NO"}}"#).unwrap();

        let dataset = load_jsonl(file.path()).unwrap();
        assert_eq!(dataset.total_lines, 4);
        assert_eq!(dataset.skipped_lines, 2);
        assert_eq!(dataset.readings.len(), 2);
        assert_eq!(dataset.readings[1].soil_moisture_pct, Some(70.0));
    }

    #[test]
    fn test_lines_parse_like_live_payloads() {
        // ---
        let payload = r#"{"Soil_moisture_pct": "12,5", "Temperature_C": 31}"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{payload}").unwrap();
        writeln!(file, "42").unwrap();

        let dataset = load_jsonl(file.path()).unwrap();
        assert_eq!(dataset.skipped_lines, 1);
        assert_eq!(Some(&dataset.readings[0]), parse_reading(payload).as_ref());
        assert_eq!(dataset.readings[0].soil_moisture_pct, Some(12.5));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        // ---
        let err = load_jsonl(Path::new("/definitely/not/here.jsonl")).unwrap_err();
        assert!(err.to_string().contains("Failed to open dataset"));
    }
}
