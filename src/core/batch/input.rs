//! JSON Lines input
//!
//! One [`EncounterRecord`] per line. Blank lines are ignored; the first
//! malformed line fails the whole read with its line number.

use crate::domain::{EncounterRecord, Result, WarehouseError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read encounter records from a JSON Lines file
///
/// # Errors
///
/// Returns an `Io` error if the file cannot be opened or read, or a
/// `Serialization` error naming the first line that does not parse.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<EncounterRecord>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| WarehouseError::Io(format!("cannot open {}: {e}", path.display())))?;
    let records = parse_records(BufReader::new(file))?;
    tracing::info!(path = %path.display(), records = records.len(), "Input records read");
    Ok(records)
}

/// Parse encounter records from any buffered reader
///
/// # Errors
///
/// See [`read_records`].
pub fn parse_records(reader: impl BufRead) -> Result<Vec<EncounterRecord>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: EncounterRecord = serde_json::from_str(&line).map_err(|e| {
            WarehouseError::Serialization(format!("line {}: {e}", index + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    const LINE: &str = r#"{"patient":{"patient_code":"PAT000000","sex":"F","date_of_birth":"1967-03-18"},"facility":{"code":"TEACHING_HOSPITAL","name":"Teaching Hospital"},"encounter":{"encounter_code":"ENC000000","encounter_at":"2024-05-02T09:30:00Z","procedures":[{"modality_code":"RF","projection_code":"PA","images":[{"image_code":"IMG000000","path":"images/IMG000000.png"}]}]}}"#;

    #[test]
    fn test_parse_skips_blank_lines() {
        let text = format!("{LINE}\n\n   \n{}\n", LINE.replace("ENC000000", "ENC000001"));
        let records = parse_records(Cursor::new(text)).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].patient.patient_code, "PAT000000");
        assert_eq!(records[1].encounter.encounter_code, "ENC000001");
        assert_eq!(records[0].encounter.procedures[0].images.len(), 1);
    }

    #[test]
    fn test_parse_reports_line_number() {
        let text = format!("{LINE}\n{{\"patient\": 1}}\n");
        let err = parse_records(Cursor::new(text)).unwrap_err();

        assert!(matches!(err, WarehouseError::Serialization(_)));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_read_records_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{LINE}").unwrap();
        file.flush().unwrap();

        let records = read_records(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_key(), "PAT000000/ENC000000");
    }

    #[test]
    fn test_read_records_missing_file() {
        let err = read_records("/nonexistent/records.jsonl").unwrap_err();
        assert!(matches!(err, WarehouseError::Io(_)));
    }
}
