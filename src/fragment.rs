//! Evidence fragments and the JSONL reader for them

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

/// Labels per fragment the upstream generator is expected to produce.
pub const MAX_CODES_PER_FRAGMENT: usize = 3;

/// A unit of source evidence.
///
/// `codes` carries labels generated out of process, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(alias = "id_fragmento")]
    pub id: String,
    #[serde(default, alias = "fragmento_original")]
    pub text: String,
    #[serde(default, alias = "codigos_abiertos")]
    pub codes: Vec<String>,
}

impl Fragment {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            codes: Vec::new(),
        }
    }

    /// Attach pre-generated labels.
    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }
}

/// Fragments read from a JSONL file plus the number of lines skipped.
#[derive(Debug, Default)]
pub struct FragmentBatch {
    pub fragments: Vec<Fragment>,
    pub skipped_lines: usize,
}

/// Read one fragment per line.
///
/// Blank lines are ignored. Lines that are not UTF-8, are not valid JSON, or
/// whose id is blank are skipped with a warning rather than failing the
/// whole file. Only I/O errors fail the read.
pub fn read_fragments_jsonl(path: impl AsRef<Path>) -> std::io::Result<FragmentBatch> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let mut batch = FragmentBatch::default();

    for (n, raw) in BufReader::new(file).split(b'\n').enumerate() {
        let raw = raw?;
        let line = match std::str::from_utf8(&raw) {
            Ok(line) => line,
            Err(e) => {
                warn!(file = %path.display(), line = n + 1, error = %e, "skipping non-UTF-8 line");
                batch.skipped_lines += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Fragment>(line) {
            Ok(fragment) if !fragment.id.trim().is_empty() => batch.fragments.push(fragment),
            Ok(_) => {
                warn!(file = %path.display(), line = n + 1, "skipping fragment without id");
                batch.skipped_lines += 1;
            }
            Err(e) => {
                warn!(file = %path.display(), line = n + 1, error = %e, "skipping malformed line");
                batch.skipped_lines += 1;
            }
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_both_key_styles() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "F1", "text": "a", "codes": ["x", "y"]}}"#).unwrap();
        writeln!(
            file,
            r#"{{"id_fragmento": "F2", "fragmento_original": "b", "codigos_abiertos": ["z"]}}"#
        )
        .unwrap();

        let batch = read_fragments_jsonl(file.path()).unwrap();
        assert_eq!(batch.skipped_lines, 0);
        assert_eq!(
            batch.fragments,
            vec![
                Fragment::new("F1", "a").with_codes(["x", "y"]),
                Fragment::new("F2", "b").with_codes(["z"]),
            ]
        );
    }

    #[test]
    fn skips_corrupt_and_idless_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "F1"}}"#).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id": "  ", "codes": ["x"]}}"#).unwrap();
        writeln!(file, r#"{{"text": "no id"}}"#).unwrap();
        writeln!(file, r#"{{"id": "F2", "codes": []}}"#).unwrap();

        let batch = read_fragments_jsonl(file.path()).unwrap();
        let ids: Vec<&str> = batch.fragments.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["F1", "F2"]);
        assert_eq!(batch.skipped_lines, 3);
        assert!(batch.fragments[0].codes.is_empty());
    }

    #[test]
    fn skips_line_with_invalid_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "F1", "codes": ["x"]}}"#).unwrap();
        file.write_all(b"{\"id\": \"F2\", \"text\": \"\xff\xfe\"}\n").unwrap();
        writeln!(file, r#"{{"id": "F3", "codes": ["y"]}}"#).unwrap();

        let batch = read_fragments_jsonl(file.path()).unwrap();
        let ids: Vec<&str> = batch.fragments.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["F1", "F3"]);
        assert_eq!(batch.skipped_lines, 1);
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"id\": \"F1\"}\r\n\r\n{\"id\": \"F2\"}").unwrap();

        let batch = read_fragments_jsonl(file.path()).unwrap();
        assert_eq!(batch.fragments.len(), 2);
        assert_eq!(batch.skipped_lines, 0);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_fragments_jsonl("/nonexistent/fragments.jsonl").is_err());
    }
}
