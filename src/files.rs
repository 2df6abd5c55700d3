//! Uploaded-file text extraction.
//!
//! Turns `.txt`, `.md`, `.json` and `.csv` uploads into plain text suitable
//! for the Process buffer.

use std::path::Path;

/// Largest upload accepted before download, in bytes.
pub const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Extracted text is capped at this many bytes.
pub const MAX_EXTRACTED_BYTES: usize = 100_000;

const TRUNCATION_NOTICE: &str = "\n\n[Content truncated to 100 KB]";

const JSON_TEXT_KEYS: &[&str] = &["content", "text", "message", "body", "value"];

/// Why a file could not be turned into text.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Unsupported file format: {suffix}. Supported: .txt / .md / .json / .csv")]
    Unsupported { suffix: String },

    #[error("File exceeds the 20 MB limit ({size} bytes)")]
    TooLarge { size: u64 },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reject oversized uploads before downloading them.
pub fn check_size(size: u64) -> Result<(), ExtractError> {
    if size > MAX_UPLOAD_BYTES {
        return Err(ExtractError::TooLarge { size });
    }
    Ok(())
}

/// Extract plain text from an uploaded file, dispatching on its suffix.
pub fn extract_text(data: &[u8], file_name: &str) -> Result<String, ExtractError> {
    let suffix = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();

    let text = match suffix.as_str() {
        ".txt" | ".md" => decode(data),
        ".json" => extract_json(data)?,
        ".csv" => extract_csv(data),
        _ => return Err(ExtractError::Unsupported { suffix }),
    };

    Ok(truncate(text))
}

/// UTF-8 (BOM stripped) with a Latin-1 fallback. Latin-1 maps every byte,
/// so decoding never fails.
fn decode(data: &[u8]) -> String {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    match std::str::from_utf8(data) {
        Ok(s) => s.to_string(),
        Err(_) => data.iter().map(|&b| b as char).collect(),
    }
}

fn extract_json(data: &[u8]) -> Result<String, ExtractError> {
    let value: serde_json::Value = serde_json::from_str(&decode(data))?;
    let mut texts = Vec::new();
    collect_text_fields(&value, &mut texts);
    if texts.is_empty() {
        return Ok(serde_json::to_string_pretty(&value)?);
    }
    Ok(texts.join("\n"))
}

fn collect_text_fields(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let is_text_key = JSON_TEXT_KEYS.contains(&key.to_lowercase().as_str());
                match val {
                    serde_json::Value::String(s) if is_text_key && !s.trim().is_empty() => {
                        out.push(s.trim().to_string());
                    }
                    other => collect_text_fields(other, out),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_text_fields(item, out);
            }
        }
        _ => {}
    }
}

fn extract_csv(data: &[u8]) -> String {
    decode(data)
        .lines()
        .map(|line| {
            split_csv_row(line)
                .iter()
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .filter(|row| !row.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split one CSV line on commas, honoring double-quoted fields and `""`
/// escapes. Quoted fields spanning lines are not joined.
fn split_csv_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    cells.push(current);
    cells
}

fn truncate(text: String) -> String {
    if text.len() <= MAX_EXTRACTED_BYTES {
        return text;
    }
    let mut end = MAX_EXTRACTED_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_NOTICE}", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_and_markdown() {
        assert_eq!(extract_text(b"hello", "a.txt").unwrap(), "hello");
        assert_eq!(extract_text(b"# t", "notes.MD").unwrap(), "# t");
    }

    #[test]
    fn utf8_bom_is_stripped() {
        assert_eq!(extract_text(b"\xEF\xBB\xBFhi", "a.txt").unwrap(), "hi");
    }

    #[test]
    fn latin1_fallback() {
        // 0xE9 is 'é' in Latin-1 and invalid as a lone UTF-8 byte
        assert_eq!(extract_text(b"caf\xE9", "a.txt").unwrap(), "café");
    }

    #[test]
    fn unsupported_suffix() {
        let err = extract_text(b"x", "slides.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported { ref suffix } if suffix == ".pdf"));
        assert!(matches!(
            extract_text(b"x", "noext").unwrap_err(),
            ExtractError::Unsupported { .. }
        ));
    }

    #[test]
    fn json_collects_known_keys_recursively() {
        let raw = br#"{"messages":[{"text":"first"},{"body":"second","id":3}],"Content":"  third "}"#;
        let out = extract_text(raw, "export.json").unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&"first"));
        assert!(lines.contains(&"second"));
        assert!(lines.contains(&"third"));
    }

    #[test]
    fn json_without_text_keys_is_pretty_printed() {
        let out = extract_text(br#"{"a":1}"#, "x.json").unwrap();
        assert_eq!(out, "{\n  \"a\": 1\n}");
    }

    #[test]
    fn json_keeps_document_order() {
        let raw = br#"{"zeta":{"text":"first"},"alpha":{"text":"second"}}"#;
        assert_eq!(extract_text(raw, "export.json").unwrap(), "first\nsecond");

        let out = extract_text(br#"{"b":1,"a":2}"#, "x.json").unwrap();
        assert_eq!(out, "{\n  \"b\": 1,\n  \"a\": 2\n}");
    }

    #[test]
    fn json_parse_error() {
        assert!(matches!(
            extract_text(b"{oops", "x.json").unwrap_err(),
            ExtractError::Json(_)
        ));
    }

    #[test]
    fn csv_rows_joined_with_pipes() {
        let raw = b"name,note\nalice,\"likes, commas\"\n,,\nbob, \"say \"\"hi\"\"\"\n";
        let out = extract_text(raw, "t.csv").unwrap();
        assert_eq!(out, "name | note\nalice | likes, commas\nbob | say \"hi\"");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let text = "é".repeat(MAX_EXTRACTED_BYTES); // 2 bytes each
        let out = extract_text(text.as_bytes(), "big.txt").unwrap();
        assert!(out.ends_with(TRUNCATION_NOTICE));
        let body = out.trim_end_matches(TRUNCATION_NOTICE);
        assert_eq!(body.len(), MAX_EXTRACTED_BYTES);
    }

    #[test]
    fn size_check() {
        assert!(check_size(MAX_UPLOAD_BYTES).is_ok());
        assert!(matches!(
            check_size(MAX_UPLOAD_BYTES + 1),
            Err(ExtractError::TooLarge { .. })
        ));
    }
}
