//! Config-driven CSV parsing and row validation
//!
//! Honors each source's `csv_config`: skip rows, delimiter, and header
//! handling. Quoted fields (including embedded delimiters, quotes, and
//! newlines) follow the usual CSV quoting rules. Row numbers are 1-based
//! positions in the original file, counting skipped and header records.

use regex::Regex;
use std::collections::BTreeMap;

use leadlink_common::{Error, Result};

use crate::models::{CsvConfig, FieldMapping, ValidationRules};

/// One parsed data record
#[derive(Debug, Clone)]
pub struct CsvRecord {
    /// 1-based record position in the original file
    pub row_number: i64,
    /// column name → raw string value
    pub values: BTreeMap<String, String>,
}

/// Parse result for one file
#[derive(Debug, Clone)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub records: Vec<CsvRecord>,
}

/// Parse a whole CSV file per the source configuration.
pub fn parse_csv(content: &str, config: &CsvConfig) -> Result<ParsedCsv> {
    let raw_records = split_records(content, config.delimiter);

    let mut iter = raw_records.into_iter();

    // Physical records dropped before any interpretation
    for _ in 0..config.skip_rows {
        if iter.next().is_none() {
            break;
        }
    }

    let headers: Vec<String> = if config.has_header {
        match iter.next() {
            Some((_, fields)) => fields.iter().map(|h| h.trim().to_string()).collect(),
            None => {
                return Err(Error::InvalidInput(
                    "CSV has no header row after skip_rows".to_string(),
                ))
            }
        }
    } else {
        Vec::new()
    };

    let mut records = Vec::new();
    for (row_number, fields) in iter {
        // Skip fully blank records (trailing newlines produce them)
        if fields.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        let mut values = BTreeMap::new();
        if config.has_header {
            for (i, header) in headers.iter().enumerate() {
                let value = fields.get(i).cloned().unwrap_or_default();
                values.insert(header.clone(), value);
            }
        } else {
            for (i, value) in fields.into_iter().enumerate() {
                values.insert(format!("column_{}", i + 1), value);
            }
        }

        records.push(CsvRecord { row_number, values });
    }

    Ok(ParsedCsv { headers, records })
}

/// Split file content into `(row_number, fields)` records, honoring quoted
/// fields. Row numbers count every record in the file, 1-based.
fn split_records(content: &str, delimiter: char) -> Vec<(i64, Vec<String>)> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut row_number: i64 = 1;

    let mut chars = content.chars().peekable();
    let mut saw_any = false;

    while let Some(c) = chars.next() {
        saw_any = true;
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => in_quotes = true,
                '\r' => {
                    // Swallow the \n of a \r\n pair
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    fields.push(std::mem::take(&mut field));
                    records.push((row_number, std::mem::take(&mut fields)));
                    row_number += 1;
                }
                '\n' => {
                    fields.push(std::mem::take(&mut field));
                    records.push((row_number, std::mem::take(&mut fields)));
                    row_number += 1;
                }
                c if c == delimiter => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }

    // Trailing record without final newline
    if saw_any && (!field.is_empty() || !fields.is_empty()) {
        fields.push(field);
        records.push((row_number, fields));
    }

    // Blank records stay in the list so row numbers and skip_rows keep
    // counting physical lines; the caller filters them from data rows.
    records
}

/// Compiled validation rules for one source.
pub struct RowValidator {
    required_fields: Vec<(String, Vec<String>)>,
    email_columns: Vec<String>,
    email_regex: Option<Regex>,
}

impl RowValidator {
    pub fn new(mapping: &FieldMapping, rules: &ValidationRules) -> Result<Self> {
        let email_regex = match &rules.email_regex {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                Error::Config(format!("Invalid email_regex '{}': {}", pattern, e))
            })?),
            None => None,
        };

        let required_fields = rules
            .required_fields
            .iter()
            .map(|field| (field.clone(), mapping.candidates(field).to_vec()))
            .collect();

        Ok(Self {
            required_fields,
            email_columns: mapping.candidates("email").to_vec(),
            email_regex,
        })
    }

    /// Validate one record. Returns the list of validation errors; empty
    /// means the row is valid.
    pub fn validate(&self, values: &BTreeMap<String, String>) -> Vec<String> {
        let mut errors = Vec::new();

        for (field, columns) in &self.required_fields {
            let satisfied = columns
                .iter()
                .any(|col| values.get(col).map(|v| !v.trim().is_empty()).unwrap_or(false));
            if !satisfied {
                errors.push(format!("Missing required field: {}", field));
            }
        }

        if let Some(regex) = &self.email_regex {
            let email = self
                .email_columns
                .iter()
                .find_map(|col| values.get(col).map(|v| v.trim()).filter(|v| !v.is_empty()));
            if let Some(email) = email {
                if !regex.is_match(email) {
                    errors.push(format!("Invalid email format: {}", email));
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config() -> CsvConfig {
        CsvConfig::default()
    }

    #[test]
    fn test_parse_simple_csv() {
        let parsed = parse_csv("name,email\nJohn,j@x.com\nJane,jane@y.com\n", &config()).unwrap();
        assert_eq!(parsed.headers, ["name", "email"]);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].row_number, 2);
        assert_eq!(parsed.records[0].values["email"], "j@x.com");
        assert_eq!(parsed.records[1].row_number, 3);
    }

    #[test]
    fn test_parse_quoted_fields() {
        let parsed = parse_csv(
            "name,address\n\"Smith, John\",\"123 \"\"Main\"\" St\"\n",
            &config(),
        )
        .unwrap();
        assert_eq!(parsed.records[0].values["name"], "Smith, John");
        assert_eq!(parsed.records[0].values["address"], "123 \"Main\" St");
    }

    #[test]
    fn test_parse_skip_rows_and_pipe_delimiter() {
        let csv_config = CsvConfig {
            delimiter: '|',
            has_header: true,
            date_format: None,
            skip_rows: 2,
        };
        let content = "Report generated 2024-01-01\n\nname|email\nJohn|j@x.com\n";
        let parsed = parse_csv(content, &csv_config).unwrap();
        assert_eq!(parsed.headers, ["name", "email"]);
        assert_eq!(parsed.records.len(), 1);
        // Row 1: banner, row 2: blank, row 3: header, row 4: data
        assert_eq!(parsed.records[0].row_number, 4);
    }

    #[test]
    fn test_parse_no_header_uses_positional_columns() {
        let csv_config = CsvConfig {
            has_header: false,
            ..CsvConfig::default()
        };
        let parsed = parse_csv("John,j@x.com\n", &csv_config).unwrap();
        assert_eq!(parsed.records[0].values["column_1"], "John");
        assert_eq!(parsed.records[0].values["column_2"], "j@x.com");
    }

    #[test]
    fn test_parse_short_row_pads_missing_columns() {
        let parsed = parse_csv("name,email,phone\nJohn,j@x.com\n", &config()).unwrap();
        assert_eq!(parsed.records[0].values["phone"], "");
    }

    #[test]
    fn test_parse_crlf_line_endings() {
        let parsed = parse_csv("name,email\r\nJohn,j@x.com\r\n", &config()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].values["name"], "John");
    }

    #[test]
    fn test_validator_required_fields() {
        let mapping: FieldMapping = serde_json::from_str(
            r#"{"email": ["Email", "Email Address"], "first_name": ["First Name"]}"#,
        )
        .unwrap();
        let rules = ValidationRules {
            required_fields: vec!["email".to_string()],
            email_regex: Some(r"^[^@\s]+@[^@\s]+\.[^@\s]+$".to_string()),
        };
        let validator = RowValidator::new(&mapping, &rules).unwrap();

        let mut row = BTreeMap::new();
        row.insert("Email".to_string(), "j@x.com".to_string());
        assert!(validator.validate(&row).is_empty());

        // Alternate candidate column satisfies the requirement
        let mut row = BTreeMap::new();
        row.insert("Email Address".to_string(), "j@x.com".to_string());
        assert!(validator.validate(&row).is_empty());

        let row = BTreeMap::new();
        let errors = validator.validate(&row);
        assert_eq!(errors, ["Missing required field: email"]);

        let mut row = BTreeMap::new();
        row.insert("Email".to_string(), "not-an-email".to_string());
        let errors = validator.validate(&row);
        assert!(errors.iter().any(|e| e.contains("Invalid email format")));
    }
}
