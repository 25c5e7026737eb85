//! Terminal list loading
//!
//! The list is a small delimited file with a header naming at least the `mid` and
//! `tid` columns. Rows are kept in file order and duplicates are preserved.

use crate::common::TerminalIdentity;
use crate::errors::{ErrorContext, HarnessError, Result};
use std::path::Path;

/// Read the terminal list from a file
pub fn read_terminals(path: &Path) -> Result<Vec<TerminalIdentity>> {
    let contents = std::fs::read_to_string(path)
        .with_config_context(&format!("Error reading {}", path.display()))?;
    parse_terminals(&contents)
}

/// Parse terminal list contents
pub fn parse_terminals(contents: &str) -> Result<Vec<TerminalIdentity>> {
    let mut lines = contents
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (_, header) = lines
        .next()
        .with_config_context("Terminal list is empty (expected a 'mid,tid' header)")?;
    let columns: Vec<String> = split_row(header)
        .into_iter()
        .map(|c| c.to_ascii_lowercase())
        .collect();

    let mid_index = column_index(&columns, "mid")?;
    let tid_index = column_index(&columns, "tid")?;

    let mut terminals = Vec::new();
    for (line_number, line) in lines {
        let fields = split_row(line);
        let mid = field(&fields, mid_index, "mid", line_number)?;
        let tid = field(&fields, tid_index, "tid", line_number)?;
        terminals.push(TerminalIdentity::new(mid, tid));
    }

    Ok(terminals)
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',')
        .map(|f| f.trim().trim_matches('"').trim().to_string())
        .collect()
}

fn column_index(columns: &[String], name: &str) -> Result<usize> {
    columns
        .iter()
        .position(|c| c == name)
        .with_config_context(&format!(
            "Terminal list header is missing the '{}' column (found: {})",
            name,
            columns.join(",")
        ))
}

fn field(fields: &[String], index: usize, name: &str, line_number: usize) -> Result<String> {
    match fields.get(index) {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(HarnessError::config(format!(
            "Terminal list line {}: missing '{}' value",
            line_number, name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_list() {
        let terminals = parse_terminals("mid,tid\nmid1,test-mid1\nmid2,test-mid2\n").unwrap();
        assert_eq!(
            terminals,
            vec![
                TerminalIdentity::new("mid1", "test-mid1"),
                TerminalIdentity::new("mid2", "test-mid2"),
            ]
        );
    }

    #[test]
    fn test_duplicates_preserved_in_order() {
        let terminals = parse_terminals("mid,tid\n1,A\n2,A\n1,A\n").unwrap();
        assert_eq!(terminals.len(), 3);
        assert_eq!(terminals[0], terminals[2]);
        assert_eq!(terminals[1].merchant_id, "2");
    }

    #[test]
    fn test_header_order_case_and_extra_columns() {
        let terminals = parse_terminals("TID, name ,MID\r\n\"T1\",Shop,\"M1\"\r\n\r\n").unwrap();
        assert_eq!(terminals, vec![TerminalIdentity::new("M1", "T1")]);
    }

    #[test]
    fn test_missing_column_rejected() {
        let err = parse_terminals("mid,terminal\n1,2\n").unwrap_err();
        assert!(err.to_string().contains("'tid'"));
    }

    #[test]
    fn test_empty_value_names_line() {
        let err = parse_terminals("mid,tid\n1,A\n2,\n").unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_empty_file_rejected() {
        assert!(parse_terminals("\n  \n").is_err());
    }

    #[test]
    fn test_header_only_yields_empty_list() {
        assert!(parse_terminals("mid,tid\n").unwrap().is_empty());
    }
}
