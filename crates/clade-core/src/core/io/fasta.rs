use crate::core::alignment::encoding;
use crate::core::alignment::partition::{AlignmentError, PartitionTable};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FastaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Line {line}: sequence data appears before the first header")]
    MissingHeader { line: usize },
    #[error("Line {line}: header carries no sequence name")]
    EmptyName { line: usize },
    #[error("Line {line}: unsupported character '{symbol}' in sequence '{name}'")]
    BadCharacter {
        line: usize,
        symbol: char,
        name: String,
    },
    #[error("Sequence '{name}' has {actual} columns, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Duplicate sequence name '{0}'")]
    DuplicateName(String),
    #[error("Alignment contains no sequences")]
    Empty,
    #[error("Partition '{name}' spans columns {start}..{end} outside the alignment of {columns} columns")]
    RangeOutOfBounds {
        name: String,
        start: usize,
        end: usize,
        columns: usize,
    },
    #[error("Partitions '{first}' and '{second}' overlap")]
    OverlappingRanges { first: String, second: String },
    #[error("Alignment shape error: {0}")]
    Shape(#[from] AlignmentError),
}

pub fn read_from(reader: &mut impl BufRead) -> Result<(Vec<String>, Vec<Vec<u8>>), FastaError> {
    let mut names: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<u8>> = Vec::new();

    for (index, line_result) in reader.lines().enumerate() {
        let line_num = index + 1;
        let line = line_result?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(header) = trimmed.strip_prefix('>') {
            let name = header
                .split_whitespace()
                .next()
                .ok_or(FastaError::EmptyName { line: line_num })?
                .to_string();
            if names.contains(&name) {
                return Err(FastaError::DuplicateName(name));
            }
            names.push(name);
            rows.push(Vec::new());
        } else {
            let row = rows
                .last_mut()
                .ok_or(FastaError::MissingHeader { line: line_num })?;
            for symbol in trimmed.chars() {
                let mask =
                    encoding::encode(symbol).ok_or_else(|| FastaError::BadCharacter {
                        line: line_num,
                        symbol,
                        name: names[names.len() - 1].clone(),
                    })?;
                row.push(mask);
            }
        }
    }

    if names.is_empty() {
        return Err(FastaError::Empty);
    }
    let expected = rows[0].len();
    for (name, row) in names.iter().zip(&rows) {
        if row.len() != expected {
            return Err(FastaError::LengthMismatch {
                name: name.clone(),
                expected,
                actual: row.len(),
            });
        }
    }
    Ok((names, rows))
}

pub fn read_path(path: &Path) -> Result<(Vec<String>, Vec<Vec<u8>>), FastaError> {
    let mut reader = BufReader::new(File::open(path)?);
    read_from(&mut reader)
}

/// Assembles a partition table from encoded rows. `ranges` holds half-open
/// column spans; when empty, the whole alignment becomes a single partition.
pub fn build_table(
    names: Vec<String>,
    rows: Vec<Vec<u8>>,
    ranges: &[(String, usize, usize)],
) -> Result<PartitionTable, FastaError> {
    if rows.is_empty() {
        return Err(FastaError::Empty);
    }
    let columns = rows[0].len();
    let spans: Vec<(String, usize, usize)> = if ranges.is_empty() {
        vec![("ALL".to_string(), 0, columns)]
    } else {
        ranges.to_vec()
    };

    for (name, start, end) in &spans {
        if start >= end || *end > columns {
            return Err(FastaError::RangeOutOfBounds {
                name: name.clone(),
                start: *start,
                end: *end,
                columns,
            });
        }
    }
    let mut ordered: Vec<&(String, usize, usize)> = spans.iter().collect();
    ordered.sort_by_key(|(_, start, _)| *start);
    for pair in ordered.windows(2) {
        if pair[0].2 > pair[1].1 {
            return Err(FastaError::OverlappingRanges {
                first: pair[0].0.clone(),
                second: pair[1].0.clone(),
            });
        }
    }

    let mut table = PartitionTable::new(names)?;
    for (name, start, end) in &spans {
        let length = end - start;
        let mut data = Vec::with_capacity(rows.len() * length);
        for row in &rows {
            data.extend_from_slice(&row[*start..*end]);
        }
        table.push_partition(name.clone(), length, data)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = ">alpha desc\nACGT\nACGT\n>beta\nTGCA\nTGCA\n";

    #[test]
    fn read_from_parses_multiline_sequences() {
        let (names, rows) = read_from(&mut SMALL.as_bytes()).unwrap();

        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(rows[0].len(), 8);
        assert_eq!(rows[0][0], 0b0001);
        assert_eq!(rows[1][0], 0b1000);
    }

    #[test]
    fn read_from_rejects_ragged_alignments() {
        let input = ">a\nACGT\n>b\nAC\n";
        let err = read_from(&mut input.as_bytes()).unwrap_err();

        assert!(matches!(
            err,
            FastaError::LengthMismatch {
                expected: 4,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn read_from_rejects_unknown_symbols_with_position() {
        let input = ">a\nAC!T\n";
        let err = read_from(&mut input.as_bytes()).unwrap_err();

        assert!(matches!(
            err,
            FastaError::BadCharacter {
                line: 2,
                symbol: '!',
                ..
            }
        ));
    }

    #[test]
    fn read_from_rejects_leading_sequence_data_and_duplicates() {
        assert!(matches!(
            read_from(&mut "ACGT\n".as_bytes()).unwrap_err(),
            FastaError::MissingHeader { line: 1 }
        ));
        assert!(matches!(
            read_from(&mut ">a\nAC\n>a\nGT\n".as_bytes()).unwrap_err(),
            FastaError::DuplicateName(name) if name == "a"
        ));
    }

    #[test]
    fn build_table_defaults_to_a_single_partition() {
        let (names, rows) = read_from(&mut SMALL.as_bytes()).unwrap();
        let table = build_table(names, rows, &[]).unwrap();

        assert_eq!(table.partition_count(), 1);
        assert_eq!(table.partition(0).unwrap().name(), "ALL");
        assert_eq!(table.partition(0).unwrap().length(), 8);
    }

    #[test]
    fn build_table_slices_partitions_by_column_ranges() {
        let (names, rows) = read_from(&mut SMALL.as_bytes()).unwrap();
        let ranges = vec![
            ("left".to_string(), 0, 3),
            ("right".to_string(), 3, 8),
        ];
        let table = build_table(names, rows, &ranges).unwrap();

        assert_eq!(table.partition_count(), 2);
        assert_eq!(table.partition(0).unwrap().length(), 3);
        assert_eq!(table.partition(1).unwrap().length(), 5);
        // Column 3 of taxon 0 is the 'T' ending "ACGT".
        assert_eq!(table.partition(1).unwrap().state(0, 0), 0b1000);
    }

    #[test]
    fn build_table_rejects_overlapping_or_escaping_ranges() {
        let (names, rows) = read_from(&mut SMALL.as_bytes()).unwrap();
        let escaping = vec![("oops".to_string(), 4, 9)];
        assert!(matches!(
            build_table(names.clone(), rows.clone(), &escaping).unwrap_err(),
            FastaError::RangeOutOfBounds { end: 9, .. }
        ));

        let overlapping = vec![
            ("a".to_string(), 0, 5),
            ("b".to_string(), 4, 8),
        ];
        assert!(matches!(
            build_table(names, rows, &overlapping).unwrap_err(),
            FastaError::OverlappingRanges { .. }
        ));
    }
}
