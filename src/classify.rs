//! Recognising what an assembled table is: which column plays which role,
//! how its addresses are placed, and what its captions say about it.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use crate::address::{parse_address, parse_address_cell};
use crate::cells::{AssembledTable, CellRow};
use crate::config::{normalize_header, ColumnRole, HeaderVocabulary};
use crate::error::{Diagnostics, Warning};
use crate::values::is_bitmask;

static RE_CAPTION_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("valid caption label regex"));
static RE_CAPTION_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)((?:[0-9A-F]{2}H?\s+)+[0-9A-F]{2}H?)(?:\s|$)").expect("valid caption address regex")
});

/// Longest run of leading rows merged into one header
const MAX_HEADER_ROWS: usize = 3;
/// Rows above the header that may belong to the table's title
const MAX_LEADING_ROWS: usize = 2;

/// How a table's addresses relate to the address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Addresses are complete as written
    #[default]
    Absolute,
    /// Addresses are relative to the table's base address
    Offset,
    /// Addresses are relative to the previous record
    Delta,
}

impl Placement {
    fn from_header(label: &str) -> Self {
        let label = normalize_header(label);
        let has = |word: &str| label.split(' ').any(|w| w == word);
        if has("offset") || has("relative") {
            Placement::Offset
        } else if has("delta") || has("increment") {
            Placement::Delta
        } else {
            Placement::Absolute
        }
    }
}

/// Column roles of a recognised table
#[derive(Debug, Clone, PartialEq)]
pub struct TableShape {
    /// Role per column; `None` for columns the vocabulary does not know
    pub roles: Vec<Option<ColumnRole>>,
    pub placement: Placement,
    /// Merged header text per column
    pub header: Vec<String>,
}

impl TableShape {
    pub fn column(&self, role: ColumnRole) -> Option<usize> {
        self.roles.iter().position(|r| *r == Some(role))
    }

    pub fn has(&self, role: ColumnRole) -> bool {
        self.column(role).is_some()
    }

    /// Text of `row` in the column playing `role` ("" when absent)
    pub fn cell<'r>(&self, row: &'r CellRow, role: ColumnRole) -> &'r str {
        self.column(role)
            .and_then(|i| row.cells.get(i))
            .map(|c| c.trim())
            .unwrap_or("")
    }

    fn score(&self) -> usize {
        self.roles.iter().flatten().count()
    }

    fn is_usable(&self) -> bool {
        self.has(ColumnRole::Address) && self.has(ColumnRole::Name)
    }

    /// A column whose body is made of bitmasks is the data column, even when
    /// a spanning header put the name role over it.
    fn infer_data_column(&mut self, body: &[CellRow]) {
        if self.has(ColumnRole::Data) {
            return;
        }
        for column in 0..self.roles.len() {
            if matches!(self.roles[column], Some(role) if role != ColumnRole::Name) {
                continue;
            }
            let filled: Vec<&str> = body
                .iter()
                .filter_map(|r| r.cells.get(column))
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .collect();
            let masks = filled.iter().filter(|c| is_bitmask(c)).count();
            if filled.is_empty() || masks * 5 < filled.len() * 4 {
                continue;
            }

            let displaced = self.roles[column].take();
            self.roles[column] = Some(ColumnRole::Data);
            if let Some(role) = displaced {
                if let Some(free) = (column + 1..self.roles.len()).find(|i| self.roles[*i].is_none()) {
                    self.roles[free] = Some(role);
                }
            }
            debug!("column {} holds data bitmasks", column);
            return;
        }
    }
}

/// Label and base address carried by a table's captions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionInfo {
    pub label: Option<String>,
    pub base: Option<Vec<u32>>,
}

impl CaptionInfo {
    pub fn from_captions(captions: &[String]) -> Self {
        let mut info = CaptionInfo::default();
        for caption in captions {
            if info.label.is_none() {
                info.label = RE_CAPTION_LABEL
                    .captures(caption)
                    .map(|c| c[1].trim().to_string())
                    .filter(|l| !l.is_empty());
            }
            if info.base.is_none() {
                info.base = RE_CAPTION_ADDRESS
                    .captures(caption)
                    .and_then(|c| parse_address(&c[1]).ok());
            }
        }
        info
    }
}

/// A run of data rows sharing one shape
#[derive(Debug, Clone, PartialEq)]
pub struct TableSegment {
    pub page: u32,
    pub shape: TableShape,
    pub captions: CaptionInfo,
    pub rows: Vec<CellRow>,
    /// Headerless rows that carry on the previous table
    pub continuation: bool,
}

/// Match a header starting at `start`, merging up to three rows.
fn match_header(
    vocabulary: &HeaderVocabulary,
    rows: &[CellRow],
    start: usize,
) -> Option<(usize, TableShape)> {
    let mut best: Option<(usize, TableShape)> = None;
    for depth in 1..=MAX_HEADER_ROWS {
        let Some(block) = rows.get(start..start + depth) else {
            break;
        };
        let columns = block[0].cells.len();
        let mut roles = vec![None; columns];
        let mut header = vec![String::new(); columns];
        for column in 0..columns {
            let lines: Vec<&str> = block
                .iter()
                .filter_map(|r| r.cells.get(column))
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .collect();
            header[column] = lines.join(" ");
            // Merged text first, then each line from the bottom up
            roles[column] = vocabulary
                .role_for(&header[column])
                .or_else(|| lines.iter().rev().find_map(|l| vocabulary.role_for(l)));
        }

        // A role claimed twice keeps its leftmost column
        for column in 0..columns {
            if let Some(role) = roles[column] {
                if roles[..column].contains(&Some(role)) {
                    roles[column] = None;
                }
            }
        }

        // Every header line names at least one column, and none is a data row
        let address_column = roles.iter().position(|r| *r == Some(ColumnRole::Address));
        let plausible = block.iter().all(|row| {
            let names_a_column = row.cells.iter().any(|c| vocabulary.role_for(c).is_some());
            let carries_address = address_column
                .and_then(|i| row.cells.get(i))
                .is_some_and(|c| !c.trim().is_empty() && parse_address_cell(c.trim_start_matches('#')).is_ok());
            names_a_column && !carries_address
        });
        if !plausible {
            continue;
        }

        let placement = address_column
            .map(|i| Placement::from_header(&header[i]))
            .unwrap_or_default();
        let shape = TableShape {
            roles,
            placement,
            header,
        };
        if !shape.is_usable() {
            continue;
        }
        if best.as_ref().map_or(true, |(_, b)| shape.score() > b.score()) {
            best = Some((depth, shape));
        }
    }
    best
}

/// Recognises tables one after another, remembering the last shape so that a
/// table broken across pages can carry on without repeating its header.
pub struct TableClassifier<'v> {
    vocabulary: &'v HeaderVocabulary,
    last_shape: Option<TableShape>,
}

impl<'v> TableClassifier<'v> {
    pub fn new(vocabulary: &'v HeaderVocabulary) -> Self {
        Self {
            vocabulary,
            last_shape: None,
        }
    }

    /// Split an assembled table into shaped segments. A table with no header
    /// that does not continue the previous one is reported and yields nothing.
    pub fn classify(&mut self, table: &AssembledTable, diagnostics: &mut Diagnostics) -> Vec<TableSegment> {
        let rows: Vec<CellRow> = table.rows.iter().filter(|r| !r.is_blank()).cloned().collect();
        if rows.is_empty() {
            return Vec::new();
        }

        let header = (0..=MAX_LEADING_ROWS.min(rows.len() - 1))
            .find_map(|skip| match_header(self.vocabulary, &rows, skip).map(|(depth, shape)| (skip, depth, shape)));

        let Some((skip, depth, shape)) = header else {
            return self.continuation(table, rows, diagnostics);
        };

        let mut captions = table.captions.clone();
        captions.extend(rows[..skip].iter().map(|r| r.cells.join(" ").trim().to_string()));
        let caption_info = CaptionInfo::from_captions(&captions);

        let mut segments = Vec::new();
        let mut current = TableSegment {
            page: table.page,
            shape,
            captions: caption_info.clone(),
            rows: Vec::new(),
            continuation: false,
        };

        let mut i = skip + depth;
        while i < rows.len() {
            // A repeated or new header inside the table opens a new segment
            if let Some((depth, shape)) = match_header(self.vocabulary, &rows, i) {
                let finished = std::mem::replace(
                    &mut current,
                    TableSegment {
                        page: table.page,
                        shape,
                        captions: caption_info.clone(),
                        rows: Vec::new(),
                        continuation: false,
                    },
                );
                segments.push(finished);
                i += depth;
                continue;
            }
            current.rows.push(rows[i].clone());
            i += 1;
        }
        segments.push(current);

        for segment in &mut segments {
            segment.shape.infer_data_column(&segment.rows);
        }
        segments.retain(|s| !s.rows.is_empty());
        if let Some(last) = segments.last() {
            self.last_shape = Some(last.shape.clone());
        }

        debug!(
            "page {}: table classified into {} segments",
            table.page,
            segments.len()
        );
        segments
    }

    fn continuation(
        &mut self,
        table: &AssembledTable,
        rows: Vec<CellRow>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<TableSegment> {
        let carried = self.last_shape.as_ref().filter(|shape| {
            shape.roles.len() == table.column_count && {
                let first = shape.cell(&rows[0], ColumnRole::Address);
                parse_address_cell(first.trim_start_matches('#')).is_ok()
            }
        });

        match carried {
            Some(shape) => {
                debug!("page {}: headerless table continues the previous one", table.page);
                vec![TableSegment {
                    page: table.page,
                    shape: shape.clone(),
                    captions: CaptionInfo::from_captions(&table.captions),
                    rows,
                    continuation: true,
                }]
            }
            None => {
                diagnostics.push(Warning::UnrecognizedTable {
                    page: table.page,
                    header: rows[0].cells.clone(),
                });
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_row(cells: &[&str]) -> CellRow {
        CellRow {
            cells: cells.iter().map(|c| c.to_string()).collect(),
            y_min: 0.0,
            y_max: 10.0,
            page: 1,
        }
    }

    fn table(captions: &[&str], rows: &[&[&str]]) -> AssembledTable {
        AssembledTable {
            page: 1,
            captions: captions.iter().map(|c| c.to_string()).collect(),
            column_count: rows[0].len(),
            rows: rows.iter().map(|r| cell_row(r)).collect(),
        }
    }

    #[test]
    fn recognises_a_plain_header() {
        let vocab = HeaderVocabulary::default();
        let mut classifier = TableClassifier::new(&vocab);
        let mut diagnostics = Diagnostics::new();
        let t = table(
            &[],
            &[
                &["Address", "Size", "Parameter", "Range", "Default"],
                &["00 00 00", "1", "Reverb Type", "0-7", "4"],
            ],
        );
        let segments = classifier.classify(&t, &mut diagnostics);
        assert_eq!(segments.len(), 1);
        let shape = &segments[0].shape;
        assert_eq!(shape.column(ColumnRole::Address), Some(0));
        assert_eq!(shape.column(ColumnRole::Default), Some(4));
        assert_eq!(shape.placement, Placement::Absolute);
        assert_eq!(segments[0].rows.len(), 1);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn merges_two_line_headers_and_reads_placement() {
        let vocab = HeaderVocabulary::default();
        let mut classifier = TableClassifier::new(&vocab);
        let t = table(
            &["* [Studio Set Common]"],
            &[
                &["Offset", "", ""],
                &["Address", "Parameter", "Value"],
                &["00 00", "Name 1", "32 - 127"],
            ],
        );
        let segments = classifier.classify(&t, &mut Diagnostics::new());
        assert_eq!(segments[0].shape.placement, Placement::Offset);
        assert_eq!(segments[0].shape.column(ColumnRole::Range), Some(2));
        assert_eq!(segments[0].captions.label.as_deref(), Some("Studio Set Common"));
    }

    #[test]
    fn spanning_description_header_yields_to_bitmask_column() {
        let vocab = HeaderVocabulary::default();
        let mut classifier = TableClassifier::new(&vocab);
        let t = table(
            &[],
            &[
                &["Offset Address", "Description", ""],
                &["00 00", "0aaa aaaa", "Tone Name 1 (32 - 127)"],
                &["00 01", "0aaa aaaa", "Tone Name 2 (32 - 127)"],
            ],
        );
        let segments = classifier.classify(&t, &mut Diagnostics::new());
        let shape = &segments[0].shape;
        assert_eq!(shape.column(ColumnRole::Data), Some(1));
        assert_eq!(shape.column(ColumnRole::Name), Some(2));
    }

    #[test]
    fn headerless_table_continues_previous_shape() {
        let vocab = HeaderVocabulary::default();
        let mut classifier = TableClassifier::new(&vocab);
        let mut diagnostics = Diagnostics::new();
        classifier.classify(
            &table(&[], &[&["Address", "Parameter"], &["00 00", "Level"]]),
            &mut diagnostics,
        );
        let segments = classifier.classify(&table(&[], &[&["00 01", "Pan"]]), &mut diagnostics);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].continuation);

        let segments = classifier.classify(&table(&[], &[&["Note", "Text"]]), &mut diagnostics);
        assert!(segments.is_empty());
        assert_eq!(diagnostics.skipped_tables(), 1);
    }

    #[test]
    fn repeated_header_splits_segments() {
        let vocab = HeaderVocabulary::default();
        let mut classifier = TableClassifier::new(&vocab);
        let t = table(
            &[],
            &[
                &["Address", "Parameter"],
                &["00 00", "Level"],
                &["Offset Address", "Parameter"],
                &["00 00", "Pan"],
            ],
        );
        let segments = classifier.classify(&t, &mut Diagnostics::new());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].shape.placement, Placement::Offset);
    }

    #[test]
    fn caption_address_and_label() {
        let info = CaptionInfo::from_captions(&[
            "[Temporary Tone] Start Address: 19 00 00 00".to_string(),
        ]);
        assert_eq!(info.label.as_deref(), Some("Temporary Tone"));
        assert_eq!(info.base, Some(vec![0x19, 0, 0, 0]));
        assert_eq!(CaptionInfo::from_captions(&["Part 10 of the map".to_string()]).base, None);
    }
}
