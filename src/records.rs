//! Parsing the data rows of a classified table into parameter records.

use log::debug;

use crate::address::{advance, expand_range, is_ellipsis, parse_address, parse_address_cell, to_linear, AddressCell};
use crate::cells::CellRow;
use crate::classify::{Placement, TableSegment, TableShape};
use crate::config::{normalize_header, ColumnRole, MapConfig};
use crate::error::{format_address, Diagnostics, RowParseError, Warning};
use crate::values::{
    extend_range, parse_bitmask, parse_default, parse_name, parse_range, parse_size, range_template,
    DefaultValue, IndexedName, NameCell, ValueRange,
};

/// One addressable parameter as printed in a chart row
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    /// Address as written; see `placement` for how to resolve it
    pub address: Vec<u32>,
    pub placement: Placement,
    pub size_bytes: u32,
    pub name: String,
    pub value_range: Option<ValueRange>,
    pub display_range: Option<(i64, i64)>,
    pub default: Option<DefaultValue>,
    pub unit: Option<String>,
    pub description: Option<String>,
    /// Value bits decoded from the data bitmask column
    pub bits: Option<u32>,
    /// Block type named by a reference row (`Part 1 [Studio Set Part]`)
    pub block: Option<String>,
    pub source_page: u32,
}

impl ParameterRecord {
    pub fn new(address: Vec<u32>, name: impl Into<String>) -> Self {
        Self {
            address,
            placement: Placement::Absolute,
            size_bytes: 1,
            name: name.into(),
            value_range: None,
            display_range: None,
            default: None,
            unit: None,
            description: None,
            bits: None,
            block: None,
            source_page: 0,
        }
    }

    fn append_description(&mut self, text: &str) {
        match &mut self.description {
            Some(description) => {
                description.push(' ');
                description.push_str(text);
            }
            None => self.description = Some(text.to_string()),
        }
    }
}

/// Records of one table segment and the size its "Total Size" row declares
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRecords {
    pub records: Vec<ParameterRecord>,
    pub declared_size: Option<u64>,
}

/// A record still open for continuation rows
struct Draft {
    record: ParameterRecord,
    named: bool,
    /// Further unnamed bitmask rows add bytes to this value
    accepts_bytes: bool,
    row_text: String,
}

struct RowParser<'s> {
    shape: &'s TableShape,
    page: u32,
    records: Vec<ParameterRecord>,
    pending: Option<Draft>,
    /// An ellipsis row was seen since the last emitted record
    ellipsis: bool,
    declared_size: Option<u64>,
    max_range_entries: usize,
}

/// A lone number on a row is a page number caught inside the table, unless it
/// sits in a column whose wrapped lines carry on the open record.
fn is_stray_folio(row: &CellRow, shape: &TableShape) -> bool {
    let mut filled = row
        .cells
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.trim().is_empty());
    match (filled.next(), filled.next()) {
        (Some((column, only)), None) => {
            let only = only.trim();
            let wrapped_value = matches!(
                shape.roles.get(column).copied().flatten(),
                Some(ColumnRole::Range | ColumnRole::Description)
            );
            !wrapped_value && only.len() <= 4 && only.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

impl<'s> RowParser<'s> {
    fn new(segment: &'s TableSegment, config: &MapConfig) -> Self {
        Self {
            shape: &segment.shape,
            page: segment.page,
            records: Vec::new(),
            pending: None,
            ellipsis: false,
            declared_size: None,
            max_range_entries: config.max_range_entries,
        }
    }

    fn cell<'r>(&self, row: &'r CellRow, role: ColumnRole) -> &'r str {
        self.shape.cell(row, role)
    }

    fn skip(&self, diagnostics: &mut Diagnostics, row: String, error: RowParseError) {
        diagnostics.push(Warning::SkippedRow {
            page: self.page,
            row,
            error,
        });
    }

    fn row(&mut self, row: &CellRow, diagnostics: &mut Diagnostics) {
        if is_stray_folio(row, self.shape) {
            debug!("page {}: ignoring stray page number {:?}", self.page, row.display());
            return;
        }

        if row.cells.iter().any(|c| normalize_header(c) == "total size") {
            self.total_size(row, diagnostics);
            return;
        }

        let address_text = self.cell(row, ColumnRole::Address);
        if is_ellipsis(address_text) {
            self.flush(diagnostics);
            self.ellipsis = true;
            return;
        }
        if address_text.is_empty() {
            self.continuation(row, diagnostics);
            return;
        }

        let (starts_value, address_text) = match address_text.strip_prefix('#') {
            Some(rest) => (true, rest.trim()),
            None => (false, address_text),
        };
        let address = match parse_address_cell(address_text) {
            Ok(address) => address,
            Err(e) => {
                self.flush(diagnostics);
                self.skip(diagnostics, row.display(), e);
                return;
            }
        };
        let bits = match self.cell(row, ColumnRole::Data) {
            "" => None,
            mask => match parse_bitmask(mask) {
                Ok(bits) => Some(bits),
                Err(e) => {
                    self.flush(diagnostics);
                    self.skip(diagnostics, row.display(), e);
                    return;
                }
            },
        };

        let name_text = self.cell(row, ColumnRole::Name);
        let extends_value = !starts_value
            && bits.is_some()
            && matches!(&address, AddressCell::Single(_))
            && self.pending.as_ref().is_some_and(|d| d.accepts_bytes);

        if extends_value && (name_text.is_empty() || self.pending.as_ref().is_some_and(|d| !d.named)) {
            self.extend_value(row, bits.unwrap_or(0), name_text, diagnostics);
            return;
        }

        self.flush(diagnostics);
        match address {
            AddressCell::Single(address) if name_text.is_empty() => {
                if starts_value {
                    // The name arrives on a later byte of this value
                    let mut record = ParameterRecord::new(address, String::new());
                    record.placement = self.shape.placement;
                    record.bits = bits;
                    record.source_page = self.page;
                    self.pending = Some(Draft {
                        record,
                        named: false,
                        accepts_bytes: true,
                        row_text: row.display(),
                    });
                } else {
                    self.skip(diagnostics, row.display(), RowParseError::MissingName);
                }
            }
            AddressCell::Single(address) => match self.build(row, address, parse_name(name_text), bits) {
                Ok(record) => {
                    self.pending = Some(Draft {
                        record,
                        named: true,
                        accepts_bytes: bits.is_some(),
                        row_text: row.display(),
                    });
                }
                Err(e) => self.skip(diagnostics, row.display(), e),
            },
            AddressCell::Range(start, end) => {
                if name_text.is_empty() {
                    self.skip(diagnostics, row.display(), RowParseError::MissingName);
                    return;
                }
                if let Err(e) = self.expand(row, &start, &end, parse_name(name_text), bits, diagnostics) {
                    self.skip(diagnostics, row.display(), e);
                }
            }
            AddressCell::Ellipsis => self.ellipsis = true,
        }
    }

    /// Build a record from a named row
    fn build(
        &self,
        row: &CellRow,
        address: Vec<u32>,
        name: NameCell,
        bits: Option<u32>,
    ) -> Result<ParameterRecord, RowParseError> {
        let mut record = ParameterRecord::new(address, name.name);
        record.placement = self.shape.placement;
        record.size_bytes = parse_size(self.cell(row, ColumnRole::Size))?;
        record.bits = bits;
        record.block = name.block;
        record.source_page = self.page;

        let range_text = match self.cell(row, ColumnRole::Range) {
            "" => name.inline_range.unwrap_or_default(),
            text => text.to_string(),
        };
        if !range_text.is_empty() {
            let parsed = parse_range(&range_text)?;
            record.value_range = Some(parsed.range);
            record.display_range = parsed.display;
            record.unit = parsed.unit;
        }

        record.default = parse_default(self.cell(row, ColumnRole::Default));
        let unit = self.cell(row, ColumnRole::Unit);
        if !unit.is_empty() {
            record.unit = Some(unit.to_string());
        }
        record.description = Some(self.cell(row, ColumnRole::Description))
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Ok(record)
    }

    /// A range row stands for consecutive entries one size apart.
    fn expand(
        &mut self,
        row: &CellRow,
        start: &[u32],
        end: &[u32],
        name: NameCell,
        bits: Option<u32>,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), RowParseError> {
        let template = self.build(row, start.to_vec(), name, bits)?;
        let entries = expand_range(start, end, template.size_bytes, self.max_range_entries)?;
        let stem = range_template(&template.name);
        debug!(
            "page {}: range row {:?} expands to {} entries",
            self.page,
            stem,
            entries.len()
        );
        for (n, address) in entries.into_iter().enumerate() {
            let mut record = template.clone();
            record.address = address;
            record.name = format!("{} {}", stem, n + 1);
            self.emit(record, diagnostics);
        }
        Ok(())
    }

    fn extend_value(&mut self, row: &CellRow, bits: u32, name_text: &str, diagnostics: &mut Diagnostics) {
        let Some(draft) = self.pending.as_mut() else {
            return;
        };
        draft.record.size_bytes += 1;
        draft.record.bits = Some(draft.record.bits.unwrap_or(0) + bits);
        if name_text.is_empty() || draft.named {
            return;
        }

        // The naming byte of a `#` value supplies its attributes
        let address = draft.record.address.clone();
        let size = draft.record.size_bytes;
        let total_bits = draft.record.bits;
        match self.build(row, address, parse_name(name_text), None) {
            Ok(mut record) => {
                record.size_bytes = size;
                record.bits = total_bits;
                if let Some(draft) = self.pending.as_mut() {
                    draft.record = record;
                    draft.named = true;
                }
            }
            Err(e) => {
                self.pending = None;
                self.skip(diagnostics, row.display(), e);
            }
        }
    }

    /// A row without an address adds values or text to the open record.
    fn continuation(&mut self, row: &CellRow, diagnostics: &mut Diagnostics) {
        let range_text = self.cell(row, ColumnRole::Range);
        let texts: Vec<&str> = [ColumnRole::Name, ColumnRole::Description]
            .into_iter()
            .map(|role| self.cell(row, role))
            .filter(|t| !t.is_empty())
            .collect();

        let Some(draft) = self.pending.as_mut() else {
            if !range_text.is_empty() {
                self.skip(diagnostics, row.display(), RowParseError::OrphanContinuation);
            } else {
                debug!("page {}: ignoring label row {:?}", self.page, row.display());
            }
            return;
        };

        for text in texts {
            draft.record.append_description(text);
        }
        if range_text.is_empty() {
            return;
        }
        match parse_range(range_text) {
            Ok(parsed) => match &mut draft.record.value_range {
                Some(range) => extend_range(range, parsed.range),
                None => {
                    draft.record.value_range = Some(parsed.range);
                    draft.record.display_range = parsed.display;
                    if draft.record.unit.is_none() {
                        draft.record.unit = parsed.unit;
                    }
                }
            },
            Err(e) => self.skip(diagnostics, row.display(), e),
        }
    }

    fn total_size(&mut self, row: &CellRow, diagnostics: &mut Diagnostics) {
        self.flush(diagnostics);
        let size_text = self.cell(row, ColumnRole::Size);
        let declared = if size_text.is_empty() {
            parse_address(self.cell(row, ColumnRole::Address))
                .map(|a| to_linear(&a))
                .map_err(|_| RowParseError::BadSize(self.cell(row, ColumnRole::Address).to_string()))
        } else {
            parse_size(size_text).map(u64::from)
        };
        match declared {
            Ok(size) => self.declared_size = Some(size),
            Err(e) => self.skip(diagnostics, row.display(), e),
        }
    }

    fn flush(&mut self, diagnostics: &mut Diagnostics) {
        let Some(draft) = self.pending.take() else {
            return;
        };
        if draft.named {
            self.emit(draft.record, diagnostics);
        } else {
            self.skip(diagnostics, draft.row_text, RowParseError::MissingName);
        }
    }

    fn emit(&mut self, record: ParameterRecord, diagnostics: &mut Diagnostics) {
        if std::mem::take(&mut self.ellipsis) {
            self.fill_ellipsis(&record, diagnostics);
        }
        self.records.push(record);
    }

    /// Recreate the entries an ellipsis row stands for, stepping the index in
    /// the name and the address by the same stride.
    fn fill_ellipsis(&mut self, next: &ParameterRecord, diagnostics: &mut Diagnostics) {
        let Some(previous) = self.records.last().cloned() else {
            return;
        };
        let (Some(first), Some(last)) = (IndexedName::parse(&previous.name), IndexedName::parse(&next.name))
        else {
            debug!("page {}: ellipsis between unindexed names left as is", self.page);
            return;
        };
        if !first.same_template(&last) || last.index <= first.index + 1 {
            return;
        }

        let steps = last.index - first.index;
        let span = to_linear(&next.address).saturating_sub(to_linear(&previous.address));
        if span == 0 || span % steps != 0 {
            self.skip(
                diagnostics,
                format!("{} : {}", previous.name, next.name),
                RowParseError::BadAddress(format!(
                    "{} : {}",
                    format_address(&previous.address),
                    format_address(&next.address)
                )),
            );
            return;
        }

        let stride = span / steps;
        for k in 1..steps {
            let mut record = previous.clone();
            record.address = advance(&previous.address, k * stride);
            record.name = first.with_index(first.index + k);
            self.records.push(record);
        }
    }

    fn finish(mut self, diagnostics: &mut Diagnostics) -> TableRecords {
        self.flush(diagnostics);
        debug!("page {}: parsed {} records", self.page, self.records.len());
        TableRecords {
            records: self.records,
            declared_size: self.declared_size,
        }
    }
}

/// Parse every data row of a segment. Rows that fail are reported once each
/// and skipped; the rest of the table is unaffected.
pub fn parse_segment(segment: &TableSegment, config: &MapConfig, diagnostics: &mut Diagnostics) -> TableRecords {
    let mut parser = RowParser::new(segment, config);
    for row in &segment.rows {
        parser.row(row, diagnostics);
    }
    parser.finish(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CaptionInfo;
    use ColumnRole::{Address, Data, Default as Dflt, Name, Range, Size};

    fn segment(roles: &[ColumnRole], placement: Placement, rows: &[&[&str]]) -> TableSegment {
        TableSegment {
            page: 1,
            shape: TableShape {
                roles: roles.iter().map(|r| Some(*r)).collect(),
                placement,
                header: roles.iter().map(|r| format!("{:?}", r)).collect(),
            },
            captions: CaptionInfo::default(),
            rows: rows
                .iter()
                .map(|cells| CellRow {
                    cells: cells.iter().map(|c| c.to_string()).collect(),
                    y_min: 0.0,
                    y_max: 10.0,
                    page: 1,
                })
                .collect(),
            continuation: false,
        }
    }

    #[test]
    fn plain_row_becomes_a_record() {
        let seg = segment(
            &[Address, Size, Name, Range, Dflt],
            Placement::Absolute,
            &[&["00 00 00", "1", "Reverb Type", "0-7", "4"]],
        );
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_segment(&seg, &MapConfig::default(), &mut diagnostics);
        assert!(diagnostics.is_empty());
        let record = &parsed.records[0];
        assert_eq!(record.address, vec![0, 0, 0]);
        assert_eq!(record.size_bytes, 1);
        assert_eq!(record.name, "Reverb Type");
        assert_eq!(record.value_range, Some(ValueRange::Numeric(0, 7)));
        assert_eq!(record.default, Some(DefaultValue::Integer(4)));
    }

    #[test]
    fn malformed_row_is_skipped_alone() {
        let seg = segment(
            &[Address, Name, Range],
            Placement::Absolute,
            &[
                &["00 00", "Level", "0-127"],
                &["00 01", "Pan", "127 - 0"],
                &["00 02", "Send", "0-127"],
            ],
        );
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_segment(&seg, &MapConfig::default(), &mut diagnostics);
        let names: Vec<_> = parsed.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Level", "Send"]);
        assert_eq!(diagnostics.skipped_rows(), 1);
    }

    #[test]
    fn range_rows_expand_by_size() {
        let seg = segment(
            &[Address, Size, Name, Range],
            Placement::Offset,
            &[&["00 10 - 00 16", "2", "Tone Name 1", "32 - 127"]],
        );
        let parsed = parse_segment(&seg, &MapConfig::default(), &mut Diagnostics::new());
        let got: Vec<_> = parsed
            .records
            .iter()
            .map(|r| (r.address.clone(), r.name.clone()))
            .collect();
        assert_eq!(
            got,
            vec![
                (vec![0, 0x10], "Tone Name 1".to_string()),
                (vec![0, 0x12], "Tone Name 2".to_string()),
                (vec![0, 0x14], "Tone Name 3".to_string()),
                (vec![0, 0x16], "Tone Name 4".to_string()),
            ]
        );
        assert!(parsed.records.iter().all(|r| r.placement == Placement::Offset));
    }

    #[test]
    fn hash_rows_build_one_multi_byte_value() {
        let seg = segment(
            &[Address, Data, Name],
            Placement::Offset,
            &[
                &["00 00", "0aaa aaaa", "Level (0 - 127)"],
                &["# 00 01", "0000 aaaa", ""],
                &["00 02", "0000 bbbb", ""],
                &["00 03", "0000 cccc", "Tempo (20 - 250)"],
                &["00 04", "0aaa aaaa", "Pan (0 - 127)"],
            ],
        );
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_segment(&seg, &MapConfig::default(), &mut diagnostics);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let tempo = &parsed.records[1];
        assert_eq!(tempo.name, "Tempo");
        assert_eq!(tempo.address, vec![0, 1]);
        assert_eq!(tempo.size_bytes, 3);
        assert_eq!(tempo.bits, Some(12));
        assert_eq!(tempo.value_range, Some(ValueRange::Numeric(20, 250)));
        assert_eq!(parsed.records[2].name, "Pan");
    }

    #[test]
    fn ellipsis_rows_are_filled_in() {
        let seg = segment(
            &[Address, Name],
            Placement::Absolute,
            &[
                &["00 20 00", "Studio Set Part (Part 1) [Studio Set Part]"],
                &[":", ""],
                &["00 2F 00", "Studio Set Part (Part 16) [Studio Set Part]"],
            ],
        );
        let parsed = parse_segment(&seg, &MapConfig::default(), &mut Diagnostics::new());
        assert_eq!(parsed.records.len(), 16);
        assert_eq!(parsed.records[4].name, "Studio Set Part (Part 5)");
        assert_eq!(parsed.records[4].address, vec![0, 0x24, 0]);
        assert!(parsed.records.iter().all(|r| r.block.as_deref() == Some("Studio Set Part")));
    }

    #[test]
    fn continuation_rows_extend_the_open_record() {
        let seg = segment(
            &[Address, Name, Range],
            Placement::Absolute,
            &[
                &["00 00", "Reverb Type", "ROOM, HALL,"],
                &["", "see chart", "PLATE"],
                &["00 00 00 02", "Total Size", ""],
                &["", "", "OFF"],
            ],
        );
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_segment(&seg, &MapConfig::default(), &mut diagnostics);
        let record = &parsed.records[0];
        assert_eq!(
            record.value_range,
            Some(ValueRange::Labels(vec!["ROOM".into(), "HALL".into(), "PLATE".into()]))
        );
        assert_eq!(record.description.as_deref(), Some("see chart"));
        assert_eq!(parsed.declared_size, Some(2));
        // Values after the total size row belong to no record
        assert_eq!(diagnostics.skipped_rows(), 1);
    }

    #[test]
    fn stray_page_numbers_are_ignored() {
        let seg = segment(
            &[Address, Name],
            Placement::Absolute,
            &[&["00 00", "Level"], &["", "57"], &["00 01", "Pan"]],
        );
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_segment(&seg, &MapConfig::default(), &mut diagnostics);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].description, None);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn wrapped_number_in_a_description_is_kept() {
        let seg = segment(
            &[Address, Name, ColumnRole::Description],
            Placement::Absolute,
            &[
                &["00 00", "Level", "Center value is"],
                &["", "", "64"],
                &["00 01", "Pan", ""],
            ],
        );
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_segment(&seg, &MapConfig::default(), &mut diagnostics);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].description.as_deref(), Some("Center value is 64"));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn oversized_range_row_is_skipped() {
        let seg = segment(
            &[Address, Size, Name],
            Placement::Absolute,
            &[
                &["00 00 00 00", "1", "Master Level"],
                &["00 00 00 01 - 00 7F 7F 7F", "1", "Slot 1"],
                &["01 00 00 00", "1", "Master Tune"],
            ],
        );
        let config = MapConfig {
            max_range_entries: 128,
            ..MapConfig::default()
        };
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_segment(&seg, &config, &mut diagnostics);
        let names: Vec<_> = parsed.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Master Level", "Master Tune"]);
        assert!(matches!(
            diagnostics.warnings(),
            [Warning::SkippedRow { error: RowParseError::RangeTooLarge { limit: 128, .. }, .. }]
        ));
    }
}
