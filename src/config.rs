//! Tunable thresholds and vocabularies for the layout heuristics.
//!
//! Every geometric tolerance lives here rather than inside the stages so the
//! heuristics can be calibrated against sample documents without code changes.

use serde::{Deserialize, Serialize};

use crate::error::SysexError;

/// Canonical meaning of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Address,
    Size,
    /// Bit layout of the transmitted byte, e.g. `0aaa aaaa`
    Data,
    Name,
    Range,
    Default,
    Unit,
    Description,
}

impl ColumnRole {
    pub const ALL: [ColumnRole; 8] = [
        ColumnRole::Address,
        ColumnRole::Size,
        ColumnRole::Data,
        ColumnRole::Name,
        ColumnRole::Range,
        ColumnRole::Default,
        ColumnRole::Unit,
        ColumnRole::Description,
    ];
}

/// How the physical lines of a wrapped cell are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapJoin {
    #[default]
    Space,
    Newline,
}

impl WrapJoin {
    pub fn separator(self) -> &'static str {
        match self {
            WrapJoin::Space => " ",
            WrapJoin::Newline => "\n",
        }
    }
}

/// Header synonyms per column role, matched case-insensitively after
/// punctuation is folded to spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderVocabulary {
    pub address: Vec<String>,
    pub size: Vec<String>,
    pub data: Vec<String>,
    pub name: Vec<String>,
    pub range: Vec<String>,
    pub default: Vec<String>,
    pub unit: Vec<String>,
    pub description: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for HeaderVocabulary {
    fn default() -> Self {
        Self {
            address: words(&[
                "address",
                "addr",
                "start address",
                "absolute address",
                "offset",
                "offset address",
                "relative address",
                "delta",
                "increment",
            ]),
            size: words(&["size", "bytes", "size bytes", "byte count", "length"]),
            data: words(&["data", "bitmask", "bit mask", "bits", "data bits", "format"]),
            name: words(&["parameter", "parameter name", "name", "description", "item"]),
            range: words(&["range", "value", "values", "value range", "data range"]),
            default: words(&["default", "default value", "init", "initial", "initial value"]),
            unit: words(&["unit", "units"]),
            description: words(&["notes", "note", "remarks", "remark", "comment", "comments"]),
        }
    }
}

impl HeaderVocabulary {
    pub fn synonyms(&self, role: ColumnRole) -> &[String] {
        match role {
            ColumnRole::Address => &self.address,
            ColumnRole::Size => &self.size,
            ColumnRole::Data => &self.data,
            ColumnRole::Name => &self.name,
            ColumnRole::Range => &self.range,
            ColumnRole::Default => &self.default,
            ColumnRole::Unit => &self.unit,
            ColumnRole::Description => &self.description,
        }
    }

    /// Role whose synonym list contains `label`, if any.
    pub fn role_for(&self, label: &str) -> Option<ColumnRole> {
        let label = normalize_header(label);
        if label.is_empty() {
            return None;
        }
        ColumnRole::ALL.into_iter().find(|role| {
            self.synonyms(*role)
                .iter()
                .any(|synonym| normalize_header(synonym) == label)
        })
    }
}

/// Lowercase, fold punctuation to spaces and collapse runs of whitespace.
pub fn normalize_header(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Configuration for one conversion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Minimum vertical overlap (fraction of the smaller height) for a fragment
    /// to join the open row.
    /// Default: 0.5
    pub row_overlap_threshold: f64,

    /// Number of rows an inter-fragment gap must recur on to become a column
    /// boundary.
    /// Default: 3
    pub column_recurrence_min_rows: usize,

    /// Narrowest whitespace gap (points) that can separate two columns.
    /// Default: 4.0
    pub min_column_gap: f64,

    /// Loose rows within this many typical row heights of a table become its
    /// captions.
    /// Default: 2.5
    pub caption_proximity: f64,

    /// Horizontal gap between glyphs (multiplier of font size) that splits a
    /// text run into separate fragments.
    /// Default: 0.3
    pub word_gap_ratio: f64,

    /// A row closer to its predecessor than this fraction of the table's median
    /// row pitch is a wrapped continuation line.
    /// Default: 0.75
    pub wrap_gap_ratio: f64,

    /// How wrapped continuation lines are joined into their cell.
    pub wrap_join: WrapJoin,

    /// Most entries one address range row may expand into; larger ranges are
    /// skipped as malformed rows.
    /// Default: 16384
    pub max_range_entries: usize,

    /// Column header synonyms per role.
    pub header_vocabulary: HeaderVocabulary,

    /// Band at the top of each page (points) whose text is ignored.
    /// Default: 0.0
    pub margin_top: f64,

    /// Band at the bottom of each page (points) whose text is ignored.
    /// Default: 0.0
    pub margin_bottom: f64,

    /// When set, rows before the first row containing this text are ignored.
    pub section_marker: Option<String>,

    /// Top-level key of the emitted JSON document.
    pub model_name: String,

    /// Indent the emitted JSON.
    pub output_pretty: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            row_overlap_threshold: 0.5,
            column_recurrence_min_rows: 3,
            min_column_gap: 4.0,
            caption_proximity: 2.5,
            word_gap_ratio: 0.3,
            wrap_gap_ratio: 0.75,
            wrap_join: WrapJoin::Space,
            max_range_entries: 16384,
            header_vocabulary: HeaderVocabulary::default(),
            margin_top: 0.0,
            margin_bottom: 0.0,
            section_marker: None,
            model_name: "root".to_string(),
            output_pretty: true,
        }
    }
}

impl MapConfig {
    /// Parse a (possibly partial) TOML document; missing keys keep defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, SysexError> {
        let config: MapConfig =
            toml::from_str(text).map_err(|e| SysexError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SysexError> {
        if !(self.row_overlap_threshold > 0.0 && self.row_overlap_threshold <= 1.0) {
            return Err(SysexError::InvalidConfig(format!(
                "row_overlap_threshold must be in (0, 1], got {}",
                self.row_overlap_threshold
            )));
        }
        if self.column_recurrence_min_rows < 2 {
            return Err(SysexError::InvalidConfig(format!(
                "column_recurrence_min_rows must be at least 2, got {}",
                self.column_recurrence_min_rows
            )));
        }
        if self.min_column_gap <= 0.0 {
            return Err(SysexError::InvalidConfig(format!(
                "min_column_gap must be positive, got {}",
                self.min_column_gap
            )));
        }
        if self.word_gap_ratio <= 0.0 || self.wrap_gap_ratio <= 0.0 || self.caption_proximity < 0.0 {
            return Err(SysexError::InvalidConfig(
                "word_gap_ratio and wrap_gap_ratio must be positive, caption_proximity non-negative"
                    .to_string(),
            ));
        }
        if self.max_range_entries == 0 {
            return Err(SysexError::InvalidConfig("max_range_entries must be at least 1".to_string()));
        }
        if self.margin_top < 0.0 || self.margin_bottom < 0.0 {
            return Err(SysexError::InvalidConfig("margins cannot be negative".to_string()));
        }
        if self.model_name.trim().is_empty() {
            return Err(SysexError::InvalidConfig("model_name cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matching_ignores_case_and_punctuation() {
        let vocab = HeaderVocabulary::default();
        assert_eq!(vocab.role_for("Address"), Some(ColumnRole::Address));
        assert_eq!(vocab.role_for("OFFSET ADDRESS"), Some(ColumnRole::Address));
        assert_eq!(vocab.role_for("Size (bytes)"), Some(ColumnRole::Size));
        assert_eq!(vocab.role_for("Parameter"), Some(ColumnRole::Name));
        assert_eq!(vocab.role_for("Default:"), Some(ColumnRole::Default));
        assert_eq!(vocab.role_for("Reverb Type"), None);
        assert_eq!(vocab.role_for("  "), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = MapConfig::from_toml_str(
            r#"
            column_recurrence_min_rows = 4
            wrap_join = "newline"
            model_name = "jupiter-x"

            [header_vocabulary]
            address = ["adr"]
            "#,
        )
        .unwrap();
        assert_eq!(config.column_recurrence_min_rows, 4);
        assert_eq!(config.wrap_join, WrapJoin::Newline);
        assert_eq!(config.model_name, "jupiter-x");
        assert_eq!(config.row_overlap_threshold, 0.5);
        assert_eq!(config.header_vocabulary.role_for("ADR"), Some(ColumnRole::Address));
        assert_eq!(config.header_vocabulary.role_for("Address"), None);
        assert_eq!(config.header_vocabulary.role_for("Parameter"), Some(ColumnRole::Name));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = MapConfig::from_toml_str("row_overlap_threshold = 1.5").unwrap_err();
        assert!(matches!(err, SysexError::InvalidConfig(_)));
        let err = MapConfig::from_toml_str("max_range_entries = 0").unwrap_err();
        assert!(matches!(err, SysexError::InvalidConfig(_)));
    }
}
