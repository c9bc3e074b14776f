//! Grammar of the non-address cells: sizes, value ranges, defaults, data
//! bitmasks and parameter names.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::address::parse_address;
use crate::error::RowParseError;

const NUM: &str = r"[+-]?\s?\d+";
const SEP: &str = r"\s*(?:-|–|—|~|\.\.\.|…|\bto\b)\s*";

static RE_NUMERIC_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"^({NUM}){SEP}({NUM})\s*(?:\(\s*({NUM}){SEP}({NUM})\s*\))?\s*(?:\[([^\]]+)\]|([A-Za-z%°][A-Za-z%°/.]*))?$"
    );
    Regex::new(&pattern).expect("valid numeric range regex")
});
static RE_INLINE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*\S)\s*\(([^()]+)\)\s*$").expect("valid inline range regex"));
static RE_BLOCK_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*\[([^\]]+)\]\s*$").expect("valid block type regex"));
static RE_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(\*\)\s*").expect("valid star marker regex"));
static RE_FIRST_INDEX_MID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s\(0*1\)\s").expect("valid index regex"));
static RE_FIRST_INDEX_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\s+0*1|\s*\(0*1\))$").expect("valid index regex"));
static RE_LAST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)(\d+)(\D*)$").expect("valid index regex"));

/// Allowed values of a parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueRange {
    /// Inclusive integer bounds
    Numeric(i64, i64),
    /// Ordered symbolic values, e.g. `OFF, ON`
    Labels(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Integer(i64),
    Label(String),
}

/// A range cell broken into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRange {
    pub range: ValueRange,
    /// Human-facing range printed next to the raw one: `14 - 114 (-50 - +50)`
    pub display: Option<(i64, i64)>,
    pub unit: Option<String>,
}

fn parse_int(text: &str) -> Option<i64> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.strip_prefix('+').unwrap_or(&compact);
    compact.parse().ok()
}

fn ordered(min: i64, max: i64, text: &str) -> Result<(i64, i64), RowParseError> {
    if min > max {
        return Err(RowParseError::BadRange(text.to_string()));
    }
    Ok((min, max))
}

fn looks_numeric(text: &str) -> bool {
    let mut chars = text.chars().skip_while(|c| matches!(c, '+' | '-'));
    chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// Parse a range cell: `0-127`, `-64 - +63`, `14 - 114 (-50 - +50)`,
/// `0 - 100 [%]`, or a comma separated label list such as `OFF, ON`.
pub fn parse_range(text: &str) -> Result<ParsedRange, RowParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(RowParseError::BadRange(String::new()));
    }

    if let Some(caps) = RE_NUMERIC_RANGE.captures(text) {
        let bad = || RowParseError::BadRange(text.to_string());
        let min = parse_int(&caps[1]).ok_or_else(bad)?;
        let max = parse_int(&caps[2]).ok_or_else(bad)?;
        let (min, max) = ordered(min, max, text)?;

        let display = match (caps.get(3), caps.get(4)) {
            (Some(lo), Some(hi)) => {
                let lo = parse_int(lo.as_str()).ok_or_else(bad)?;
                let hi = parse_int(hi.as_str()).ok_or_else(bad)?;
                Some(ordered(lo, hi, text)?)
            }
            _ => None,
        };
        let unit = caps
            .get(5)
            .or_else(|| caps.get(6))
            .map(|m| m.as_str().trim().to_string())
            .filter(|u| !u.is_empty());

        return Ok(ParsedRange {
            range: ValueRange::Numeric(min, max),
            display,
            unit,
        });
    }

    if looks_numeric(text) && !text.contains(',') {
        return Err(RowParseError::BadRange(text.to_string()));
    }

    let labels: Vec<String> = text
        .split(',')
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if labels.is_empty() {
        return Err(RowParseError::BadRange(text.to_string()));
    }
    Ok(ParsedRange {
        range: ValueRange::Labels(labels),
        display: None,
        unit: None,
    })
}

/// Append the labels of a value-list continuation line.
pub fn extend_range(range: &mut ValueRange, more: ValueRange) {
    match (range, more) {
        (ValueRange::Labels(labels), ValueRange::Labels(extra)) => labels.extend(extra),
        (ValueRange::Numeric(min, max), ValueRange::Numeric(lo, hi)) => {
            *min = (*min).min(lo);
            *max = (*max).max(hi);
        }
        // Mixed lists keep the first form
        _ => {}
    }
}

/// Parse a default cell; an empty cell has no default.
pub fn parse_default(text: &str) -> Option<DefaultValue> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(value) = parse_int(text) {
        return Some(DefaultValue::Integer(value));
    }
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_suffix('H'))
        .filter(|h| !h.is_empty() && h.len() <= 4 && h.chars().all(|c| c.is_ascii_hexdigit()));
    if let Some(value) = hex.and_then(|h| i64::from_str_radix(h, 16).ok()) {
        return Some(DefaultValue::Integer(value));
    }
    Some(DefaultValue::Label(text.to_string()))
}

/// Parse a size cell: a decimal byte count (`4`, `4 bytes`) or a multi-byte
/// sysex value (`00 00 00 50`). An empty cell means one byte.
pub fn parse_size(text: &str) -> Result<u32, RowParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(1);
    }
    let bad = || RowParseError::BadSize(text.to_string());

    // Unit words such as `bytes` or `(bytes)` are never hex tokens
    let tokens: Vec<&str> = text
        .split_whitespace()
        .filter(|t| !(t.len() >= 3 && t.chars().all(|c| c.is_ascii_alphabetic() || c == '(' || c == ')')))
        .collect();
    let value = match tokens.as_slice() {
        [single] => single.parse::<u64>().map_err(|_| bad())?,
        [_, _, ..] => crate::address::to_linear(&parse_address(&tokens.join(" ")).map_err(|_| bad())?),
        [] => return Err(bad()),
    };
    if value == 0 {
        return Err(bad());
    }
    u32::try_from(value).map_err(|_| bad())
}

/// Is this a data bitmask cell such as `0aaa aaaa`?
pub fn is_bitmask(text: &str) -> bool {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    (4..=8).contains(&compact.len())
        && compact.chars().all(|c| c == '0' || c == '1' || c.is_ascii_lowercase())
        && compact.chars().any(|c| c.is_ascii_lowercase())
        && compact.chars().any(|c| c == '0' || c == '1')
}

/// Number of value bits in a data bitmask: `0aaa aaaa` → 7, `0000 bbbb` → 4.
pub fn parse_bitmask(text: &str) -> Result<u32, RowParseError> {
    if !is_bitmask(text) {
        return Err(RowParseError::BadBitmask(text.trim().to_string()));
    }
    Ok(text.chars().filter(|c| c.is_ascii_lowercase()).count() as u32)
}

/// A parameter name cell with its decorations separated out
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NameCell {
    pub name: String,
    /// Range written inline: `Reverb Level (0 - 127)`
    pub inline_range: Option<String>,
    /// Block type of a reference row: `Studio Set Common [Studio Set Common]`
    pub block: Option<String>,
}

/// Split a name cell into name, inline range and block type. A leading `(*)`
/// marker is dropped.
pub fn parse_name(text: &str) -> NameCell {
    let mut name = RE_STAR.replace(text.trim(), "").trim().to_string();

    let mut block = None;
    if let Some(caps) = RE_BLOCK_TYPE.captures(&name) {
        if !caps[1].trim().is_empty() {
            block = Some(caps[2].trim().to_string());
            name = caps[1].trim().to_string();
        }
    }

    let mut inline_range = None;
    if let Some(caps) = RE_INLINE_RANGE.captures(&name) {
        if RE_NUMERIC_RANGE.is_match(caps[2].trim()) {
            inline_range = Some(caps[2].trim().to_string());
            name = caps[1].trim().to_string();
        }
    }

    NameCell {
        name,
        inline_range,
        block,
    }
}

/// Name stem shared by the entries of a range row: a trailing first index
/// (`Tone Name 1`, `Part (01)`) is removed.
pub fn range_template(name: &str) -> String {
    let name = RE_FIRST_INDEX_MID.replace_all(name, " ");
    RE_FIRST_INDEX_END.replace(&name, "").trim().to_string()
}

/// A name carrying a running index, e.g. `Part 16` or `Studio Set Part (Part 2)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedName {
    pub prefix: String,
    pub index: u64,
    pub suffix: String,
}

impl IndexedName {
    /// Split at the last run of digits.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = RE_LAST_NUMBER.captures(name)?;
        Some(Self {
            prefix: caps[1].to_string(),
            index: caps[2].parse().ok()?,
            suffix: caps[3].to_string(),
        })
    }

    pub fn same_template(&self, other: &IndexedName) -> bool {
        self.prefix == other.prefix && self.suffix == other.suffix
    }

    pub fn with_index(&self, index: u64) -> String {
        format!("{}{}{}", self.prefix, index, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ranges_with_signs_units_and_display() {
        assert_eq!(parse_range("0-127").unwrap().range, ValueRange::Numeric(0, 127));
        assert_eq!(parse_range("-64 - +63").unwrap().range, ValueRange::Numeric(-64, 63));

        let parsed = parse_range("14 - 114 (-50 - +50)").unwrap();
        assert_eq!(parsed.range, ValueRange::Numeric(14, 114));
        assert_eq!(parsed.display, Some((-50, 50)));

        let parsed = parse_range("0 - 100 [%]").unwrap();
        assert_eq!(parsed.unit.as_deref(), Some("%"));
        let parsed = parse_range("-12 - +12 dB").unwrap();
        assert_eq!(parsed.unit.as_deref(), Some("dB"));
    }

    #[test]
    fn label_lists_keep_their_order() {
        assert_eq!(
            parse_range("OFF, ON").unwrap().range,
            ValueRange::Labels(vec!["OFF".into(), "ON".into()])
        );
        assert_eq!(
            parse_range("ROOM").unwrap().range,
            ValueRange::Labels(vec!["ROOM".into()])
        );
    }

    #[test]
    fn malformed_numeric_ranges_are_errors() {
        assert!(matches!(parse_range("0 -"), Err(RowParseError::BadRange(_))));
        assert!(matches!(parse_range("127 - 0"), Err(RowParseError::BadRange(_))));
        assert!(parse_range("").is_err());
    }

    #[test]
    fn defaults_sizes_and_bitmasks() {
        assert_eq!(parse_default("4"), Some(DefaultValue::Integer(4)));
        assert_eq!(parse_default("-10"), Some(DefaultValue::Integer(-10)));
        assert_eq!(parse_default("40H"), Some(DefaultValue::Integer(0x40)));
        assert_eq!(parse_default("OFF"), Some(DefaultValue::Label("OFF".into())));
        assert_eq!(parse_default(" "), None);

        assert_eq!(parse_size("").unwrap(), 1);
        assert_eq!(parse_size("4 bytes").unwrap(), 4);
        assert_eq!(parse_size("00 00 01 00").unwrap(), 128);
        assert!(matches!(parse_size("0"), Err(RowParseError::BadSize(_))));
        assert!(parse_size("many").is_err());

        assert_eq!(parse_bitmask("0aaa aaaa").unwrap(), 7);
        assert_eq!(parse_bitmask("0000 bbbb").unwrap(), 4);
        assert!(parse_bitmask("Reverb").is_err());
        assert!(!is_bitmask("name"));
    }

    #[test]
    fn name_cells_shed_their_decorations() {
        let cell = parse_name("(*) Tone Name 1 (32 - 127)");
        assert_eq!(cell.name, "Tone Name 1");
        assert_eq!(cell.inline_range.as_deref(), Some("32 - 127"));

        let cell = parse_name("Studio Set Part (Part 1) [Studio Set Part]");
        assert_eq!(cell.name, "Studio Set Part (Part 1)");
        assert_eq!(cell.block.as_deref(), Some("Studio Set Part"));
        assert_eq!(cell.inline_range, None);
    }

    #[test]
    fn range_templates_and_indices() {
        assert_eq!(range_template("Tone Name 1"), "Tone Name");
        assert_eq!(range_template("Part (01)"), "Part");
        assert_eq!(range_template("Reverb Level"), "Reverb Level");

        let first = IndexedName::parse("Studio Set Part (Part 2)").unwrap();
        let last = IndexedName::parse("Studio Set Part (Part 16)").unwrap();
        assert!(first.same_template(&last));
        assert_eq!(first.with_index(3), "Studio Set Part (Part 3)");
        assert_eq!(IndexedName::parse("Reverb"), None);
    }
}
