//! Sysex address cells and 7-bit address arithmetic.
//!
//! Addresses are sequences of 7-bit bytes, most significant first. Arithmetic
//! treats them as base-128 numbers aligned on the least significant byte, so
//! `[01, 7F] + [00, 01] = [02, 00]`.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::RowParseError;

/// Separators accepted between the two ends of an address range
static RE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*(?:-|–|—|\.\.\.|…|\bto\b|\bthrough\b|\bthru\b)\s*(.+)$")
        .expect("valid address range regex")
});

/// Largest value of one sysex data byte
pub const MAX_COMPONENT: u32 = 0x7F;

/// Longest address accepted; keeps every linear value and sum within a `u64`
pub const MAX_ADDRESS_BYTES: usize = 8;

/// A parsed address column cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressCell {
    Single(Vec<u32>),
    /// Inclusive range, both ends the same width
    Range(Vec<u32>, Vec<u32>),
    /// A vertical ellipsis standing for omitted rows
    Ellipsis,
}

/// Does the cell only hold an ellipsis marker (`:`, `⋮`, `...`)?
pub fn is_ellipsis(text: &str) -> bool {
    let t = text.trim();
    !t.is_empty() && t.chars().all(|c| matches!(c, ':' | '⋮' | '︙' | '.' | '…'))
}

fn parse_token(token: &str) -> Option<Vec<u32>> {
    let hex = if let Some(rest) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(rest)
    } else if let Some(rest) = token.strip_suffix('H').or_else(|| token.strip_suffix('h')) {
        Some(rest)
    } else {
        None
    };

    if let Some(digits) = hex {
        if digits.is_empty() || digits.len() > 2 {
            return None;
        }
        return u32::from_str_radix(digits, 16).ok().map(|v| vec![v]);
    }

    if token.len() >= 3 && token.chars().all(|c| c.is_ascii_digit()) {
        // Decimal linear offset, split into 7-bit bytes
        let value: u64 = token.parse().ok()?;
        return Some(from_linear(value, 1));
    }

    if (1..=2).contains(&token.len()) && token.chars().all(|c| c.is_ascii_hexdigit()) {
        return u32::from_str_radix(token, 16).ok().map(|v| vec![v]);
    }
    None
}

/// Parse a single address such as `00 01 7F`, `01H 00H` or `0x10`.
pub fn parse_address(text: &str) -> Result<Vec<u32>, RowParseError> {
    let bad = || RowParseError::BadAddress(text.trim().to_string());
    let mut components = Vec::new();
    for token in text.split_whitespace() {
        components.extend(parse_token(token).ok_or_else(bad)?);
    }
    if components.is_empty()
        || components.len() > MAX_ADDRESS_BYTES
        || components.iter().any(|c| *c > MAX_COMPONENT)
    {
        return Err(bad());
    }
    Ok(components)
}

/// Parse an address column cell: a single address, a range or an ellipsis.
pub fn parse_address_cell(text: &str) -> Result<AddressCell, RowParseError> {
    let text = text.trim();
    if is_ellipsis(text) {
        return Ok(AddressCell::Ellipsis);
    }
    if let Ok(single) = parse_address(text) {
        return Ok(AddressCell::Single(single));
    }

    let caps = RE_RANGE
        .captures(text)
        .ok_or_else(|| RowParseError::BadAddress(text.to_string()))?;
    let start = parse_address(&caps[1]).map_err(|_| RowParseError::BadAddress(text.to_string()))?;
    let mut end = parse_address(&caps[2]).map_err(|_| RowParseError::BadAddress(text.to_string()))?;

    // `00 10 - 1F` abbreviates the end's leading bytes
    if end.len() < start.len() {
        let mut full = start[..start.len() - end.len()].to_vec();
        full.extend(end);
        end = full;
    }
    if end.len() != start.len() || to_linear(&end) < to_linear(&start) {
        return Err(RowParseError::BadAddress(text.to_string()));
    }
    Ok(AddressCell::Range(start, end))
}

/// Base-128 value of an address.
pub fn to_linear(address: &[u32]) -> u64 {
    address.iter().fold(0u64, |acc, c| (acc << 7) | u64::from(*c & MAX_COMPONENT))
}

/// Address of `value`, at least `width` bytes wide.
pub fn from_linear(mut value: u64, width: usize) -> Vec<u32> {
    let mut components = Vec::with_capacity(width);
    while value > 0 || components.len() < width.max(1) {
        components.push((value & 0x7F) as u32);
        value >>= 7;
    }
    components.reverse();
    components
}

/// 7-bit sum of two addresses aligned on their last byte.
pub fn add(base: &[u32], offset: &[u32]) -> Vec<u32> {
    let width = base.len().max(offset.len());
    from_linear(to_linear(base) + to_linear(offset), width)
}

/// Address `count` bytes after `address`, keeping its width.
pub fn advance(address: &[u32], count: u64) -> Vec<u32> {
    from_linear(to_linear(address) + count, address.len())
}

/// Expand an inclusive range into entries `stride` bytes apart, at most
/// `limit` of them.
pub fn expand_range(
    start: &[u32],
    end: &[u32],
    stride: u32,
    limit: usize,
) -> Result<Vec<Vec<u32>>, RowParseError> {
    let stride = stride.max(1);
    let span = to_linear(end).saturating_sub(to_linear(start));
    if span % u64::from(stride) != 0 {
        return Err(RowParseError::MisalignedRange {
            start: crate::error::format_address(start),
            end: crate::error::format_address(end),
            stride,
        });
    }
    let count = span / u64::from(stride) + 1;
    if count > limit as u64 {
        return Err(RowParseError::RangeTooLarge {
            start: crate::error::format_address(start),
            end: crate::error::format_address(end),
            entries: count,
            limit,
        });
    }
    Ok((0..count)
        .map(|i| advance(start, i * u64::from(stride)))
        .collect())
}
