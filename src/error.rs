//! Error types and the diagnostics list threaded through the pipeline.
//!
//! Only [`SysexError`] aborts a run. Everything else is recorded as a
//! [`Warning`] in [`Diagnostics`] and processing continues with the next page,
//! table or row.

use std::fmt;
use std::path::PathBuf;

use log::warn;

/// Fatal conditions. A run that returns one of these produces no output.
#[derive(Debug, thiserror::Error)]
pub enum SysexError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("no parameter records recovered from the document ({warnings} warnings recorded)")]
    NoParameters { warnings: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The input document could not be opened at all.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a readable PDF document: {message}")]
    NotPdf { path: PathBuf, message: String },

    #[error("{path} is encrypted; encrypted documents are not supported")]
    Encrypted { path: PathBuf },
}

/// A page whose content stream the extraction layer could not decode.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("page {page}: extraction failed: {message}")]
pub struct ExtractionError {
    pub page: u32,
    pub message: String,
}

/// A run of rows that looked tabular but whose columns never stabilised.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("page {page}: ambiguous table layout near y={y:.1} ({rows} rows): {reason}")]
pub struct LayoutAmbiguity {
    pub page: u32,
    pub y: f64,
    pub rows: usize,
    pub reason: String,
}

/// Domain parsing failure for a single data row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowParseError {
    #[error("Invalid address {0:?}")]
    BadAddress(String),

    #[error("Invalid size {0:?}")]
    BadSize(String),

    #[error("Invalid value range {0:?}")]
    BadRange(String),

    #[error("Invalid data bitmask {0:?}")]
    BadBitmask(String),

    #[error("Address range {start} .. {end} is not a whole number of {stride}-byte entries")]
    MisalignedRange { start: String, end: String, stride: u32 },

    #[error("Address range {start} .. {end} expands to {entries} entries, over the limit of {limit}")]
    RangeTooLarge { start: String, end: String, entries: u64, limit: usize },

    #[error("Row has an address but no parameter name")]
    MissingName,

    #[error("Continuation row without a preceding parameter")]
    OrphanContinuation,

    #[error("Address {0} cannot be resolved against the running offset")]
    Unresolvable(String),
}

/// Recoverable conditions collected over a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    SkippedPage(ExtractionError),
    AmbiguousLayout(LayoutAmbiguity),
    UnrecognizedTable {
        page: u32,
        header: Vec<String>,
    },
    SkippedRow {
        page: u32,
        row: String,
        error: RowParseError,
    },
    AddressConflict {
        address: Vec<u32>,
        previous: String,
        replacement: String,
    },
    SizeMismatch {
        page: u32,
        label: Option<String>,
        declared: u64,
        parsed: u64,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::SkippedPage(e) => write!(f, "skipped {}", e),
            Warning::AmbiguousLayout(e) => write!(f, "skipped table, {}", e),
            Warning::UnrecognizedTable { page, header } => {
                write!(f, "page {}: skipped unrecognized table with header {:?}", page, header)
            }
            Warning::SkippedRow { page, row, error } => {
                write!(f, "page {}: skipped row {:?}: {}", page, row, error)
            }
            Warning::AddressConflict { address, previous, replacement } => write!(
                f,
                "address {} redefined: {:?} replaced by {:?}",
                format_address(address),
                previous,
                replacement
            ),
            Warning::SizeMismatch { page, label, declared, parsed } => write!(
                f,
                "page {}: table {} declares total size {} but its parameters span {}",
                page,
                label.as_deref().unwrap_or("(unlabelled)"),
                declared,
                parsed
            ),
        }
    }
}

/// Render an address the way charts print it: `00 01 7F`.
pub fn format_address(address: &[u32]) -> String {
    address
        .iter()
        .map(|c| format!("{:02X}", c))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ordered list of warnings accumulated during one conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning. Every recorded warning is also logged.
    pub fn push(&mut self, warning: Warning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Warning> {
        self.warnings.iter()
    }

    pub fn skipped_rows(&self) -> usize {
        self.count(|w| matches!(w, Warning::SkippedRow { .. }))
    }

    pub fn address_conflicts(&self) -> usize {
        self.count(|w| matches!(w, Warning::AddressConflict { .. }))
    }

    pub fn skipped_pages(&self) -> usize {
        self.count(|w| matches!(w, Warning::SkippedPage(_)))
    }

    pub fn skipped_tables(&self) -> usize {
        self.count(|w| {
            matches!(w, Warning::UnrecognizedTable { .. } | Warning::AmbiguousLayout(_))
        })
    }

    fn count(&self, pred: impl Fn(&Warning) -> bool) -> usize {
        self.warnings.iter().filter(|w| pred(w)).count()
    }

    /// One-line tally for the end-of-run summary.
    pub fn summary(&self) -> String {
        format!(
            "{} warnings: {} pages skipped, {} tables skipped, {} rows skipped, {} address overwrites",
            self.len(),
            self.skipped_pages(),
            self.skipped_tables(),
            self.skipped_rows(),
            self.address_conflicts()
        )
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Warning;
    type IntoIter = std::slice::Iter<'a, Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.warnings.iter()
    }
}

/// Failure reading back an emitted sysex map.
#[derive(Debug, thiserror::Error)]
pub enum MapFormatError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected map shape at {path}: {message}")]
    Shape { path: String, message: String },
}
