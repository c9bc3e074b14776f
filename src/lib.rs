//! Reconstruct MIDI implementation chart tables from PDF page layout and emit
//! JSON sysex address maps.
//!
//! The PDF itself is decoded by `pdf-extract`; everything here starts from the
//! positioned glyphs it reports:
//!
//! 1. [`fragments`] groups glyphs into positioned text fragments per page.
//! 2. [`rows`] clusters fragments into horizontal rows.
//! 3. [`tables`] finds runs of rows with stable columns, plus their captions.
//! 4. [`cells`] cuts each table row into cells and merges wrapped lines.
//! 5. [`classify`] recognises column roles from the header vocabulary.
//! 6. [`records`] parses data rows into [`ParameterRecord`]s.
//! 7. [`tree`] resolves addresses and folds records into an [`AddressTree`].
//! 8. [`emit`] renders the tree as JSON and reads it back.
//!
//! Only unreadable input or an empty result is fatal. Every other problem is
//! recorded in the returned [`Diagnostics`] and the run carries on.

use std::collections::HashMap;
use std::path::Path;

use log::debug;

pub mod address;
pub mod cells;
pub mod classify;
pub mod config;
pub mod emit;
pub mod error;
pub mod fragments;
pub mod records;
pub mod rows;
pub mod tables;
pub mod tree;
pub mod values;

pub use config::{ColumnRole, HeaderVocabulary, MapConfig, WrapJoin};
pub use emit::{parse_sysex_map, to_json, ParameterEntry, SysexMap};
pub use error::{Diagnostics, InputError, MapFormatError, SysexError, Warning};
pub use fragments::{BoundingBox, Fragment, FragmentSource, Page, PdfSource};
pub use records::ParameterRecord;
pub use tree::{AddressNode, AddressTree};

use address::to_linear;
use classify::{Placement, TableClassifier, TableSegment};
use error::{format_address, RowParseError};
use tree::{TableContext, TreeBuilder};

/// Counters for the end-of-run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub pages: usize,
    pub pages_skipped: usize,
    pub tables: usize,
    pub records: usize,
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct Conversion {
    pub tree: AddressTree,
    pub diagnostics: Diagnostics,
    pub stats: ConversionStats,
}

impl Conversion {
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        emit::to_json(&self.tree, pretty)
    }
}

/// Convert the PDF at `path`.
pub fn convert_pdf(path: impl AsRef<Path>, config: &MapConfig) -> Result<Conversion, SysexError> {
    let source = PdfSource::load(path)?;
    convert_source(&source, config)
}

/// Convert the pages of any fragment source, in document order.
pub fn convert_source<S>(source: &S, config: &MapConfig) -> Result<Conversion, SysexError>
where
    S: FragmentSource + ?Sized,
{
    config.validate()?;
    let mut pipeline = Pipeline::new(config);
    for page in fragments::pages(source, config) {
        match page {
            Ok(page) => pipeline.page(page),
            Err(e) => {
                pipeline.stats.pages_skipped += 1;
                pipeline.diagnostics.push(Warning::SkippedPage(e));
            }
        }
    }
    pipeline.finish()
}

/// Mutable state of one conversion run
struct Pipeline<'c> {
    config: &'c MapConfig,
    classifier: TableClassifier<'c>,
    builder: TreeBuilder,
    diagnostics: Diagnostics,
    stats: ConversionStats,
    /// The section marker has been seen (or none is configured)
    in_section: bool,
    /// Resolved addresses and names of reference rows, by block type
    references: HashMap<String, Vec<(Vec<u32>, String)>>,
    /// Reference addresses the current table is instantiated at
    mounts: Vec<(Vec<u32>, String)>,
    /// Label of the current logical table
    label: Option<String>,
    /// Lowest start and highest end of the current table's written addresses
    span: Option<(u64, u64)>,
}

impl<'c> Pipeline<'c> {
    fn new(config: &'c MapConfig) -> Self {
        Self {
            config,
            classifier: TableClassifier::new(&config.header_vocabulary),
            builder: TreeBuilder::new(config.model_name.clone()),
            diagnostics: Diagnostics::new(),
            stats: ConversionStats::default(),
            in_section: config.section_marker.is_none(),
            references: HashMap::new(),
            mounts: Vec::new(),
            label: None,
            span: None,
        }
    }

    fn page(&mut self, page: Page) {
        let number = page.number;
        self.stats.pages += 1;
        let mut rows = rows::cluster_rows(page.fragments, self.config);
        debug!("page {}: {} rows", number, rows.len());

        if let (false, Some(marker)) = (self.in_section, self.config.section_marker.as_deref()) {
            match rows.iter().position(|r| r.text().contains(marker)) {
                Some(start) => {
                    debug!("page {}: section {:?} starts", number, marker);
                    rows.drain(..start);
                    self.in_section = true;
                }
                None => return,
            }
        }

        for table in tables::detect_tables(&rows, self.config, &mut self.diagnostics) {
            let assembled = cells::assemble(&table, self.config);
            for segment in self.classifier.classify(&assembled, &mut self.diagnostics) {
                self.segment(segment);
            }
        }
    }

    /// Block references an offset table without its own base is mounted at.
    fn mounts_for(&self, segment: &TableSegment) -> Vec<(Vec<u32>, String)> {
        if segment.shape.placement != Placement::Offset || segment.captions.base.is_some() {
            return Vec::new();
        }
        segment
            .captions
            .label
            .as_ref()
            .and_then(|label| self.references.get(label))
            .cloned()
            .unwrap_or_default()
    }

    fn segment(&mut self, segment: TableSegment) {
        self.stats.tables += 1;
        let parsed = records::parse_segment(&segment, self.config, &mut self.diagnostics);

        if !segment.continuation {
            self.mounts = self.mounts_for(&segment);
            self.label = segment.captions.label.clone();
            self.span = None;
        }
        for record in &parsed.records {
            let start = to_linear(&record.address);
            let end = start + u64::from(record.size_bytes);
            self.span = Some(match self.span {
                Some((lo, hi)) => (lo.min(start), hi.max(end)),
                None => (start, end),
            });
        }
        if let Some(declared) = parsed.declared_size {
            let extent = self.span.map(|(lo, hi)| hi - lo).unwrap_or(0);
            if extent != declared {
                self.diagnostics.push(Warning::SizeMismatch {
                    page: segment.page,
                    label: self.label.clone(),
                    declared,
                    parsed: extent,
                });
            }
        }

        let contexts: Vec<TableContext> = if self.mounts.is_empty() {
            vec![TableContext {
                label: segment.captions.label.clone(),
                base: segment.captions.base.clone(),
                continuation: segment.continuation,
                mount: false,
            }]
        } else {
            debug!(
                "mounting {:?} at {} references",
                self.label,
                self.mounts.len()
            );
            self.mounts
                .iter()
                .map(|(base, name)| TableContext {
                    label: Some(name.clone()),
                    base: Some(base.clone()),
                    continuation: false,
                    mount: true,
                })
                .collect()
        };

        for context in contexts {
            self.builder.begin_table(context);
            for record in &parsed.records {
                self.fold(segment.page, record.clone());
            }
            self.builder.end_table();
        }
    }

    fn fold(&mut self, page: u32, record: ParameterRecord) {
        let written = format!("{} | {}", format_address(&record.address), record.name);
        let reference = record.block.clone().map(|block| (block, record.name.clone()));
        match self.builder.fold(record, &mut self.diagnostics) {
            Ok(resolved) => {
                self.stats.records += 1;
                if let Some((block, name)) = reference {
                    self.references.entry(block).or_default().push((resolved, name));
                }
            }
            Err(error) => self.skip(page, written, error),
        }
    }

    fn skip(&mut self, page: u32, row: String, error: RowParseError) {
        self.diagnostics.push(Warning::SkippedRow { page, row, error });
    }

    fn finish(self) -> Result<Conversion, SysexError> {
        if self.builder.folded() == 0 {
            return Err(SysexError::NoParameters {
                warnings: self.diagnostics.len(),
            });
        }
        let tree = self.builder.finish();
        debug!(
            "{} pages, {} tables, {} records, {}",
            self.stats.pages,
            self.stats.tables,
            self.stats.records,
            self.diagnostics.summary()
        );
        Ok(Conversion {
            tree,
            diagnostics: self.diagnostics,
            stats: self.stats,
        })
    }
}
