//! Positioned text fragments, and the adapter that produces them from the
//! `pdf-extract` glyph stream.
//!
//! The extraction layer reports one call per glyph with its text matrix. The
//! [`FragmentSink`] groups consecutive glyphs into runs the same way a plain text
//! renderer decides where words break, and records each run's box in page
//! coordinates with the origin at the top-left corner (y grows downward).

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use log::debug;
use pdf_extract::{Document, MediaBox, OutputDev, OutputError, Transform};

use crate::config::MapConfig;
use crate::error::{ExtractionError, InputError};

/// Share of the font size above the baseline covered by a glyph box.
const ASCENT: f64 = 0.8;
/// Share of the font size below the baseline covered by a glyph box.
const DESCENT: f64 = 0.2;
/// Gap (in font sizes) inside a run that stands for a missing space glyph.
const SPACE_GAP: f64 = 0.1;

/// Bounding box for geometric operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    /// Create from position and dimensions
    #[inline]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x_min: x,
            y_min: y,
            x_max: x + width,
            y_max: y + height,
        }
    }

    #[inline]
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x_min: x0.min(x1),
            y_min: y0.min(y1),
            x_max: x0.max(x1),
            y_max: y0.max(y1),
        }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    #[inline]
    pub fn center_x(&self) -> f64 {
        (self.x_min + self.x_max) / 2.0
    }

    #[inline]
    pub fn center_y(&self) -> f64 {
        (self.y_min + self.y_max) / 2.0
    }

    /// Length of the shared vertical extent (0 when disjoint)
    pub fn vertical_overlap(&self, y_min: f64, y_max: f64) -> f64 {
        (self.y_max.min(y_max) - self.y_min.max(y_min)).max(0.0)
    }
}

/// One positioned piece of extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub bbox: BoundingBox,
    pub font_size: f64,
    pub page: u32,
}

impl Fragment {
    pub fn new(page: u32, text: impl Into<String>, bbox: BoundingBox, font_size: f64) -> Self {
        Self {
            text: text.into(),
            bbox,
            font_size,
            page,
        }
    }
}

/// All fragments of one page, in the extraction layer's emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub number: u32,
    pub width: f64,
    pub height: f64,
    pub fragments: Vec<Fragment>,
}

impl Page {
    pub fn new(number: u32, width: f64, height: f64) -> Self {
        Self {
            number,
            width,
            height,
            fragments: Vec::new(),
        }
    }

    /// Drop fragments lying entirely inside the top or bottom margin band.
    fn strip_margins(&mut self, top: f64, bottom: f64) {
        if top <= 0.0 && bottom <= 0.0 {
            return;
        }
        let before = self.fragments.len();
        let bottom_edge = self.height - bottom;
        self.fragments.retain(|f| {
            let in_top = top > 0.0 && f.bbox.y_max <= top;
            let in_bottom = bottom > 0.0 && f.bbox.y_min >= bottom_edge;
            !(in_top || in_bottom)
        });
        debug!(
            "page {}: margins removed {} fragments",
            self.number,
            before - self.fragments.len()
        );
    }
}

/// Anything that can hand out pages of fragments one at a time.
pub trait FragmentSource {
    /// Page numbers in document order.
    fn page_numbers(&self) -> Vec<u32>;

    /// Decode one page. A failure here only costs that page.
    fn extract_page(&self, page: u32, config: &MapConfig) -> Result<Page, ExtractionError>;
}

impl FragmentSource for [Page] {
    fn page_numbers(&self) -> Vec<u32> {
        self.iter().map(|p| p.number).collect()
    }

    fn extract_page(&self, page: u32, _config: &MapConfig) -> Result<Page, ExtractionError> {
        self.iter()
            .find(|p| p.number == page)
            .cloned()
            .ok_or_else(|| ExtractionError {
                page,
                message: "no such page".to_string(),
            })
    }
}

/// Lazily extract the pages of `source` in document order, applying the
/// configured margins.
pub fn pages<'a, S>(
    source: &'a S,
    config: &'a MapConfig,
) -> impl Iterator<Item = Result<Page, ExtractionError>> + 'a
where
    S: FragmentSource + ?Sized,
{
    source.page_numbers().into_iter().map(move |number| {
        let mut page = source.extract_page(number, config)?;
        page.strip_margins(config.margin_top, config.margin_bottom);
        Ok(page)
    })
}

/// A PDF document read through `pdf-extract`.
pub struct PdfSource {
    doc: Document,
    path: PathBuf,
}

impl PdfSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InputError> {
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path).map_err(|source| InputError::Unreadable {
            path: path.clone(),
            source,
        })?;
        let doc = Document::load_mem(&bytes).map_err(|e| InputError::NotPdf {
            path: path.clone(),
            message: e.to_string(),
        })?;
        if doc.is_encrypted() {
            return Err(InputError::Encrypted { path });
        }
        debug!("loaded {} ({} pages)", path.display(), doc.get_pages().len());
        Ok(Self { doc, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FragmentSource for PdfSource {
    fn page_numbers(&self) -> Vec<u32> {
        self.doc.get_pages().keys().copied().collect()
    }

    fn extract_page(&self, page: u32, config: &MapConfig) -> Result<Page, ExtractionError> {
        let mut sink = FragmentSink::new(config.word_gap_ratio);
        // The extraction layer can panic on malformed content streams.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::output_doc_page(&self.doc, &mut sink, page)
        }));
        match result {
            Ok(Ok(())) => Ok(sink.into_page(page)),
            Ok(Err(e)) => Err(ExtractionError {
                page,
                message: e.to_string(),
            }),
            Err(_) => Err(ExtractionError {
                page,
                message: "content stream could not be decoded".to_string(),
            }),
        }
    }
}

/// Text accumulated since the last run break.
#[derive(Debug)]
struct PendingRun {
    text: String,
    x_start: f64,
    /// Pen position after the last glyph (including trailing spaces)
    x_pen: f64,
    /// Right edge of the last non-blank glyph
    x_ink: f64,
    baseline: f64,
    font_size: f64,
}

/// `OutputDev` sink collecting the glyphs of one page into [`Fragment`]s.
pub struct FragmentSink {
    word_gap_ratio: f64,
    page_number: u32,
    origin_x: f64,
    top: f64,
    width: f64,
    height: f64,
    run: Option<PendingRun>,
    fragments: Vec<Fragment>,
}

impl FragmentSink {
    pub fn new(word_gap_ratio: f64) -> Self {
        Self {
            word_gap_ratio,
            page_number: 0,
            origin_x: 0.0,
            top: 0.0,
            width: 0.0,
            height: 0.0,
            run: None,
            fragments: Vec::new(),
        }
    }

    /// Finish the page and hand out what was collected.
    pub fn into_page(mut self, number: u32) -> Page {
        self.flush_run();
        Page {
            number,
            width: self.width,
            height: self.height,
            fragments: self.fragments,
        }
    }

    /// Feed one glyph already expressed in top-left page coordinates.
    ///
    /// `advance` is the horizontal distance the pen moves past the glyph.
    pub fn push_glyph(&mut self, text: &str, x: f64, baseline: f64, advance: f64, font_size: f64) {
        let blank = text.trim().is_empty();
        if self.should_start_new_run(x, baseline, font_size) {
            self.flush_run();
        }

        match self.run.as_mut() {
            Some(run) => {
                // Words placed by positioning alone carry no space glyph
                let spaced = run.text.ends_with(char::is_whitespace);
                if !blank && !spaced && x > run.x_pen + font_size * SPACE_GAP {
                    run.text.push(' ');
                }
                run.text.push_str(text);
                run.x_pen = x + advance;
                if !blank {
                    run.x_ink = x + advance;
                }
            }
            // Leading blanks never open a run
            None if blank => {}
            None => {
                self.run = Some(PendingRun {
                    text: text.to_string(),
                    x_start: x,
                    x_pen: x + advance,
                    x_ink: x + advance,
                    baseline,
                    font_size,
                });
            }
        }
    }

    /// Check if the glyph at (x, baseline) belongs to a new run
    fn should_start_new_run(&self, x: f64, baseline: f64, font_size: f64) -> bool {
        let Some(run) = &self.run else {
            return false;
        };

        let y_diff = (baseline - run.baseline).abs();
        let x_gap = x - run.x_pen;
        let font_changed = (font_size - run.font_size).abs() > 0.1;

        // Start new run if:
        // - Font size changed
        // - Large vertical movement
        // - Large horizontal gap (column or word spacing)
        // - The pen jumped back to the left
        font_changed
            || y_diff > font_size * 0.5
            || x_gap > font_size * self.word_gap_ratio
            || x_gap < -font_size
    }

    fn flush_run(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        let text = run.text.trim();
        if text.is_empty() {
            return;
        }
        let bbox = BoundingBox::from_corners(
            run.x_start,
            run.baseline - run.font_size * ASCENT,
            run.x_ink.max(run.x_start),
            run.baseline + run.font_size * DESCENT,
        );
        self.fragments
            .push(Fragment::new(self.page_number, text, bbox, run.font_size));
    }
}

impl OutputDev for FragmentSink {
    fn begin_page(
        &mut self,
        page_num: u32,
        media_box: &MediaBox,
        _art_box: Option<(f64, f64, f64, f64)>,
    ) -> Result<(), OutputError> {
        self.page_number = page_num;
        self.origin_x = media_box.llx;
        self.top = media_box.ury;
        self.width = media_box.urx - media_box.llx;
        self.height = media_box.ury - media_box.lly;
        self.run = None;
        self.fragments.clear();
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), OutputError> {
        self.flush_run();
        Ok(())
    }

    fn output_character(
        &mut self,
        trm: &Transform,
        width: f64,
        _spacing: f64,
        font_size: f64,
        char: &str,
    ) -> Result<(), OutputError> {
        // Effective size: side of the square with the area of the transformed
        // (font_size, font_size) vector
        let vx = font_size * (trm.m11 + trm.m21);
        let vy = font_size * (trm.m12 + trm.m22);
        let mut size = (vx * vy).abs().sqrt();
        if !size.is_finite() || size <= 0.0 {
            size = font_size.abs();
        }

        let x = trm.m31 - self.origin_x;
        let baseline = self.top - trm.m32;
        self.push_glyph(char, x, baseline, width * size, size);
        Ok(())
    }

    fn begin_word(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_word(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), OutputError> {
        self.flush_run();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_string(sink: &mut FragmentSink, text: &str, x: f64, baseline: f64, size: f64) {
        let advance = size * 0.5;
        for (i, c) in text.chars().enumerate() {
            let mut buf = [0u8; 4];
            sink.push_glyph(c.encode_utf8(&mut buf), x + i as f64 * advance, baseline, advance, size);
        }
    }

    #[test]
    fn spaces_inside_a_run_do_not_split_it() {
        let mut sink = FragmentSink::new(0.3);
        type_string(&mut sink, "Reverb Type", 100.0, 200.0, 10.0);
        let page = sink.into_page(1);
        assert_eq!(page.fragments.len(), 1);
        assert_eq!(page.fragments[0].text, "Reverb Type");
        let bbox = page.fragments[0].bbox;
        assert_eq!(bbox.x_min, 100.0);
        assert_eq!(bbox.x_max, 155.0);
        assert!(bbox.y_min < 200.0 && bbox.y_max > 200.0);
    }

    #[test]
    fn column_gap_and_new_line_split_runs() {
        let mut sink = FragmentSink::new(0.3);
        type_string(&mut sink, "00 00 00", 50.0, 100.0, 10.0);
        type_string(&mut sink, "Reverb", 180.0, 100.0, 10.0);
        type_string(&mut sink, "Chorus", 50.0, 114.0, 10.0);
        let page = sink.into_page(2);
        let texts: Vec<_> = page.fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, ["00 00 00", "Reverb", "Chorus"]);
        assert!(page.fragments.iter().all(|f| f.page == 2));
    }

    #[test]
    fn positioned_words_without_space_glyphs_stay_apart() {
        let mut sink = FragmentSink::new(0.3);
        // Two-glyph words 2pt (0.2 em) apart, no space characters
        for (i, word) in ["00", "00", "10"].iter().enumerate() {
            type_string(&mut sink, word, 50.0 + i as f64 * 12.0, 100.0, 10.0);
        }
        let page = sink.into_page(1);
        let texts: Vec<_> = page.fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, ["00 00 10"]);
        assert_eq!(
            crate::address::parse_address(&page.fragments[0].text).unwrap(),
            vec![0, 0, 0x10]
        );
    }

    #[test]
    fn trailing_blanks_are_trimmed_from_box() {
        let mut sink = FragmentSink::new(0.3);
        type_string(&mut sink, "ON   ", 10.0, 50.0, 10.0);
        let page = sink.into_page(1);
        assert_eq!(page.fragments[0].text, "ON");
        assert_eq!(page.fragments[0].bbox.x_max, 20.0);
    }

    #[test]
    fn margins_drop_running_headers_and_folios() {
        let mut page = Page::new(1, 600.0, 800.0);
        page.fragments.push(Fragment::new(1, "MIDI Implementation", BoundingBox::new(50.0, 10.0, 100.0, 10.0), 10.0));
        page.fragments.push(Fragment::new(1, "Reverb", BoundingBox::new(50.0, 300.0, 40.0, 10.0), 10.0));
        page.fragments.push(Fragment::new(1, "12", BoundingBox::new(290.0, 780.0, 10.0, 10.0), 10.0));
        page.strip_margins(30.0, 30.0);
        let texts: Vec<_> = page.fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, ["Reverb"]);
    }

    #[test]
    fn slice_source_reports_missing_pages() {
        let pages = vec![Page::new(1, 100.0, 100.0)];
        let config = MapConfig::default();
        assert_eq!(pages.as_slice().page_numbers(), vec![1]);
        let err = pages.as_slice().extract_page(4, &config).unwrap_err();
        assert_eq!(err.page, 4);
    }
}
