#![allow(dead_code)]

use pdf_sysex_map::error::ExtractionError;
use pdf_sysex_map::{BoundingBox, Fragment, FragmentSource, MapConfig, Page};

pub const FONT_SIZE: f64 = 10.0;
/// Advance of one character at `FONT_SIZE`
pub const CHAR_WIDTH: f64 = 5.0;
/// Vertical distance between consecutive lines
pub const LINE_PITCH: f64 = 14.0;
/// Left edges of the address, size, name, range and default columns
pub const COLUMNS: [f64; 5] = [50.0, 170.0, 220.0, 370.0, 460.0];

pub fn fragment(page: u32, x: f64, y: f64, text: &str) -> Fragment {
    let width = text.chars().count() as f64 * CHAR_WIDTH;
    Fragment::new(page, text, BoundingBox::new(x, y, width, FONT_SIZE), FONT_SIZE)
}

/// Lays out synthetic chart pages line by line, top to bottom.
pub struct PageBuilder {
    page: Page,
    y: f64,
}

impl PageBuilder {
    pub fn new(number: u32) -> Self {
        Self {
            page: Page::new(number, 600.0, 800.0),
            y: 80.0,
        }
    }

    /// One line with a fragment per non-empty cell, cells at [`COLUMNS`].
    pub fn row(self, cells: &[&str]) -> Self {
        let placed: Vec<(f64, &str)> = COLUMNS.iter().copied().zip(cells.iter().copied()).collect();
        self.line(&placed)
    }

    /// One line with fragments at explicit x positions.
    pub fn line(mut self, cells: &[(f64, &str)]) -> Self {
        for (x, text) in cells {
            if !text.is_empty() {
                let f = fragment(self.page.number, *x, self.y, text);
                self.page.fragments.push(f);
            }
        }
        self.y += LINE_PITCH;
        self
    }

    /// A single left-aligned line of prose or a caption.
    pub fn text(self, text: &str) -> Self {
        self.line(&[(COLUMNS[0], text)])
    }

    /// Leave `lines` empty lines.
    pub fn skip(mut self, lines: usize) -> Self {
        self.y += LINE_PITCH * lines as f64;
        self
    }

    pub fn build(self) -> Page {
        self.page
    }
}

/// Pages served from memory, with chosen pages failing to decode.
pub struct FlakySource {
    pub pages: Vec<Page>,
    pub broken: Vec<u32>,
}

impl FragmentSource for FlakySource {
    fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|p| p.number).collect()
    }

    fn extract_page(&self, page: u32, config: &MapConfig) -> Result<Page, ExtractionError> {
        if self.broken.contains(&page) {
            return Err(ExtractionError {
                page,
                message: "corrupt content stream".to_string(),
            });
        }
        self.pages.as_slice().extract_page(page, config)
    }
}

pub const HEADER: [&str; 5] = ["Address", "Size", "Parameter", "Range", "Default"];
