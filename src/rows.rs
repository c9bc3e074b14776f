//! Grouping of a page's fragments into horizontal rows.

use std::cmp::Ordering;

use log::debug;

use crate::config::MapConfig;
use crate::fragments::Fragment;

/// A row of fragments sharing a vertical band
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Fragments in left-to-right order
    pub fragments: Vec<Fragment>,
    /// Top of the band (union of the fragments' spans)
    pub y_min: f64,
    /// Bottom of the band
    pub y_max: f64,
}

impl Row {
    fn open(fragment: Fragment) -> Self {
        Self {
            y_min: fragment.bbox.y_min,
            y_max: fragment.bbox.y_max,
            fragments: vec![fragment],
        }
    }

    fn push(&mut self, fragment: Fragment) {
        self.y_min = self.y_min.min(fragment.bbox.y_min);
        self.y_max = self.y_max.max(fragment.bbox.y_max);
        self.fragments.push(fragment);
    }

    #[inline]
    pub fn y_center(&self) -> f64 {
        (self.y_min + self.y_max) / 2.0
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn x_min(&self) -> f64 {
        self.fragments
            .iter()
            .map(|f| f.bbox.x_min)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn x_max(&self) -> f64 {
        self.fragments
            .iter()
            .map(|f| f.bbox.x_max)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn page(&self) -> u32 {
        self.fragments.first().map(|f| f.page).unwrap_or(0)
    }

    /// Row text with fragments separated by single spaces
    pub fn text(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Does `fragment` overlap this row's band by more than `threshold` of the
    /// smaller of the two heights?
    fn accepts(&self, fragment: &Fragment, threshold: f64) -> bool {
        let smaller = self.height().min(fragment.bbox.height());
        if smaller <= f64::EPSILON {
            // Degenerate boxes: fall back to center containment
            let c = fragment.bbox.center_y();
            return c >= self.y_min && c <= self.y_max;
        }
        fragment.bbox.vertical_overlap(self.y_min, self.y_max) > threshold * smaller
    }
}

/// Total order used for clustering. Breaking every tie keeps the result
/// independent of the extraction layer's emission order.
fn reading_order(a: &Fragment, b: &Fragment) -> Ordering {
    a.bbox
        .center_y()
        .total_cmp(&b.bbox.center_y())
        .then_with(|| a.bbox.x_min.total_cmp(&b.bbox.x_min))
        .then_with(|| a.bbox.x_max.total_cmp(&b.bbox.x_max))
        .then_with(|| a.bbox.y_min.total_cmp(&b.bbox.y_min))
        .then_with(|| a.text.cmp(&b.text))
        .then_with(|| a.font_size.total_cmp(&b.font_size))
}

/// Cluster one page's fragments into rows, top to bottom.
///
/// Fragments are visited by vertical center; each joins the most recently
/// opened row when its span overlaps the row's span by more than
/// `row_overlap_threshold` of the smaller height, otherwise it opens a new row.
pub fn cluster_rows(mut fragments: Vec<Fragment>, config: &MapConfig) -> Vec<Row> {
    fragments.sort_by(reading_order);

    let mut rows: Vec<Row> = Vec::new();
    for fragment in fragments {
        match rows.last_mut() {
            Some(row) if row.accepts(&fragment, config.row_overlap_threshold) => row.push(fragment),
            _ => rows.push(Row::open(fragment)),
        }
    }

    for row in &mut rows {
        row.fragments.sort_by(|a, b| {
            a.bbox
                .x_min
                .total_cmp(&b.bbox.x_min)
                .then_with(|| a.bbox.x_max.total_cmp(&b.bbox.x_max))
                .then_with(|| a.text.cmp(&b.text))
        });
    }

    debug!("clustered {} rows", rows.len());
    rows
}
