//! Column and table detection over the rows of one page.
//!
//! Columns come from the whitespace "rivers" of a run of rows: the horizontal
//! projection of every fragment in the run is merged into occupied spans, and
//! the gaps between spans are candidate column boundaries. A gap only becomes a
//! boundary when fragments sit on both sides of it on enough rows.

use log::debug;

use crate::config::MapConfig;
use crate::error::{Diagnostics, LayoutAmbiguity, Warning};
use crate::rows::Row;

const EPS: f64 = 1e-6;

/// Horizontal extent of one column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Column {
    pub x_min: f64,
    pub x_max: f64,
}

impl Column {
    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        x >= self.x_min - EPS && x <= self.x_max + EPS
    }

    /// Distance from `x` to the column (0 inside)
    fn distance(&self, x: f64) -> f64 {
        if x < self.x_min {
            self.x_min - x
        } else if x > self.x_max {
            x - self.x_max
        } else {
            0.0
        }
    }
}

/// A detected table: rows that fit a stable set of columns, plus the
/// full-width rows absorbed as its captions.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub page: u32,
    /// Sorted, non-overlapping column ranges
    pub columns: Vec<Column>,
    /// Caption/header rows that do not fit the columns, top to bottom
    pub captions: Vec<Row>,
    /// Rows that fit the columns, top to bottom
    pub rows: Vec<Row>,
}

impl Table {
    /// Index of the column a horizontal position belongs to; positions in a
    /// gap go to the nearest column.
    pub fn column_index(&self, x: f64) -> usize {
        if let Some(i) = self.columns.iter().position(|c| c.contains(x)) {
            return i;
        }
        self.columns
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.distance(x).total_cmp(&b.distance(x)))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    pub fn caption_texts(&self) -> Vec<String> {
        self.captions.iter().map(Row::text).collect()
    }

    fn top(&self) -> f64 {
        self.rows.first().map(|r| r.y_min).unwrap_or(0.0)
    }

    fn bottom(&self) -> f64 {
        self.rows.last().map(|r| r.y_max).unwrap_or(0.0)
    }
}

/// Whitespace gap of a projection: (left edge, right edge)
type Gap = (f64, f64);

/// Occupied spans and the gaps between them for a set of rows.
fn projection<'a>(rows: impl IntoIterator<Item = &'a Row>, min_gap: f64) -> (Vec<Gap>, f64, f64) {
    let mut spans: Vec<(f64, f64)> = rows
        .into_iter()
        .flat_map(|r| r.fragments.iter().map(|f| (f.bbox.x_min, f.bbox.x_max)))
        .collect();
    if spans.is_empty() {
        return (Vec::new(), 0.0, 0.0);
    }
    spans.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start - last.1 < min_gap => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let gaps = merged.windows(2).map(|w| (w[0].1, w[1].0)).collect();
    let x_min = merged[0].0;
    let x_max = merged[merged.len() - 1].1;
    (gaps, x_min, x_max)
}

/// Number of rows with fragments on both sides of `gap`.
fn gap_support(gap: Gap, rows: &[&Row]) -> usize {
    rows.iter()
        .filter(|row| {
            let left = row.fragments.iter().any(|f| f.bbox.center_x() < gap.0);
            let right = row.fragments.iter().any(|f| f.bbox.center_x() > gap.1);
            left && right
        })
        .count()
}

fn multi_fragment_rows(rows: &[&Row]) -> usize {
    rows.iter().filter(|r| r.fragments.len() >= 2).count()
}

/// Rows accumulated for the table currently being grown.
struct TableBuilder<'r> {
    rows: Vec<&'r Row>,
    captions: Vec<&'r Row>,
}

impl<'r> TableBuilder<'r> {
    fn start(row: &'r Row) -> Self {
        Self {
            rows: vec![row],
            captions: Vec::new(),
        }
    }

    fn established(&self, config: &MapConfig) -> bool {
        multi_fragment_rows(&self.rows) >= config.column_recurrence_min_rows
    }

    /// Gaps that new rows must not cross. Before the table is established a
    /// gap needs the support of every multi-fragment row seen so far.
    fn protected_gaps(&self, config: &MapConfig) -> Vec<Gap> {
        let (gaps, _, _) = projection(self.rows.iter().copied(), config.min_column_gap);
        let multi = multi_fragment_rows(&self.rows);
        let required = multi.min(config.column_recurrence_min_rows).max(1);
        gaps.into_iter()
            .filter(|g| gap_support(*g, &self.rows) >= required)
            .collect()
    }

    fn fits(&self, row: &Row, config: &MapConfig) -> bool {
        let candidate = self.rows.iter().copied().chain(std::iter::once(row));
        let (after, _, _) = projection(candidate, config.min_column_gap);
        if after.is_empty() {
            return false;
        }
        if !self.established(config) && row.fragments.len() >= 2 {
            return true;
        }
        self.protected_gaps(config).iter().all(|p| {
            after
                .iter()
                .any(|a| a.0 >= p.0 - EPS && a.1 <= p.1 + EPS)
        })
    }

    /// Settle the columns. Rows that turn out not to be tabular are handed
    /// back as loose rows.
    fn finish(
        self,
        page: u32,
        config: &MapConfig,
        diagnostics: &mut Diagnostics,
    ) -> Result<Table, Vec<&'r Row>> {
        let multi = multi_fragment_rows(&self.rows);
        if self.rows.len() < 2 || multi < 2 {
            let mut loose = self.rows;
            loose.extend(self.captions);
            return Err(loose);
        }

        let (gaps, x_min, x_max) = projection(self.rows.iter().copied(), config.min_column_gap);
        let required = multi.min(config.column_recurrence_min_rows);
        let boundaries: Vec<Gap> = gaps
            .iter()
            .copied()
            .filter(|g| gap_support(*g, &self.rows) >= required)
            .collect();

        debug!(
            "page {}: {} candidate gaps, {} recurrent (required {})",
            page,
            gaps.len(),
            boundaries.len(),
            required
        );

        if boundaries.is_empty() {
            diagnostics.push(Warning::AmbiguousLayout(LayoutAmbiguity {
                page,
                y: self.rows[0].y_min,
                rows: self.rows.len(),
                reason: format!(
                    "no column boundary recurs on {} rows ({} candidate gaps)",
                    required,
                    gaps.len()
                ),
            }));
            let mut loose = self.rows;
            loose.extend(self.captions);
            return Err(loose);
        }

        let mut columns = Vec::with_capacity(boundaries.len() + 1);
        let mut start = x_min;
        for (left, right) in boundaries {
            columns.push(Column { x_min: start, x_max: left });
            start = right;
        }
        columns.push(Column { x_min: start, x_max });

        let mut captions: Vec<Row> = self.captions.into_iter().cloned().collect();
        captions.sort_by(|a, b| a.y_min.total_cmp(&b.y_min));

        Ok(Table {
            page,
            columns,
            captions,
            rows: self.rows.into_iter().cloned().collect(),
        })
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    Some(values[values.len() / 2])
}

/// Detect the tables among one page's rows (top to bottom).
pub fn detect_tables(rows: &[Row], config: &MapConfig, diagnostics: &mut Diagnostics) -> Vec<Table> {
    let page = rows.first().map(Row::page).unwrap_or(0);
    let mut tables: Vec<Table> = Vec::new();
    let mut loose: Vec<&Row> = Vec::new();
    let mut builder: Option<TableBuilder> = None;
    let mut pending_misfit: Option<usize> = None;

    let mut i = 0;
    loop {
        if i >= rows.len() {
            // Page exhausted: close the open table, then rescan a trailing misfit
            let Some(open) = builder.take() else { break };
            match open.finish(page, config, diagnostics) {
                Ok(table) => tables.push(table),
                Err(rows) => loose.extend(rows),
            }
            match pending_misfit.take() {
                Some(first) => {
                    i = first;
                    continue;
                }
                None => break,
            }
        }

        let row = &rows[i];
        let Some(open) = builder.as_mut() else {
            if row.fragments.len() >= 2 {
                builder = Some(TableBuilder::start(row));
            } else {
                loose.push(row);
            }
            i += 1;
            continue;
        };

        if open.fits(row, config) {
            // A single stray row inside a table is one of its captions
            if let Some(m) = pending_misfit.take() {
                open.captions.push(&rows[m]);
            }
            open.rows.push(row);
            i += 1;
        } else if open.rows.len() == 1 {
            // A lone multi-fragment line was not a table after all
            loose.push(open.rows[0]);
            builder = None;
        } else if pending_misfit.is_none() {
            pending_misfit = Some(i);
            i += 1;
        } else if let (Some(first), Some(open)) = (pending_misfit.take(), builder.take()) {
            // Second consecutive misfit closes the table
            match open.finish(page, config, diagnostics) {
                Ok(table) => tables.push(table),
                Err(rows) => loose.extend(rows),
            }
            i = first;
        }
    }

    tables.sort_by(|a, b| a.top().total_cmp(&b.top()));
    attach_captions(&mut tables, loose, rows, config);
    debug!("page {}: {} tables detected", page, tables.len());
    tables
}

/// Hand each loose row to the nearer neighbouring table when it lies within
/// `caption_proximity` typical row heights of it.
fn attach_captions(tables: &mut [Table], loose: Vec<&Row>, all_rows: &[Row], config: &MapConfig) {
    if tables.is_empty() {
        return;
    }
    let typical = median(all_rows.iter().map(Row::height).collect()).unwrap_or(10.0);
    let reach = config.caption_proximity * typical;

    let extents: Vec<(f64, f64)> = tables.iter().map(|t| (t.top(), t.bottom())).collect();
    for row in loose {
        let center = row.y_center();
        let prev = extents
            .iter()
            .enumerate()
            .filter(|(_, (_, bottom))| *bottom <= center)
            .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1));
        let next = extents
            .iter()
            .enumerate()
            .filter(|(_, (top, _))| *top >= center)
            .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0));

        let d_prev = prev.map(|(i, (_, bottom))| (i, row.y_min - bottom));
        let d_next = next.map(|(i, (top, _))| (i, top - row.y_max));

        let target = match (d_prev, d_next) {
            (Some((p, dp)), Some((n, dn))) => {
                if dn <= dp {
                    Some((n, dn))
                } else {
                    Some((p, dp))
                }
            }
            (Some(p), None) => Some(p),
            (None, Some(n)) => Some(n),
            (None, None) => None,
        };

        if let Some((index, distance)) = target {
            if distance <= reach {
                tables[index].captions.push(row.clone());
            }
        }
    }

    for table in tables.iter_mut() {
        table.captions.sort_by(|a, b| a.y_min.total_cmp(&b.y_min));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::{BoundingBox, Fragment};

    /// Row at `y` with one fragment per (x, text); 5pt per character.
    fn row(y: f64, cells: &[(f64, &str)]) -> Row {
        let mut fragments: Vec<Fragment> = cells
            .iter()
            .map(|(x, t)| Fragment::new(1, *t, BoundingBox::new(*x, y, t.len() as f64 * 5.0, 10.0), 10.0))
            .collect();
        fragments.sort_by(|a, b| a.bbox.x_min.total_cmp(&b.bbox.x_min));
        Row {
            fragments,
            y_min: y,
            y_max: y + 10.0,
        }
    }

    fn data_rows(start_y: f64, count: usize) -> Vec<Row> {
        (0..count)
            .map(|i| {
                row(
                    start_y + i as f64 * 14.0,
                    &[(50.0, "00 00 00"), (130.0, "1"), (180.0, "Level"), (330.0, "0-127")],
                )
            })
            .collect()
    }

    #[test]
    fn detects_a_single_table_with_four_columns() {
        let rows = data_rows(100.0, 5);
        let mut diagnostics = Diagnostics::new();
        let tables = detect_tables(&rows, &MapConfig::default(), &mut diagnostics);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].columns.len(), 4);
        assert_eq!(tables[0].rows.len(), 5);
        assert!(diagnostics.is_empty());
        for pair in tables[0].columns.windows(2) {
            assert!(pair[0].x_max < pair[1].x_min);
        }
    }

    #[test]
    fn prose_before_table_becomes_caption_when_close() {
        let mut rows = vec![
            row(40.0, &[(50.0, "Some unrelated prose far above the chart")]),
            row(86.0, &[(50.0, "* [Studio Set Common]")]),
        ];
        rows.extend(data_rows(100.0, 4));
        let tables = detect_tables(&rows, &MapConfig::default(), &mut Diagnostics::new());
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].caption_texts(), vec!["* [Studio Set Common]".to_string()]);
    }

    #[test]
    fn single_misfit_row_inside_table_is_kept_as_caption() {
        let mut rows = data_rows(100.0, 3);
        rows.push(row(142.0, &[(50.0, "a caption wide enough to cross columns")]));
        rows.extend(data_rows(156.0, 3));
        let tables = detect_tables(&rows, &MapConfig::default(), &mut Diagnostics::new());
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 6);
        assert_eq!(tables[0].captions.len(), 1);
    }

    #[test]
    fn geometry_change_starts_a_new_table() {
        let mut rows = data_rows(100.0, 3);
        for i in 0..3 {
            rows.push(row(
                160.0 + i as f64 * 14.0,
                &[(50.0, "Tone Name Character"), (200.0, "32 - 127")],
            ));
        }
        let tables = detect_tables(&rows, &MapConfig::default(), &mut Diagnostics::new());
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].columns.len(), 4);
        assert_eq!(tables[1].columns.len(), 2);
        assert_eq!(tables[1].rows.len(), 3);
    }

    #[test]
    fn unstable_columns_are_reported_and_skipped() {
        let rows = vec![
            row(100.0, &[(0.0, "abcd"), (50.0, "efgh")]),
            row(114.0, &[(0.0, "abcdefghijkl"), (80.0, "mnop")]),
        ];
        let mut diagnostics = Diagnostics::new();
        let tables = detect_tables(&rows, &MapConfig::default(), &mut diagnostics);
        assert!(tables.is_empty());
        assert_eq!(diagnostics.skipped_tables(), 1);
    }

    #[test]
    fn lone_two_fragment_line_is_not_a_table() {
        let rows = vec![
            row(100.0, &[(0.0, "Chapter"), (300.0, "12")]),
            row(114.0, &[(0.0, "A paragraph line that spans the whole measure of the page")]),
        ];
        let mut diagnostics = Diagnostics::new();
        assert!(detect_tables(&rows, &MapConfig::default(), &mut diagnostics).is_empty());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn column_index_snaps_gap_positions_to_nearest_column() {
        let rows = data_rows(100.0, 3);
        let tables = detect_tables(&rows, &MapConfig::default(), &mut Diagnostics::new());
        let table = &tables[0];
        assert_eq!(table.column_index(60.0), 0);
        assert_eq!(table.column_index(125.0), 1);
        assert_eq!(table.column_index(500.0), 3);
    }
}
