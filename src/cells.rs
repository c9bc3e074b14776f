//! Turning a detected table into a grid of cell strings.

use log::debug;

use crate::config::MapConfig;
use crate::rows::Row;
use crate::tables::Table;

/// One logical table row: a physical row plus any wrapped lines merged into it
#[derive(Debug, Clone, PartialEq)]
pub struct CellRow {
    /// One string per column, empty when the column has no text
    pub cells: Vec<String>,
    pub y_min: f64,
    pub y_max: f64,
    pub page: u32,
}

impl CellRow {
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_empty())
    }

    /// Cells joined with ` | `, for diagnostics
    pub fn display(&self) -> String {
        self.cells.join(" | ")
    }

    fn absorb(&mut self, wrapped: CellRow, separator: &str) {
        for (cell, extra) in self.cells.iter_mut().zip(wrapped.cells) {
            if extra.is_empty() {
                continue;
            }
            if cell.is_empty() {
                *cell = extra;
            } else {
                cell.push_str(separator);
                cell.push_str(&extra);
            }
        }
        self.y_max = self.y_max.max(wrapped.y_max);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTable {
    pub page: u32,
    pub captions: Vec<String>,
    pub rows: Vec<CellRow>,
    pub column_count: usize,
}

fn split_row(table: &Table, row: &Row) -> CellRow {
    let mut cells = vec![String::new(); table.columns.len()];
    for fragment in &row.fragments {
        let cell = &mut cells[table.column_index(fragment.bbox.center_x())];
        if !cell.is_empty() {
            cell.push(' ');
        }
        cell.push_str(&fragment.text);
    }
    CellRow {
        cells,
        y_min: row.y_min,
        y_max: row.y_max,
        page: row.page(),
    }
}

/// Assign every fragment to a column and merge wrapped lines.
///
/// A row whose center sits closer to its predecessor's than `wrap_gap_ratio`
/// times the table's median row pitch is a wrapped continuation.
pub fn assemble(table: &Table, config: &MapConfig) -> AssembledTable {
    let pitches: Vec<f64> = table
        .rows
        .windows(2)
        .map(|w| w[1].y_center() - w[0].y_center())
        .collect();
    let median_pitch = {
        let mut sorted = pitches.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted.get(sorted.len() / 2).copied()
    };
    let wrap_limit = median_pitch.map(|m| m * config.wrap_gap_ratio);

    let mut rows: Vec<CellRow> = Vec::with_capacity(table.rows.len());
    let mut merged = 0;
    for (i, row) in table.rows.iter().enumerate() {
        let cell_row = split_row(table, row);
        let wrapped = i > 0 && matches!(wrap_limit, Some(limit) if pitches[i - 1] < limit);
        match rows.last_mut() {
            Some(previous) if wrapped => {
                previous.absorb(cell_row, config.wrap_join.separator());
                merged += 1;
            }
            _ => rows.push(cell_row),
        }
    }

    if merged > 0 {
        debug!("page {}: merged {} wrapped lines", table.page, merged);
    }

    AssembledTable {
        page: table.page,
        captions: table.caption_texts(),
        rows,
        column_count: table.columns.len(),
    }
}
