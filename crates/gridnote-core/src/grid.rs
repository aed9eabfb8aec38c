//! Grid coordinates and the document geometry provider.

use serde::{Deserialize, Serialize};

/// An inclusive rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRect {
    pub c1: u32,
    pub r1: u32,
    pub c2: u32,
    pub r2: u32,
}

impl CellRect {
    /// Create a rectangle from its corner cells. Corners are normalized.
    pub fn new(c1: u32, r1: u32, c2: u32, r2: u32) -> Self {
        Self {
            c1: c1.min(c2),
            r1: r1.min(r2),
            c2: c1.max(c2),
            r2: r1.max(r2),
        }
    }

    /// A single-cell rectangle.
    pub fn cell(col: u32, row: u32) -> Self {
        Self { c1: col, r1: row, c2: col, r2: row }
    }

    /// Whole rows `r1..=r2` spanning every column.
    pub fn rows(r1: u32, r2: u32) -> Self {
        Self { c1: 0, r1, c2: u32::MAX, r2 }
    }

    /// Whole columns `c1..=c2` spanning every row.
    pub fn cols(c1: u32, c2: u32) -> Self {
        Self { c1, r1: 0, c2, r2: u32::MAX }
    }

    /// A rectangle built through the struct literal may have crossed corners.
    pub fn is_valid(&self) -> bool {
        self.c1 <= self.c2 && self.r1 <= self.r2
    }

    pub fn contains(&self, col: u32, row: u32) -> bool {
        col >= self.c1 && col <= self.c2 && row >= self.r1 && row <= self.r2
    }

    pub fn contains_col(&self, col: u32) -> bool {
        col >= self.c1 && col <= self.c2
    }

    pub fn contains_row(&self, row: u32) -> bool {
        row >= self.r1 && row <= self.r2
    }

    /// Number of rows covered.
    pub fn height(&self) -> u32 {
        (self.r2 - self.r1).saturating_add(1)
    }

    /// Number of columns covered.
    pub fn width(&self) -> u32 {
        (self.c2 - self.c1).saturating_add(1)
    }

    /// The cell that carries the indicator of a merged rectangle: top row,
    /// rightmost column.
    pub fn representative_cell(&self) -> (u32, u32) {
        (self.c2, self.r1)
    }
}

/// Read-only view of the grid that the annotation core consults.
pub trait GridGeometry {
    /// The merged rectangle that contains `(col, row)`, if any.
    fn merged_range_at(&self, col: u32, row: u32) -> Option<CellRect>;

    /// Whether `(col, row)` is inside the currently visible range.
    fn is_visible(&self, col: u32, row: u32) -> bool;
}

/// In-memory geometry: a list of merged rectangles and an optional viewport.
#[derive(Debug, Clone, Default)]
pub struct MergedCells {
    merged: Vec<CellRect>,
    viewport: Option<CellRect>,
}

impl MergedCells {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a merged rectangle.
    pub fn merge(&mut self, rect: CellRect) {
        self.merged.push(rect);
    }

    /// Drop every merged rectangle that intersects `rect`'s top-left cell.
    pub fn unmerge(&mut self, rect: CellRect) {
        self.merged.retain(|m| !m.contains(rect.c1, rect.r1));
    }

    /// Restrict visibility to `viewport`. `None` makes everything visible.
    pub fn set_viewport(&mut self, viewport: Option<CellRect>) {
        self.viewport = viewport;
    }
}

impl GridGeometry for MergedCells {
    fn merged_range_at(&self, col: u32, row: u32) -> Option<CellRect> {
        self.merged.iter().copied().find(|m| m.contains(col, row))
    }

    fn is_visible(&self, col: u32, row: u32) -> bool {
        self.viewport.is_none_or(|v| v.contains(col, row))
    }
}
