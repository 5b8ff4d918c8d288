//! Tile grid construction.
//!
//! A grid is a regular stride walk over the image plus the right-edge column,
//! bottom-edge row and corner tile needed to cover whatever the regular walk
//! leaves uncovered. Tiles are only ever cropped, never shrunk, so every
//! rectangle has exactly the configured tile size.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::BBox;

/// Tile geometry and projection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilingConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    /// Overlap between neighbouring tiles in pixels.
    pub overlap: u32,
    /// Minimum intersection-over-area for an annotation to survive in a tile.
    pub min_coverage: f64,
    /// Output size tiles are rescaled to, as `(width, height)`.
    pub resize: Option<(u32, u32)>,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_width: 512,
            tile_height: 512,
            overlap: 0,
            min_coverage: 0.3,
            resize: None,
        }
    }
}

impl TilingConfig {
    pub fn new(tile_width: u32, tile_height: u32, overlap: u32) -> Self {
        Self {
            tile_width,
            tile_height,
            overlap,
            ..Self::default()
        }
    }

    pub fn with_min_coverage(mut self, min_coverage: f64) -> Self {
        self.min_coverage = min_coverage;
        self
    }

    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize = Some((width, height));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(Error::InvalidTileSize {
                width: self.tile_width,
                height: self.tile_height,
            });
        }
        self.stride()?;
        if !(0.0..=1.0).contains(&self.min_coverage) {
            return Err(Error::InvalidCoverage(self.min_coverage));
        }
        if let Some((width, height)) = self.resize {
            if width == 0 || height == 0 {
                return Err(Error::InvalidResize { width, height });
            }
        }
        Ok(())
    }

    /// Distance between the origins of neighbouring tiles.
    pub fn stride(&self) -> Result<(u32, u32)> {
        match (
            self.tile_width.checked_sub(self.overlap),
            self.tile_height.checked_sub(self.overlap),
        ) {
            (Some(sx), Some(sy)) if sx > 0 && sy > 0 => Ok((sx, sy)),
            _ => Err(Error::InvalidStride {
                width: self.tile_width,
                height: self.tile_height,
                overlap: self.overlap,
            }),
        }
    }

    /// Uniform factor applied to tile pixels and annotation coordinates.
    pub fn scale(&self) -> f64 {
        match self.resize {
            Some((width, height)) => (width as f64 / self.tile_width as f64)
                .min(height as f64 / self.tile_height as f64),
            None => 1.0,
        }
    }
}

/// One tile rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub scale: f64,
}

impl TileRect {
    pub fn offset(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    pub fn as_bbox(&self) -> BBox {
        BBox::new(
            self.x as f64,
            self.y as f64,
            self.width as f64,
            self.height as f64,
        )
    }

    /// Pixel size of the tile once `scale` has been applied.
    pub fn output_size(&self) -> (u32, u32) {
        (
            ((self.width as f64 * self.scale).round() as u32).max(1),
            ((self.height as f64 * self.scale).round() as u32).max(1),
        )
    }
}

/// Restartable iterator over the tile rectangles of one image.
///
/// Order: regular grid row-major, then the right-edge column top to bottom,
/// then the bottom-edge row left to right, then the corner tile.
#[derive(Debug, Clone)]
pub struct TileGrid {
    tile_width: u32,
    tile_height: u32,
    scale: f64,
    columns: Vec<u32>,
    rows: Vec<u32>,
    right_edge: Option<u32>,
    bottom_edge: Option<u32>,
    cursor: usize,
}

impl TileGrid {
    pub fn new(config: &TilingConfig, image_width: u32, image_height: u32) -> Result<Self> {
        config.validate()?;
        let (stride_x, stride_y) = config.stride()?;
        let (tile_width, tile_height) = (config.tile_width, config.tile_height);

        let mut grid = Self {
            tile_width,
            tile_height,
            scale: config.scale(),
            columns: Vec::new(),
            rows: Vec::new(),
            right_edge: None,
            bottom_edge: None,
            cursor: 0,
        };

        // Undersized images produce no tiles.
        if image_width < tile_width || image_height < tile_height {
            return Ok(grid);
        }

        grid.columns = (0..=image_width - tile_width)
            .step_by(stride_x as usize)
            .collect();
        grid.rows = (0..=image_height - tile_height)
            .step_by(stride_y as usize)
            .collect();

        grid.right_edge = grid
            .columns
            .last()
            .filter(|&&x| x + tile_width < image_width)
            .map(|_| image_width - tile_width);
        grid.bottom_edge = grid
            .rows
            .last()
            .filter(|&&y| y + tile_height < image_height)
            .map(|_| image_height - tile_height);

        Ok(grid)
    }

    /// Rewind to the first tile.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn has_right_edge(&self) -> bool {
        self.right_edge.is_some()
    }

    pub fn has_bottom_edge(&self) -> bool {
        self.bottom_edge.is_some()
    }

    fn total(&self) -> usize {
        let (cols, rows) = (self.columns.len(), self.rows.len());
        let right = self.right_edge.map_or(0, |_| rows);
        let bottom = self.bottom_edge.map_or(0, |_| cols);
        let corner = usize::from(self.right_edge.is_some() && self.bottom_edge.is_some());
        cols * rows + right + bottom + corner
    }

    fn origin_at(&self, index: usize) -> Option<(u32, u32)> {
        let (cols, rows) = (self.columns.len(), self.rows.len());
        let mut i = index;

        if i < cols * rows {
            return Some((self.columns[i % cols], self.rows[i / cols]));
        }
        i -= cols * rows;

        if let Some(x) = self.right_edge {
            if i < rows {
                return Some((x, self.rows[i]));
            }
            i -= rows;
        }

        if let Some(y) = self.bottom_edge {
            if i < cols {
                return Some((self.columns[i], y));
            }
            i -= cols;
        }

        match (self.right_edge, self.bottom_edge) {
            (Some(x), Some(y)) if i == 0 => Some((x, y)),
            _ => None,
        }
    }
}

impl Iterator for TileGrid {
    type Item = TileRect;

    fn next(&mut self) -> Option<TileRect> {
        let (x, y) = self.origin_at(self.cursor)?;
        self.cursor += 1;
        Some(TileRect {
            x,
            y,
            width: self.tile_width,
            height: self.tile_height,
            scale: self.scale,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total().saturating_sub(self.cursor);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileGrid {}

/// Collect the full ordered tile list for an image.
pub fn tile_rects(
    config: &TilingConfig,
    image_width: u32,
    image_height: u32,
) -> Result<Vec<TileRect>> {
    Ok(TileGrid::new(config, image_width, image_height)?.collect())
}
