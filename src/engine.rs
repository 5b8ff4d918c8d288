//! Per-image tiling: grid generation, pixel cropping and annotation
//! projection. The engine never touches the filesystem and never hands out
//! global identifiers.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::coco::Annotation;
use crate::error::Result;
use crate::grid::{TileGrid, TileRect, TilingConfig};
use crate::projector::project_annotations;

/// Geometry-only result for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub rect: TileRect,
    pub annotations: Vec<Annotation>,
}

impl TilePlan {
    pub fn is_positive(&self) -> bool {
        !self.annotations.is_empty()
    }
}

/// A cropped (and possibly rescaled) tile with its projected annotations.
#[derive(Debug, Clone)]
pub struct Tile {
    pub image: DynamicImage,
    pub rect: TileRect,
    pub annotations: Vec<Annotation>,
}

impl Tile {
    pub fn is_positive(&self) -> bool {
        !self.annotations.is_empty()
    }

    pub fn offset(&self) -> (u32, u32) {
        self.rect.offset()
    }

    /// Pixel size of the emitted tile image.
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[derive(Debug, Clone)]
pub struct TilingEngine {
    config: TilingConfig,
}

impl TilingEngine {
    pub fn new(config: TilingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    pub fn grid(&self, width: u32, height: u32) -> Result<TileGrid> {
        TileGrid::new(&self.config, width, height)
    }

    /// Tile rectangles and their annotations without touching pixels.
    pub fn plan(&self, width: u32, height: u32, annotations: &[Annotation]) -> Result<Vec<TilePlan>> {
        Ok(self
            .grid(width, height)?
            .map(|rect| TilePlan {
                annotations: project_annotations(annotations, &rect, self.config.min_coverage),
                rect,
            })
            .collect())
    }

    /// Lazily cut `image` into tiles in canonical grid order.
    pub fn tiles<'a>(
        &'a self,
        image: &'a DynamicImage,
        annotations: &'a [Annotation],
    ) -> Result<Tiles<'a>> {
        let (width, height) = image.dimensions();
        Ok(Tiles {
            engine: self,
            image,
            annotations,
            grid: self.grid(width, height)?,
        })
    }

    fn cut(&self, image: &DynamicImage, annotations: &[Annotation], rect: TileRect) -> Tile {
        let mut pixels = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
        if self.config.resize.is_some() {
            let (width, height) = rect.output_size();
            pixels = pixels.resize_exact(width, height, FilterType::Lanczos3);
        }
        Tile {
            image: pixels,
            annotations: project_annotations(annotations, &rect, self.config.min_coverage),
            rect,
        }
    }
}

/// Iterator returned by [`TilingEngine::tiles`].
pub struct Tiles<'a> {
    engine: &'a TilingEngine,
    image: &'a DynamicImage,
    annotations: &'a [Annotation],
    grid: TileGrid,
}

impl Iterator for Tiles<'_> {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        let rect = self.grid.next()?;
        Some(self.engine.cut(self.image, self.annotations, rect))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.grid.size_hint()
    }
}

impl ExactSizeIterator for Tiles<'_> {}
