use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::coco::Annotation;
use crate::folds::{FoldConfig, FoldStats, TileId};
use crate::grid::TilingConfig;
use crate::projector::TileOffset;

// Paths of the top-level output directories; `folds_dir` is absent in tiles-only runs
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub root: PathBuf,
    pub tiles_dir: PathBuf,
    pub folds_dir: PathBuf,
    pub manifests_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceImageRef {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

// Flattened annotation record used in the tile manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestAnnotation {
    pub id: u64,
    pub category_id: u32,
    pub bbox: [f64; 4],
    pub area: f64,
    pub iscrowd: u32,
    pub source_annotation_id: Option<u64>,
    pub intersection_over_area: Option<f64>,
    pub original_bbox: Option<[f64; 4]>,
}

impl From<&Annotation> for ManifestAnnotation {
    fn from(ann: &Annotation) -> Self {
        let provenance = ann.provenance.as_ref();
        Self {
            id: ann.id,
            category_id: ann.category_id,
            bbox: ann.bbox,
            area: ann.area,
            iscrowd: ann.iscrowd,
            source_annotation_id: provenance.map(|p| p.source_annotation_id),
            intersection_over_area: provenance.map(|p| p.intersection_over_area),
            original_bbox: provenance.map(|p| p.original_bbox),
        }
    }
}

// Per-tile metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileManifestEntry {
    pub tile_id: TileId,
    pub file_name: String,
    pub group: String,
    pub source_image: SourceImageRef,
    pub offset: TileOffset,
    pub tile_size: TileSize,
    pub scale: f64,
    pub is_positive: bool,
    pub annotations: Vec<ManifestAnnotation>,
}

// Per-source-image record listing the tiles it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifestEntry {
    pub image_id: u64,
    pub file_name: String,
    pub group: String,
    pub tiles: Vec<TileId>,
    pub positive_tiles: Vec<TileId>,
    pub negative_tiles: Vec<TileId>,
}

// Contents of `tiles.json` next to each split's annotation file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitTiles {
    pub tile_ids: Vec<TileId>,
    pub positive_tiles: Vec<TileId>,
    pub negative_tiles: Vec<TileId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub tiling: TilingConfig,
    pub folds: FoldConfig,
    pub tiles_only: bool,
    pub having_annotations: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryCounts {
    pub images: usize,
    pub annotations: usize,
    pub tiles: usize,
    pub positive_tiles: usize,
    pub negative_tiles: usize,
    pub tile_annotations: usize,
    pub skipped_images: usize,
    pub unannotated_images_dropped: usize,
}

// Contents of the top-level `summary.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: String,
    pub config: SummaryConfig,
    pub counts: SummaryCounts,
    pub folds: BTreeMap<usize, FoldStats>,
}

// Source and tiled annotation counts for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRetention {
    pub id: u32,
    pub name: String,
    pub source_annotations: usize,
    pub tile_annotations: usize,
}

impl CategoryRetention {
    /// Tiled annotations per source annotation; spanning boxes can push it above 1.
    pub fn ratio(&self) -> f64 {
        if self.source_annotations == 0 {
            0.0
        } else {
            self.tile_annotations as f64 / self.source_annotations as f64
        }
    }
}

// Outcome of checking a finished output directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub datasets_checked: usize,
    pub images_checked: usize,
    pub missing_images: usize,
    pub category_mismatches: usize,
    pub retention: Vec<CategoryRetention>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.missing_images == 0 && self.category_mismatches == 0
    }

    pub fn print_summary(&self) {
        log::info!("=== Validation Summary ===");
        log::info!(
            "Datasets checked: {} | Image references: {} | Missing: {}",
            self.datasets_checked,
            self.images_checked,
            self.missing_images
        );
        for category in &self.retention {
            log::info!(
                "{} (id {}): {} -> {} annotations ({:.1}%)",
                category.name,
                category.id,
                category.source_annotations,
                category.tile_annotations,
                category.ratio() * 100.0
            );
            if category.source_annotations > 0 && category.tile_annotations == 0 {
                log::warn!("Category {} lost every annotation during tiling", category.name);
            }
        }
        if self.category_mismatches > 0 {
            log::warn!(
                "{} datasets do not carry the source categories",
                self.category_mismatches
            );
        }
    }
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone)]
pub struct ProcessingStats {
    pub images_processed: usize,
    pub images_without_tiles: usize,
    pub skipped_missing_image: usize,
    pub skipped_unreadable_image: usize,
    pub tiles_written: usize,
    pub annotations_projected: usize,
}

impl ProcessingStats {
    pub fn skipped(&self) -> usize {
        self.skipped_missing_image + self.skipped_unreadable_image
    }

    pub fn print_summary(&self) {
        log::info!("=== Processing Summary ===");
        log::info!("Source images tiled: {}", self.images_processed);
        log::info!("Tiles written: {}", self.tiles_written);
        log::info!("Projected annotations: {}", self.annotations_projected);
        if self.images_without_tiles > 0 {
            log::warn!(
                "Images smaller than one tile (no tiles produced): {}",
                self.images_without_tiles
            );
        }

        if self.skipped() > 0 {
            log::warn!(
                "Total skipped images: {} (missing file: {}, unreadable: {})",
                self.skipped(),
                self.skipped_missing_image,
                self.skipped_unreadable_image
            );
        }
    }
}
