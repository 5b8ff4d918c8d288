use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use crate::folds::{FoldConfig, SplitRatios};
use crate::grid::TilingConfig;

/// Slice COCO-annotated images into tiles and build group-aware cross-validation folds.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Directory containing the source images and `_annotations.coco.json`
    #[arg(short = 'i', long = "input", env = "INPUT_PATH", default_value = "./dataset/all/train")]
    pub input: PathBuf,

    /// Explicit COCO annotation file; searched for under --input when omitted
    #[arg(long = "annotations")]
    pub annotations: Option<PathBuf>,

    /// Directory where tiles, folds and manifests are written
    #[arg(short = 'o', long = "output", env = "OUTPUT_PATH", default_value = "./output_crossval")]
    pub output: PathBuf,

    /// Tile width in pixels
    #[arg(long = "tile-width", env = "TILE_WIDTH", default_value_t = 640)]
    pub tile_width: u32,

    /// Tile height in pixels
    #[arg(long = "tile-height", env = "TILE_HEIGHT", default_value_t = 640)]
    pub tile_height: u32,

    /// Overlap between neighbouring tiles in pixels (stride = tile size - overlap)
    #[arg(long = "overlap", env = "TILE_OVERLAP", default_value_t = 0)]
    pub overlap: u32,

    /// Minimum intersection-over-area required to keep a projected bounding box
    #[arg(
        long = "min-ioa",
        visible_alias = "min-coverage",
        env = "MIN_OBJECT_COVERAGE",
        default_value_t = 0.3,
        value_parser = validate_size
    )]
    pub min_ioa: f64,

    /// Rescale tiles to this width after cropping
    #[arg(long = "resize-width", env = "RESIZE_WIDTH", requires = "resize_height")]
    pub resize_width: Option<u32>,

    /// Rescale tiles to this height after cropping
    #[arg(long = "resize-height", env = "RESIZE_HEIGHT", requires = "resize_width")]
    pub resize_height: Option<u32>,

    /// Number of cross-validation folds; 1 builds a single holdout split
    #[arg(long = "folds", env = "FOLDS", default_value_t = 5)]
    pub folds: usize,

    /// Proportion of the non-test images used for validation in each fold
    #[arg(
        long = "val-size",
        visible_aliases = ["val_size", "valperc"],
        default_value_t = 0.2,
        value_parser = validate_fraction
    )]
    pub val_size: f64,

    /// Holdout train proportion (only with --folds 1)
    #[arg(long = "train-split", env = "TRAIN_SPLIT", default_value_t = 0.8, value_parser = validate_size)]
    pub train_split: f64,

    /// Holdout validation proportion (only with --folds 1)
    #[arg(long = "val-split", env = "VAL_SPLIT", default_value_t = 0.1, value_parser = validate_size)]
    pub val_split: f64,

    /// Holdout test proportion (only with --folds 1)
    #[arg(long = "test-split", env = "TEST_SPLIT", default_value_t = 0.1, value_parser = validate_size)]
    pub test_split: f64,

    /// Keep only this fraction of negative tiles in each training split
    #[arg(long = "negative-keep", value_parser = validate_keep)]
    pub negative_keep: Option<f64>,

    /// Seed for image ordering, fold assignment and negative sampling
    #[arg(long = "seed", default_value_t = 42)]
    pub seed: u64,

    /// JPEG quality used when saving tiles
    #[arg(long = "quality", default_value_t = 95, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: u8,

    /// Number of worker threads used for tiling
    #[arg(long = "workers", env = "NUM_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// JSON object mapping image file names to group names (defaults to the file stem)
    #[arg(long = "group-map")]
    pub group_map: Option<PathBuf>,

    /// Overwrite the output directory if it already exists
    #[arg(long = "overwrite")]
    pub overwrite: bool,

    /// Write a single tiled COCO dataset to `<output>/train` and skip fold building
    #[arg(long = "tiles-only", env = "TILES_ONLY")]
    pub tiles_only: bool,

    /// Drop source images that carry no annotations before tiling
    #[arg(long = "having-annotations")]
    pub having_annotations: bool,

    /// Check the written datasets after the run and fail when images are missing
    /// or categories changed
    #[arg(long = "validate")]
    pub validate: bool,
}

impl Args {
    pub fn tiling_config(&self) -> TilingConfig {
        TilingConfig {
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            overlap: self.overlap,
            min_coverage: self.min_ioa,
            resize: self.resize_width.zip(self.resize_height),
        }
    }

    pub fn fold_config(&self) -> FoldConfig {
        FoldConfig {
            folds: self.folds,
            val_fraction: self.val_size,
            seed: self.seed,
            negative_keep: self.negative_keep,
            holdout: SplitRatios {
                train: self.train_split,
                val: self.val_split,
                test: self.test_split,
            },
        }
    }
}

/// Merge several COCO datasets into one, renumbering images, annotations and categories.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct MergeArgs {
    /// Dataset directories, each holding `train/_annotations.coco.json`
    #[arg(long = "datasets", num_args = 1.., required = true)]
    pub datasets: Vec<PathBuf>,

    /// Output directory for the merged dataset
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Overwrite the output directory if it already exists
    #[arg(long = "overwrite")]
    pub overwrite: bool,

    /// Reload the merged annotation file after writing it
    #[arg(long = "validate")]
    pub validate: bool,
}

// Validate that the size is between 0.0 and 1.0
pub fn validate_size(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("SIZE must be between 0.0 and 1.0".to_string()),
    }
}

// Validate that a split fraction is in [0.0, 1.0)
pub fn validate_fraction(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..1.0).contains(&val) => Ok(val),
        _ => Err("FRACTION must be at least 0.0 and below 1.0".to_string()),
    }
}

// Validate that a keep fraction is in (0.0, 1.0]
pub fn validate_keep(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if val > 0.0 && val <= 1.0 => Ok(val),
        _ => Err("FRACTION must be greater than 0.0 and at most 1.0".to_string()),
    }
}
