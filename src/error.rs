//! Error type shared by the tiling core, the fold partitioner and the
//! command-line pipeline.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("tile size must be non-zero, got {width}x{height}")]
    InvalidTileSize { width: u32, height: u32 },

    #[error("overlap of {overlap}px leaves no positive stride for {width}x{height} tiles")]
    InvalidStride {
        width: u32,
        height: u32,
        overlap: u32,
    },

    #[error("minimum coverage must be within [0, 1], got {0}")]
    InvalidCoverage(f64),

    #[error("resize dimensions must be non-zero, got {width}x{height}")]
    InvalidResize { width: u32, height: u32 },

    #[error("fold count must be at least 1, got {0}")]
    InvalidFoldCount(usize),

    #[error("cannot build {folds} folds from only {groups} image groups")]
    NotEnoughGroups { folds: usize, groups: usize },

    #[error("{name} must be within {range}, got {value}")]
    InvalidFraction {
        name: &'static str,
        value: f64,
        range: &'static str,
    },

    #[error("split ratios must sum to 1 (train={train}, val={val}, test={test})")]
    InvalidSplitRatios { train: f64, val: f64, test: f64 },

    #[error("no COCO annotation file found under {0}")]
    AnnotationsNotFound(PathBuf),

    #[error("output directory {0} already exists, pass --overwrite to regenerate it")]
    OutputExists(PathBuf),

    #[error("output validation failed: {missing} missing images, {category_mismatches} datasets with altered categories")]
    ValidationFailed {
        missing: usize,
        category_mismatches: usize,
    },

    #[error("no valid datasets to merge")]
    NothingToMerge,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
