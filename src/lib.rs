//! COCO image tiler and cross-validation fold builder
//!
//! This library slices large COCO-annotated images into fixed-size tiles,
//! projects the annotations into each tile and partitions the tiles into
//! folds that never split a source image across train, validation and test.

pub mod coco;
pub mod config;
pub mod engine;
pub mod error;
pub mod folds;
pub mod geometry;
pub mod grid;
pub mod io;
pub mod merge;
pub mod pipeline;
pub mod projector;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use coco::{Annotation, Category, CocoDataset, Image, Segmentation};
pub use config::{Args, MergeArgs};
pub use engine::{Tile, TilePlan, TilingEngine};
pub use error::{Error, Result};
pub use folds::{build_folds, FoldAssignment, FoldConfig, SplitRatios, TileSummary};
pub use geometry::{intersection_area, intersection_over_area, BBox};
pub use grid::{tile_rects, TileGrid, TileRect, TilingConfig};
pub use merge::merge_datasets;
pub use pipeline::Pipeline;
pub use projector::{project_annotation, project_annotations, Provenance, TileOffset};
pub use types::RunSummary;
