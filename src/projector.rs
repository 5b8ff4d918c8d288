//! Projection of source-image annotations into a single tile.
//!
//! An annotation survives when at least `min_coverage` of its box area lies
//! inside the tile (`IoA >= min_coverage`). Survivors are clipped to the
//! tile, translated to tile-local coordinates and scaled. Polygons are
//! translated and scaled but not clipped, so they may extend past the tile
//! while the box never does.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::coco::{Annotation, Segmentation};
use crate::geometry::intersection_over_area;
use crate::grid::TileRect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileOffset {
    pub x: u32,
    pub y: u32,
}

impl From<(u32, u32)> for TileOffset {
    fn from((x, y): (u32, u32)) -> Self {
        Self { x, y }
    }
}

/// Where a tile annotation came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_annotation_id: u64,
    pub intersection_over_area: f64,
    /// Untransformed `[x, y, width, height]` in source-image pixels.
    pub original_bbox: [f64; 4],
    pub tile_offset: TileOffset,
}

/// Project one annotation into `rect`.
///
/// The returned annotation keeps the source `id` and `image_id`; callers
/// assign the tile's identifiers.
pub fn project_annotation(
    annotation: &Annotation,
    rect: &TileRect,
    min_coverage: f64,
) -> Option<Annotation> {
    let original = annotation.bbox();
    let region = rect.as_bbox();

    if original.is_disjoint(&region) {
        return None;
    }
    let clipped = original.intersect(&region)?;

    let ioa = intersection_over_area(&original, &region);
    if ioa <= 0.0 || ioa < min_coverage {
        debug!(
            "Annotation {} below coverage in tile ({}, {}): {:.3} < {:.3}",
            annotation.id, rect.x, rect.y, ioa, min_coverage
        );
        return None;
    }

    let (offset_x, offset_y) = (rect.x as f64, rect.y as f64);
    let scale = rect.scale;
    let bbox = [
        (clipped.x - offset_x) * scale,
        (clipped.y - offset_y) * scale,
        clipped.width * scale,
        clipped.height * scale,
    ];
    if bbox[2] <= 0.0 || bbox[3] <= 0.0 {
        return None;
    }

    let segmentation = match &annotation.segmentation {
        Some(Segmentation::Polygons(polygons)) => Some(Segmentation::Polygons(
            transform_polygons(polygons, offset_x, offset_y, scale),
        )),
        // Run-length masks are in source-image space and cannot be shifted.
        Some(Segmentation::Other(_)) | None => None,
    };

    Some(Annotation {
        id: annotation.id,
        image_id: annotation.image_id,
        category_id: annotation.category_id,
        bbox,
        area: bbox[2] * bbox[3],
        iscrowd: annotation.iscrowd,
        segmentation,
        provenance: Some(Provenance {
            source_annotation_id: annotation.id,
            intersection_over_area: ioa,
            original_bbox: annotation.bbox,
            tile_offset: TileOffset {
                x: rect.x,
                y: rect.y,
            },
        }),
    })
}

/// Project every annotation of a source image into `rect`, dropping the ones
/// the tile does not sufficiently cover.
pub fn project_annotations(
    annotations: &[Annotation],
    rect: &TileRect,
    min_coverage: f64,
) -> Vec<Annotation> {
    annotations
        .iter()
        .filter_map(|ann| project_annotation(ann, rect, min_coverage))
        .collect()
}

fn transform_polygons(
    polygons: &[Vec<f64>],
    offset_x: f64,
    offset_y: f64,
    scale: f64,
) -> Vec<Vec<f64>> {
    polygons
        .iter()
        .map(|polygon| {
            polygon
                .chunks_exact(2)
                .flat_map(|pair| [(pair[0] - offset_x) * scale, (pair[1] - offset_y) * scale])
                .collect()
        })
        .collect()
}
