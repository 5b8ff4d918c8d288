//! COCO format data structures and utilities
//!
//! Only the fields the tiler reads or writes are modelled; unknown keys in
//! the input are ignored.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::Result;
use crate::geometry::BBox;
use crate::projector::Provenance;

/// File name Roboflow-style exports use for the annotation file of a split.
pub const ANNOTATIONS_FILE: &str = "_annotations.coco.json";

/// COCO dataset information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    /// Exporters disagree on whether this is a number or a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<serde_json::Value>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub contributor: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub date_created: String,
}

impl Default for Info {
    fn default() -> Self {
        let now = chrono::Utc::now();
        Self {
            year: Some(chrono::Datelike::year(&now).into()),
            version: "1.0".to_string(),
            description: "Tiled with cocotile".to_string(),
            contributor: "cocotile".to_string(),
            url: String::new(),
            date_created: now.to_rfc3339(),
        }
    }
}

/// COCO license information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// COCO category information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supercategory: Option<String>,
}

/// COCO image information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flickr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coco_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_captured: Option<String>,
}

impl Image {
    pub fn new(id: u64, file_name: String, width: u32, height: u32) -> Self {
        Self {
            id,
            file_name,
            width,
            height,
            license: None,
            flickr_url: None,
            coco_url: None,
            date_captured: None,
        }
    }

    /// File name without directories or extension.
    pub fn stem(&self) -> String {
        crate::utils::file_stem(&self.file_name)
    }
}

/// Segmentation payload: polygons are transformed with the box, anything
/// else (run-length encodings) is carried opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    Polygons(Vec<Vec<f64>>),
    Other(serde_json::Value),
}

/// COCO annotation information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u32,
    pub bbox: [f64; 4], // [x, y, width, height]
    #[serde(default)]
    pub area: f64,
    #[serde(default)]
    pub iscrowd: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Segmentation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl Annotation {
    pub fn new(id: u64, image_id: u64, category_id: u32, bbox: [f64; 4]) -> Self {
        Self {
            id,
            image_id,
            category_id,
            bbox,
            area: bbox[2] * bbox[3],
            iscrowd: 0,
            segmentation: None,
            provenance: None,
        }
    }

    pub fn with_polygons(mut self, polygons: Vec<Vec<f64>>) -> Self {
        self.segmentation = Some(Segmentation::Polygons(polygons));
        self
    }

    pub fn bbox(&self) -> BBox {
        BBox::from_xywh(self.bbox)
    }
}

/// Outcome of [`CocoDataset::sanitize`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SanitizeReport {
    pub kept: usize,
    pub degenerate: usize,
    pub out_of_bounds: usize,
    pub orphaned: usize,
}

impl SanitizeReport {
    pub fn dropped(&self) -> usize {
        self.degenerate + self.out_of_bounds + self.orphaned
    }
}

/// Complete COCO dataset structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CocoDataset {
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub licenses: Vec<License>,
    pub categories: Vec<Category>,
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
}

impl CocoDataset {
    /// Read a dataset from a COCO JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let dataset: CocoDataset = serde_json::from_reader(reader)?;
        info!(
            "Loaded {}: {} images, {} annotations, {} categories",
            path.display(),
            dataset.images.len(),
            dataset.annotations.len(),
            dataset.categories.len()
        );
        Ok(dataset)
    }

    /// Write the dataset as indented JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        Ok(())
    }

    /// A dataset sharing this one's info, licenses and categories but holding
    /// the given images and annotations.
    pub fn with_records(&self, images: Vec<Image>, annotations: Vec<Annotation>) -> Self {
        Self {
            info: self.info.clone(),
            licenses: self.licenses.clone(),
            categories: self.categories.clone(),
            images,
            annotations,
        }
    }

    /// Drop annotations with non-positive size, boxes leaving their image, or
    /// references to unknown images.
    pub fn sanitize(&mut self) -> SanitizeReport {
        let sizes: HashMap<u64, (u32, u32)> = self
            .images
            .iter()
            .map(|image| (image.id, (image.width, image.height)))
            .collect();

        let mut report = SanitizeReport::default();
        self.annotations.retain(|ann| {
            let Some(&(width, height)) = sizes.get(&ann.image_id) else {
                debug!("Dropping annotation {}: unknown image {}", ann.id, ann.image_id);
                report.orphaned += 1;
                return false;
            };
            let bbox = ann.bbox();
            if bbox.width <= 0.0 || bbox.height <= 0.0 {
                debug!("Dropping annotation {}: degenerate bbox {:?}", ann.id, ann.bbox);
                report.degenerate += 1;
                return false;
            }
            if !bbox.is_within(width as f64, height as f64) {
                debug!(
                    "Dropping annotation {}: bbox {:?} outside {}x{} image",
                    ann.id, ann.bbox, width, height
                );
                report.out_of_bounds += 1;
                return false;
            }
            report.kept += 1;
            true
        });

        if report.dropped() > 0 {
            warn!(
                "Dropped {} invalid annotations (degenerate: {}, out of bounds: {}, orphaned: {})",
                report.dropped(),
                report.degenerate,
                report.out_of_bounds,
                report.orphaned
            );
        }
        report
    }

    /// Keep only images referenced by at least one annotation.
    ///
    /// Returns the number of images removed.
    pub fn retain_annotated_images(&mut self) -> usize {
        let annotated: HashSet<u64> = self.annotations.iter().map(|ann| ann.image_id).collect();
        let before = self.images.len();
        self.images.retain(|image| annotated.contains(&image.id));
        let removed = before - self.images.len();
        if removed > 0 {
            info!("Dropped {} images without annotations", removed);
        }
        removed
    }

    /// Annotation count per category id.
    pub fn category_counts(&self) -> BTreeMap<u32, usize> {
        let mut counts: BTreeMap<u32, usize> = self.categories.iter().map(|c| (c.id, 0)).collect();
        for ann in &self.annotations {
            *counts.entry(ann.category_id).or_default() += 1;
        }
        counts
    }

    /// Annotations grouped by owning image id, in file order.
    pub fn annotations_by_image(&self) -> HashMap<u64, Vec<Annotation>> {
        let mut by_image: HashMap<u64, Vec<Annotation>> = HashMap::new();
        for ann in &self.annotations {
            by_image.entry(ann.image_id).or_default().push(ann.clone());
        }
        by_image
    }
}
