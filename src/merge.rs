//! Merge several COCO datasets into one.
//!
//! Each source is a directory holding `train/_annotations.coco.json` and its
//! images. Image file names are prefixed with the dataset name, categories
//! are unified by name and every identifier is renumbered from 1.

use log::{info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::coco::{Annotation, Category, CocoDataset, Image, Info, ANNOTATIONS_FILE};
use crate::error::{Error, Result};
use crate::io::ensure_output_dir;
use crate::utils::create_progress_bar;

const SPLIT_DIR: &str = "train";

/// A dataset directory that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSource {
    pub path: PathBuf,
    pub name: String,
}

impl DatasetSource {
    pub fn annotations_path(&self) -> PathBuf {
        self.path.join(SPLIT_DIR).join(ANNOTATIONS_FILE)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    pub datasets: usize,
    pub images: usize,
    pub annotations: usize,
    pub categories: usize,
    pub missing_images: usize,
    pub skipped_annotations: usize,
}

/// Accumulates remapped records across datasets.
#[derive(Debug, Default)]
pub struct DatasetMerger {
    images: Vec<Image>,
    annotations: Vec<Annotation>,
    categories: Vec<Category>,
    category_ids: HashMap<String, u32>,
    missing_images: usize,
    skipped_annotations: usize,
}

impl DatasetMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the directories that contain an annotation file, named after
    /// their last path component.
    pub fn validate_sources(paths: &[PathBuf]) -> Result<Vec<DatasetSource>> {
        let mut sources = Vec::new();
        for path in paths {
            let name = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => {
                    warn!("Cannot derive a dataset name from {}", path.display());
                    continue;
                }
            };
            let source = DatasetSource {
                path: path.clone(),
                name,
            };
            if !source.annotations_path().is_file() {
                warn!(
                    "Annotations file not found: {}",
                    source.annotations_path().display()
                );
                continue;
            }
            info!("{}: {}", source.name, source.annotations_path().display());
            sources.push(source);
        }

        if sources.is_empty() {
            return Err(Error::NothingToMerge);
        }
        Ok(sources)
    }

    /// Map a dataset's categories onto the merged ones, creating the missing
    /// ones. Returns old id -> merged id.
    fn merge_categories(&mut self, categories: &[Category]) -> HashMap<u32, u32> {
        let mut mapping = HashMap::new();
        for category in categories {
            let merged_id = match self.category_ids.get(&category.name) {
                Some(&id) => {
                    info!("Category '{}': reused id {}", category.name, id);
                    id
                }
                None => {
                    let id = self.categories.len() as u32 + 1;
                    self.categories.push(Category {
                        id,
                        name: category.name.clone(),
                        supercategory: category.supercategory.clone(),
                    });
                    self.category_ids.insert(category.name.clone(), id);
                    info!("Category '{}': new id {}", category.name, id);
                    id
                }
            };
            mapping.insert(category.id, merged_id);
        }
        mapping
    }

    /// Renumber and copy a dataset's images. Returns old id -> merged id.
    fn merge_images(
        &mut self,
        source: &DatasetSource,
        images: &[Image],
        output_dir: &Path,
    ) -> Result<HashMap<u64, u64>> {
        let mut mapping = HashMap::new();
        let pb = create_progress_bar(images.len() as u64, &source.name);

        for image in images {
            let file_name = format!("{}_{}", source.name, image.file_name);
            let from = source.path.join(SPLIT_DIR).join(&image.file_name);
            let to = output_dir.join(&file_name);
            if from.is_file() {
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&from, &to)?;
            } else {
                warn!("Image file not found: {}", from.display());
                self.missing_images += 1;
            }

            let id = self.images.len() as u64 + 1;
            self.images.push(Image::new(id, file_name, image.width, image.height));
            mapping.insert(image.id, id);
            pb.inc(1);
        }

        pb.finish_and_clear();
        Ok(mapping)
    }

    fn merge_annotations(
        &mut self,
        annotations: &[Annotation],
        image_ids: &HashMap<u64, u64>,
        category_ids: &HashMap<u32, u32>,
    ) {
        for ann in annotations {
            let Some(&image_id) = image_ids.get(&ann.image_id) else {
                warn!("Image id {} not found in mapping", ann.image_id);
                self.skipped_annotations += 1;
                continue;
            };
            let Some(&category_id) = category_ids.get(&ann.category_id) else {
                warn!("Category id {} not found in mapping", ann.category_id);
                self.skipped_annotations += 1;
                continue;
            };

            self.annotations.push(Annotation {
                id: self.annotations.len() as u64 + 1,
                image_id,
                category_id,
                provenance: None,
                ..ann.clone()
            });
        }
    }

    /// Fold one dataset into the merged collections.
    pub fn add_dataset(&mut self, source: &DatasetSource, output_dir: &Path) -> Result<()> {
        let dataset = CocoDataset::load(&source.annotations_path())?;
        let category_ids = self.merge_categories(&dataset.categories);
        let image_ids = self.merge_images(source, &dataset.images, output_dir)?;
        self.merge_annotations(&dataset.annotations, &image_ids, &category_ids);
        info!(
            "{}: merged {} images and {} annotations",
            source.name,
            image_ids.len(),
            dataset.annotations.len()
        );
        Ok(())
    }

    pub fn stats(&self, datasets: usize) -> MergeStats {
        MergeStats {
            datasets,
            images: self.images.len(),
            annotations: self.annotations.len(),
            categories: self.categories.len(),
            missing_images: self.missing_images,
            skipped_annotations: self.skipped_annotations,
        }
    }

    pub fn into_dataset(self, datasets: usize) -> CocoDataset {
        CocoDataset {
            info: Info {
                description: format!("Merged dataset from {} source datasets", datasets),
                contributor: "cocomerge".to_string(),
                ..Info::default()
            },
            licenses: Vec::new(),
            categories: self.categories,
            images: self.images,
            annotations: self.annotations,
        }
    }
}

/// Merge `paths` into `output/train/_annotations.coco.json`, copying images
/// alongside. Returns the written annotation file and the merge totals.
pub fn merge_datasets(
    paths: &[PathBuf],
    output: &Path,
    overwrite: bool,
) -> Result<(PathBuf, MergeStats)> {
    let sources = DatasetMerger::validate_sources(paths)?;
    info!("Found {} valid datasets to merge", sources.len());

    let root = ensure_output_dir(output, overwrite)?;
    let split_dir = root.join(SPLIT_DIR);
    fs::create_dir_all(&split_dir)?;

    let mut merger = DatasetMerger::new();
    for (i, source) in sources.iter().enumerate() {
        info!("[{}/{}] Processing {}", i + 1, sources.len(), source.name);
        merger.add_dataset(source, &split_dir)?;
    }

    let stats = merger.stats(sources.len());
    let merged = merger.into_dataset(sources.len());
    let annotations_path = split_dir.join(ANNOTATIONS_FILE);
    merged.save(&annotations_path)?;

    info!("=== Merge Summary ===");
    info!("Source datasets: {}", stats.datasets);
    info!("Total images: {}", stats.images);
    info!("Total annotations: {}", stats.annotations);
    info!("Total categories: {}", stats.categories);
    for category in &merged.categories {
        info!("  id {}: {}", category.id, category.name);
    }
    if stats.missing_images > 0 || stats.skipped_annotations > 0 {
        warn!(
            "Missing image files: {}, skipped annotations: {}",
            stats.missing_images, stats.skipped_annotations
        );
    }
    info!("Annotations saved: {}", annotations_path.display());

    Ok((annotations_path, stats))
}
