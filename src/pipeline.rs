//! End-to-end run: load the COCO dataset, tile every image in parallel,
//! hand out global identifiers in one sequential pass, build the folds and
//! write fold datasets, manifests and summaries.
//!
//! In tiles-only mode the fold stage is skipped and every tile lands in one
//! flat `train/` dataset.

use image::GenericImageView;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::coco::{Annotation, CocoDataset, Image, ANNOTATIONS_FILE};
use crate::config::Args;
use crate::engine::TilingEngine;
use crate::error::Result;
use crate::folds::{build_folds, FoldAssignment, FoldConfig, TileId, TileSummary};
use crate::grid::TileRect;
use crate::io::{
    check_output, find_annotations_file, link_or_copy_images, read_group_map, save_tile,
    setup_output_directories, setup_tiles_only_directories, write_json,
};
use crate::types::{
    ImageManifestEntry, ManifestAnnotation, OutputDirs, ProcessingStats, RunSummary,
    SourceImageRef, SplitTiles, SummaryConfig, SummaryCounts, TileManifestEntry, TileSize,
};
use crate::utils::{create_io_thread_pool, create_progress_bar, file_stem, tile_file_name};

/// A tile written to disk, before global identifiers are assigned.
#[derive(Debug)]
struct TileRecord {
    file_name: String,
    rect: TileRect,
    size: (u32, u32),
    annotations: Vec<Annotation>,
}

#[derive(Debug)]
enum ImageOutcome {
    Missing,
    Unreadable,
    Tiled(Vec<TileRecord>),
}

/// A tile after the sequential pass: its COCO records and manifest entry.
struct TileEntry {
    tile_file: String,
    image: Image,
    annotations: Vec<Annotation>,
    manifest: TileManifestEntry,
}

/// Source image scheduled for tiling, with the names derived from it.
struct SourceImage<'a> {
    image: &'a Image,
    path: PathBuf,
    tile_stem: String,
    group: String,
    /// Size read from the file header; `None` when the file is missing or
    /// its header cannot be decoded.
    dimensions: Option<(u32, u32)>,
}

/// Everything a run needs, resolved from the command line.
pub struct Pipeline {
    input: PathBuf,
    annotations: Option<PathBuf>,
    output: PathBuf,
    engine: TilingEngine,
    folds: FoldConfig,
    seed: u64,
    quality: u8,
    workers: usize,
    group_map: Option<PathBuf>,
    overwrite: bool,
    validate: bool,
    tiles_only: bool,
    having_annotations: bool,
}

impl Pipeline {
    pub fn from_args(args: &Args) -> Result<Self> {
        let folds = args.fold_config();
        folds.validate_settings()?;
        Ok(Self {
            input: args.input.clone(),
            annotations: args.annotations.clone(),
            output: args.output.clone(),
            engine: TilingEngine::new(args.tiling_config())?,
            folds,
            seed: args.seed,
            quality: args.quality,
            workers: args.workers,
            group_map: args.group_map.clone(),
            overwrite: args.overwrite,
            validate: args.validate,
            tiles_only: args.tiles_only,
            having_annotations: args.having_annotations,
        })
    }

    pub fn run(&self) -> Result<RunSummary> {
        let annotations_path = match &self.annotations {
            Some(path) => path.clone(),
            None => find_annotations_file(&self.input)?,
        };
        let image_root = annotations_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.input.clone());

        let mut dataset = CocoDataset::load(&annotations_path)?;
        dataset.sanitize();
        let unannotated_dropped = if self.having_annotations {
            dataset.retain_annotated_images()
        } else {
            0
        };
        let annotations_by_image = dataset.annotations_by_image();

        let group_map = match &self.group_map {
            Some(path) => read_group_map(path)?,
            None => HashMap::new(),
        };

        let mut order: Vec<&Image> = dataset.images.iter().collect();
        order.shuffle(&mut StdRng::seed_from_u64(self.seed));
        let sources = self.describe_sources(&order, &image_root, &group_map);

        // Fail on an impossible fold count before anything is written.
        if !self.tiles_only {
            let tileable_groups = self.count_tileable_groups(&sources)?;
            self.folds.validate(tileable_groups)?;
        }

        let dirs = if self.tiles_only {
            setup_tiles_only_directories(&self.output, self.overwrite)?
        } else {
            setup_output_directories(&self.output, self.overwrite)?
        };
        info!("Writing output to {}", dirs.root.display());

        let outcomes = self.tile_images(&sources, &annotations_by_image, &dirs.tiles_dir)?;

        let mut stats = ProcessingStats::default();
        let mut entries: Vec<TileEntry> = Vec::new();
        let mut tiles_by_image: HashMap<u64, Vec<TileId>> = HashMap::new();
        let mut next_annotation_id = 1;

        for (source, outcome) in sources.iter().zip(outcomes) {
            let records = match outcome {
                ImageOutcome::Missing => {
                    stats.skipped_missing_image += 1;
                    continue;
                }
                ImageOutcome::Unreadable => {
                    stats.skipped_unreadable_image += 1;
                    continue;
                }
                ImageOutcome::Tiled(records) => records,
            };

            stats.images_processed += 1;
            if records.is_empty() {
                stats.images_without_tiles += 1;
            }

            for record in records {
                let tile_id = entries.len() as TileId + 1;
                let annotations: Vec<Annotation> = record
                    .annotations
                    .into_iter()
                    .map(|mut ann| {
                        ann.id = next_annotation_id;
                        ann.image_id = tile_id;
                        next_annotation_id += 1;
                        ann
                    })
                    .collect();

                stats.tiles_written += 1;
                stats.annotations_projected += annotations.len();
                tiles_by_image.entry(source.image.id).or_default().push(tile_id);

                let file_name = if self.tiles_only {
                    record.file_name.clone()
                } else {
                    format!("images/{}", record.file_name)
                };
                let (width, height) = record.size;
                entries.push(TileEntry {
                    tile_file: record.file_name,
                    image: Image::new(tile_id, file_name.clone(), width, height),
                    manifest: manifest_entry(
                        tile_id,
                        file_name,
                        source,
                        &record.rect,
                        record.size,
                        &annotations,
                    ),
                    annotations,
                });
            }
        }

        let summaries: Vec<TileSummary> = entries
            .iter()
            .map(|entry| {
                TileSummary::new(
                    entry.image.id,
                    entry.manifest.group.clone(),
                    entry.manifest.is_positive,
                )
            })
            .collect();

        let folds = if self.tiles_only {
            let flat = dataset.with_records(
                entries.iter().map(|e| e.image.clone()).collect(),
                entries.iter().flat_map(|e| e.annotations.iter().cloned()).collect(),
            );
            flat.save(&dirs.tiles_dir.join(ANNOTATIONS_FILE))?;
            info!("Wrote {} tiles to {}", entries.len(), dirs.tiles_dir.display());
            Vec::new()
        } else {
            info!("Building {} fold(s) over {} tiles", self.folds.folds, summaries.len());
            let folds = build_folds(&summaries, &self.folds)?;
            for fold in &folds {
                self.write_fold(&dataset, fold, &entries, &dirs)?;
            }
            write_json(&dirs.manifests_dir.join("fold_assignments.json"), &folds)?;
            folds
        };

        let manifest: Vec<&TileManifestEntry> = entries.iter().map(|e| &e.manifest).collect();
        write_json(&dirs.manifests_dir.join("tiles_manifest.json"), &manifest)?;
        let image_entries = images_manifest(&dataset, &sources, &tiles_by_image, &entries);
        write_json(&dirs.manifests_dir.join("images_manifest.json"), &image_entries)?;

        let positive_tiles = summaries.iter().filter(|t| t.positive).count();
        let summary = RunSummary {
            created: chrono::Local::now().to_rfc3339(),
            config: SummaryConfig {
                tiling: self.engine.config().clone(),
                folds: self.folds.clone(),
                tiles_only: self.tiles_only,
                having_annotations: self.having_annotations,
            },
            counts: SummaryCounts {
                images: dataset.images.len(),
                annotations: dataset.annotations.len(),
                tiles: summaries.len(),
                positive_tiles,
                negative_tiles: summaries.len() - positive_tiles,
                tile_annotations: stats.annotations_projected,
                skipped_images: stats.skipped(),
                unannotated_images_dropped: unannotated_dropped,
            },
            folds: folds.iter().map(|f| (f.index, f.stats.clone())).collect(),
        };
        write_json(&dirs.root.join("summary.json"), &summary)?;

        stats.print_summary();
        info!(
            "Total tiles: {} | Positives: {} | Negatives: {}",
            summary.counts.tiles, summary.counts.positive_tiles, summary.counts.negative_tiles
        );
        for fold in &folds {
            info!(
                "Fold {}: train={} tiles, val={} tiles, test={} tiles",
                fold.index, fold.stats.train.tiles, fold.stats.val.tiles, fold.stats.test.tiles
            );
        }

        if self.validate {
            check_output(&dirs, &dataset)?;
        }

        Ok(summary)
    }

    fn describe_sources<'a>(
        &self,
        order: &[&'a Image],
        image_root: &Path,
        group_map: &HashMap<String, String>,
    ) -> Vec<SourceImage<'a>> {
        let mut stem_counts: HashMap<String, usize> = HashMap::new();
        for image in order {
            *stem_counts.entry(image.stem()).or_default() += 1;
        }

        order
            .iter()
            .map(|&image| {
                let stem = image.stem();
                let tile_stem = if stem_counts.get(&stem).copied().unwrap_or(0) > 1 {
                    warn!(
                        "Several images share the stem {:?}; tiles of {} are named with its id",
                        stem, image.file_name
                    );
                    format!("{}_{}", stem, image.id)
                } else {
                    stem.clone()
                };
                let group = group_map
                    .get(&image.file_name)
                    .cloned()
                    .unwrap_or_else(|| file_stem(&image.file_name));
                let path = image_root.join(&image.file_name);
                let dimensions = read_header_dimensions(&path);
                SourceImage {
                    image,
                    path,
                    tile_stem,
                    group,
                    dimensions,
                }
            })
            .collect()
    }

    /// Groups owning at least one readable image whose real size yields a tile.
    fn count_tileable_groups(&self, sources: &[SourceImage<'_>]) -> Result<usize> {
        let mut groups = BTreeSet::new();
        for source in sources {
            let Some((width, height)) = source.dimensions else {
                continue;
            };
            if self.engine.grid(width, height)?.is_empty() {
                continue;
            }
            groups.insert(source.group.as_str());
        }
        Ok(groups.len())
    }

    fn tile_images(
        &self,
        sources: &[SourceImage<'_>],
        annotations_by_image: &HashMap<u64, Vec<Annotation>>,
        tiles_dir: &Path,
    ) -> Result<Vec<ImageOutcome>> {
        let pool = create_io_thread_pool(self.workers)?;
        let pb = create_progress_bar(sources.len() as u64, "Tiling");
        let no_annotations = Vec::new();

        let outcomes = pool.install(|| {
            sources
                .par_iter()
                .map(|source| {
                    let annotations = annotations_by_image
                        .get(&source.image.id)
                        .unwrap_or(&no_annotations);
                    let outcome = self.tile_image(source, annotations, tiles_dir);
                    pb.inc(1);
                    outcome
                })
                .collect::<Result<Vec<_>>>()
        });

        pb.finish_with_message("Tiling complete");
        outcomes
    }

    fn tile_image(
        &self,
        source: &SourceImage<'_>,
        annotations: &[Annotation],
        tiles_dir: &Path,
    ) -> Result<ImageOutcome> {
        if !source.path.is_file() {
            warn!("Skipping missing image: {}", source.path.display());
            return Ok(ImageOutcome::Missing);
        }
        if source.dimensions.is_none() {
            warn!("Skipping image with unreadable header: {}", source.path.display());
            return Ok(ImageOutcome::Unreadable);
        }

        let pixels = match image::open(&source.path) {
            Ok(pixels) => pixels,
            Err(e) => {
                warn!("Skipping unreadable image {}: {}", source.path.display(), e);
                return Ok(ImageOutcome::Unreadable);
            }
        };

        let (width, height) = pixels.dimensions();
        if (width, height) != (source.image.width, source.image.height) {
            warn!(
                "{} is {}x{} but annotated as {}x{}; tiling the decoded size",
                source.image.file_name, width, height, source.image.width, source.image.height
            );
        }

        let mut records = Vec::new();
        for tile in self.engine.tiles(&pixels, annotations)? {
            let (x, y) = tile.offset();
            let file_name = tile_file_name(&source.tile_stem, x, y);
            save_tile(&tile.image, &tiles_dir.join(&file_name), self.quality)?;
            records.push(TileRecord {
                file_name,
                size: tile.size(),
                rect: tile.rect,
                annotations: tile.annotations,
            });
        }

        debug!("{} -> {} tiles", source.image.file_name, records.len());
        Ok(ImageOutcome::Tiled(records))
    }

    fn write_fold(
        &self,
        dataset: &CocoDataset,
        fold: &FoldAssignment,
        entries: &[TileEntry],
        dirs: &OutputDirs,
    ) -> Result<()> {
        let fold_dir = dirs.folds_dir.join(format!("fold_{}", fold.index));
        fs::create_dir_all(&fold_dir)?;

        for (split, tile_ids) in [("train", &fold.train), ("val", &fold.val), ("test", &fold.test)] {
            let split_dir = fold_dir.join(split);
            fs::create_dir_all(&split_dir)?;

            let tiles: Vec<&TileEntry> = tile_ids
                .iter()
                .map(|&id| &entries[(id - 1) as usize])
                .collect();
            let split_dataset = dataset.with_records(
                tiles.iter().map(|t| t.image.clone()).collect(),
                tiles.iter().flat_map(|t| t.annotations.iter().cloned()).collect(),
            );
            split_dataset.save(&split_dir.join(ANNOTATIONS_FILE))?;

            let (positive, negative): (Vec<&TileEntry>, Vec<&TileEntry>) =
                tiles.iter().copied().partition(|t| t.manifest.is_positive);
            let split_tiles = SplitTiles {
                tile_ids: tile_ids.clone(),
                positive_tiles: positive.iter().map(|t| t.image.id).collect(),
                negative_tiles: negative.iter().map(|t| t.image.id).collect(),
            };
            write_json(&split_dir.join("tiles.json"), &split_tiles)?;
        }

        let mut fold_files: Vec<String> = fold
            .train
            .iter()
            .chain(&fold.val)
            .chain(&fold.test)
            .map(|&id| entries[(id - 1) as usize].tile_file.clone())
            .collect();
        fold_files.sort();
        link_or_copy_images(&dirs.tiles_dir, &fold_dir.join("images"), &fold_files)?;

        write_json(&fold_dir.join("summary.json"), &fold.stats)?;
        info!(
            "Fold {}: {} train / {} val / {} test groups",
            fold.index,
            fold.train_groups.len(),
            fold.val_groups.len(),
            fold.test_groups.len()
        );
        Ok(())
    }
}

fn read_header_dimensions(path: &Path) -> Option<(u32, u32)> {
    if !path.is_file() {
        return None;
    }
    match image::image_dimensions(path) {
        Ok(dimensions) => Some(dimensions),
        Err(e) => {
            debug!("Cannot read image header of {}: {}", path.display(), e);
            None
        }
    }
}

/// Convenience wrapper used by the binary.
pub fn run(args: &Args) -> Result<RunSummary> {
    Pipeline::from_args(args)?.run()
}

fn manifest_entry(
    tile_id: TileId,
    file_name: String,
    source: &SourceImage<'_>,
    rect: &TileRect,
    (width, height): (u32, u32),
    annotations: &[Annotation],
) -> TileManifestEntry {
    TileManifestEntry {
        tile_id,
        file_name,
        group: source.group.clone(),
        source_image: SourceImageRef {
            id: source.image.id,
            file_name: source.image.file_name.clone(),
            width: source.image.width,
            height: source.image.height,
        },
        offset: rect.offset().into(),
        tile_size: TileSize { width, height },
        scale: rect.scale,
        is_positive: !annotations.is_empty(),
        annotations: annotations.iter().map(ManifestAnnotation::from).collect(),
    }
}

fn images_manifest(
    dataset: &CocoDataset,
    sources: &[SourceImage<'_>],
    tiles_by_image: &HashMap<u64, Vec<TileId>>,
    entries: &[TileEntry],
) -> Vec<ImageManifestEntry> {
    let groups: BTreeMap<u64, &str> = sources
        .iter()
        .map(|s| (s.image.id, s.group.as_str()))
        .collect();

    dataset
        .images
        .iter()
        .map(|image| {
            let tiles = tiles_by_image.get(&image.id).cloned().unwrap_or_default();
            let (positive_tiles, negative_tiles): (Vec<TileId>, Vec<TileId>) = tiles
                .iter()
                .partition(|&&id| entries[(id - 1) as usize].manifest.is_positive);
            ImageManifestEntry {
                image_id: image.id,
                file_name: image.file_name.clone(),
                group: groups.get(&image.id).copied().unwrap_or_default().to_string(),
                tiles,
                positive_tiles,
                negative_tiles,
            }
        })
        .collect()
}
