use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use jwalk::WalkDir;
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::coco::{CocoDataset, ANNOTATIONS_FILE};
use crate::error::{Error, Result};
use crate::types::{CategoryRetention, OutputDirs, TileManifestEntry, ValidationReport};
use crate::utils::create_output_directory;

/// Locate the COCO annotation file for `input`.
///
/// `input/_annotations.coco.json` wins; otherwise the shallowest match found
/// anywhere below `input` is used.
pub fn find_annotations_file(input: &Path) -> Result<PathBuf> {
    let direct = input.join(ANNOTATIONS_FILE);
    if direct.is_file() {
        return Ok(direct);
    }

    let found = WalkDir::new(input)
        .sort(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == ANNOTATIONS_FILE)
        .map(|entry| entry.path())
        .min_by_key(|path| path.components().count());

    match found {
        Some(path) => {
            info!("Using annotation file {}", path.display());
            Ok(path)
        }
        None => Err(Error::AnnotationsNotFound(input.to_path_buf())),
    }
}

/// Create `path`, replacing an existing directory only when `overwrite` is set.
pub fn ensure_output_dir(path: &Path, overwrite: bool) -> Result<PathBuf> {
    if path.exists() && !overwrite {
        return Err(Error::OutputExists(path.to_path_buf()));
    }
    Ok(create_output_directory(path)?)
}

/// Set up the directory structure for the tiled output
pub fn setup_output_directories(output: &Path, overwrite: bool) -> Result<OutputDirs> {
    let root = ensure_output_dir(output, overwrite)?;
    let tiles_dir = create_output_directory(&root.join("tiles"))?;
    let folds_dir = create_output_directory(&root.join("folds"))?;
    let manifests_dir = create_output_directory(&root.join("manifests"))?;

    Ok(OutputDirs {
        root,
        tiles_dir,
        folds_dir,
        manifests_dir,
    })
}

/// Set up the flat layout: tiles and a single annotation file under `train/`.
///
/// `folds_dir` is left uncreated.
pub fn setup_tiles_only_directories(output: &Path, overwrite: bool) -> Result<OutputDirs> {
    let root = ensure_output_dir(output, overwrite)?;
    let tiles_dir = create_output_directory(&root.join("train"))?;
    let manifests_dir = create_output_directory(&root.join("manifests"))?;

    Ok(OutputDirs {
        folds_dir: root.join("folds"),
        root,
        tiles_dir,
        manifests_dir,
    })
}

/// Serialize `value` as indented JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    Ok(())
}

/// Read a JSON object mapping image file names to group names.
pub fn read_group_map(path: &Path) -> Result<HashMap<String, String>> {
    let reader = BufReader::new(File::open(path)?);
    let map: HashMap<String, String> = serde_json::from_reader(reader)?;
    info!("Loaded {} group assignments from {}", map.len(), path.display());
    Ok(map)
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_dir(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

/// Point `link` at `tiles_dir`: a relative symlink when the platform allows
/// it, a copy of the listed files otherwise.
pub fn link_or_copy_images(tiles_dir: &Path, link: &Path, file_names: &[String]) -> Result<()> {
    let relative = Path::new("..").join("..").join(
        tiles_dir
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("tiles")),
    );

    match symlink_dir(&relative, link) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(
                "Could not symlink {} ({}), copying {} tiles instead",
                link.display(),
                e,
                file_names.len()
            );
            fs::create_dir_all(link)?;
            for name in file_names {
                fs::copy(tiles_dir.join(name), link.join(name))?;
            }
            Ok(())
        }
    }
}

/// Encode `image` as a JPEG of the given quality.
pub fn save_tile(image: &DynamicImage, path: &Path, quality: u8) -> Result<()> {
    let rgb = image.to_rgb8();
    let writer = BufWriter::new(File::create(path)?);
    let encoder = JpegEncoder::new_with_quality(writer, quality);
    rgb.write_with_encoder(encoder)?;
    Ok(())
}

/// Annotation files written under `dirs`, each paired with the directory
/// its image file names are relative to.
fn output_datasets(dirs: &OutputDirs) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut found = Vec::new();

    let flat = dirs.tiles_dir.join(ANNOTATIONS_FILE);
    if flat.is_file() {
        found.push((flat, dirs.tiles_dir.clone()));
    }

    if dirs.folds_dir.is_dir() {
        let mut fold_dirs: Vec<PathBuf> = fs::read_dir(&dirs.folds_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        fold_dirs.sort();

        for fold_dir in fold_dirs {
            for split in ["train", "val", "test"] {
                let annotations = fold_dir.join(split).join(ANNOTATIONS_FILE);
                if annotations.is_file() {
                    found.push((annotations, fold_dir.clone()));
                }
            }
        }
    }
    Ok(found)
}

fn category_retention(source: &CocoDataset, manifest: &Path) -> Result<Vec<CategoryRetention>> {
    let entries: Vec<TileManifestEntry> = serde_json::from_reader(BufReader::new(File::open(manifest)?))?;
    let mut tiled: BTreeMap<u32, usize> = BTreeMap::new();
    for ann in entries.iter().flat_map(|entry| &entry.annotations) {
        *tiled.entry(ann.category_id).or_default() += 1;
    }

    let source_counts = source.category_counts();
    Ok(source
        .categories
        .iter()
        .map(|category| CategoryRetention {
            id: category.id,
            name: category.name.clone(),
            source_annotations: source_counts.get(&category.id).copied().unwrap_or(0),
            tile_annotations: tiled.get(&category.id).copied().unwrap_or(0),
        })
        .collect())
}

/// Check a finished output directory against the dataset it was tiled from.
///
/// Every written annotation file must reference existing images and carry
/// the source categories unchanged. Per-category retention is computed from
/// the tile manifest. Problems are logged and counted in the report.
pub fn validate_output(dirs: &OutputDirs, source: &CocoDataset) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    for (annotations, base) in output_datasets(dirs)? {
        let dataset = CocoDataset::load(&annotations)?;
        report.datasets_checked += 1;

        if dataset.categories != source.categories {
            warn!("Categories in {} differ from the source", annotations.display());
            report.category_mismatches += 1;
        }

        for image in &dataset.images {
            report.images_checked += 1;
            if !base.join(&image.file_name).is_file() {
                warn!(
                    "Missing image {} referenced by {}",
                    image.file_name,
                    annotations.display()
                );
                report.missing_images += 1;
            }
        }
    }

    report.retention = category_retention(source, &dirs.manifests_dir.join("tiles_manifest.json"))?;
    report.print_summary();
    Ok(report)
}

/// Like [`validate_output`], but a failed check becomes [`Error::ValidationFailed`].
pub fn check_output(dirs: &OutputDirs, source: &CocoDataset) -> Result<ValidationReport> {
    let report = validate_output(dirs, source)?;
    if !report.is_valid() {
        return Err(Error::ValidationFailed {
            missing: report.missing_images,
            category_mismatches: report.category_mismatches,
        });
    }
    info!("Validation passed: {} image references checked", report.images_checked);
    Ok(report)
}
