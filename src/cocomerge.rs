use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use cocotile::{merge_datasets, CocoDataset, MergeArgs};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = MergeArgs::parse();

    info!(
        "Merging {} datasets into {}",
        args.datasets.len(),
        args.output.display()
    );

    let merged = merge_datasets(&args.datasets, &args.output, args.overwrite);
    let (annotations_path, stats) = match merged {
        Ok(merged) => merged,
        Err(e) => {
            error!("Failed to merge datasets: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.validate {
        match CocoDataset::load(&annotations_path) {
            Ok(dataset) if dataset.images.len() == stats.images => {
                info!("Validation passed: {} images reloaded", dataset.images.len());
            }
            Ok(dataset) => {
                error!(
                    "Validation failed: expected {} images, found {}",
                    stats.images,
                    dataset.images.len()
                );
                return ExitCode::FAILURE;
            }
            Err(e) => {
                error!("Validation failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
