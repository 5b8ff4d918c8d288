use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use cocotile::{pipeline, Args};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.annotations.is_none() && !args.input.exists() {
        error!(
            "The specified input directory does not exist: {}",
            args.input.display()
        );
        return ExitCode::FAILURE;
    }

    info!("Starting the tiling process...");

    match pipeline::run(&args) {
        Ok(summary) => {
            info!(
                "Tiling completed: {} tiles from {} images written to {}",
                summary.counts.tiles,
                summary.counts.images,
                args.output.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to tile dataset: {}", e);
            ExitCode::FAILURE
        }
    }
}
