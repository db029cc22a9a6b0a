mod config;
mod db;
mod error;
mod frame;
mod pipeline;
mod prediction;
mod storage;
mod strategy;
#[cfg(test)]
mod testing;
mod tracker;
mod types;
mod validator;
mod video;
mod watch;

use crate::config::{
    Config, DetectionConfig, PlateRules, SamplingPolicy, ServiceConfig, StorageConfig,
};
use crate::pipeline::VideoPipeline;
use crate::prediction::{HttpInference, PredictionClient};
use crate::storage::Archive;
use crate::strategy::StrategyKind;
use crate::validator::PlateValidator;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[macro_use]
extern crate failure;

/// Reads license plates from motion-triggered camera clips.
#[derive(Parser)]
#[command(name = "plate-watch", version)]
struct Cli {
    #[command(flatten)]
    options: Options,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one video, or a directory of frames, and print the plate.
    Process {
        path: PathBuf,
        /// Print the result without saving snapshots or touching the database.
        #[arg(long)]
        no_store: bool,
    },
    /// Process every new video that appears under a directory.
    Watch {
        dir: PathBuf,
        #[arg(long, default_value_t = 60)]
        settle_secs: u64,
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
        #[arg(long, default_value = "mp4")]
        extension: String,
    },
}

#[derive(Args)]
struct Options {
    /// Base URL of the inference server.
    #[arg(long, env = "PLATE_SERVER_URL", default_value = config::DEFAULT_SERVER_URL, global = true)]
    server: Url,
    #[arg(long, env = "PLATE_REQUEST_TIMEOUT_SECS", default_value_t = 30, global = true)]
    request_timeout_secs: u64,
    #[arg(long, value_enum, env = "PLATE_STRATEGY", default_value_t = StrategyKind::Cascade, global = true)]
    strategy: StrategyKind,
    #[arg(long, env = "PLATE_SAMPLING_INTERVAL", default_value_t = 3, global = true)]
    sampling_interval: u64,
    /// Sampled frames sent for detection at the same time.
    #[arg(long, env = "PLATE_MAX_IN_FLIGHT", default_value_t = 1, global = true)]
    max_in_flight: usize,
    #[arg(long, env = "PLATE_CAR_CONFIDENCE", default_value_t = 0.80, global = true)]
    car_confidence: f64,
    #[arg(long, env = "PLATE_MIN_LEN", default_value_t = 6, global = true)]
    plate_min_len: usize,
    #[arg(long, env = "PLATE_MAX_LEN", default_value_t = 7, global = true)]
    plate_max_len: usize,
    /// Comma separated OCR readings to ignore. Replaces the built-in list.
    #[arg(long, env = "PLATE_DENYLIST", value_delimiter = ',', global = true)]
    denylist: Option<Vec<String>>,
    #[arg(long, env = "PLATE_DB", default_value = config::DEFAULT_DB_PATH, global = true)]
    db: PathBuf,
    #[arg(long, env = "PLATE_SNAPSHOTS", default_value = config::DEFAULT_SNAPSHOT_DIR, global = true)]
    snapshots: PathBuf,
}

impl Options {
    fn into_config(self) -> Config {
        let plate = match self.denylist {
            Some(denylist) => PlateRules {
                min_len: self.plate_min_len,
                max_len: self.plate_max_len,
                denylist,
            },
            None => PlateRules {
                min_len: self.plate_min_len,
                max_len: self.plate_max_len,
                ..PlateRules::default()
            },
        };
        Config {
            service: ServiceConfig::new(
                self.server,
                Duration::from_secs(self.request_timeout_secs),
            ),
            detection: DetectionConfig {
                car_confidence: self.car_confidence,
                ..DetectionConfig::default()
            },
            plate,
            sampling: SamplingPolicy {
                interval: self.sampling_interval,
                max_in_flight: self.max_in_flight,
            },
            storage: StorageConfig {
                db_path: self.db,
                snapshot_dir: self.snapshots,
            },
        }
    }
}

fn build_pipeline(config: &Config, kind: StrategyKind) -> Result<VideoPipeline, failure::Error> {
    let client = PredictionClient::new(
        HttpInference::new(&config.service)?,
        config.detection.clone(),
        PlateValidator::new(&config.plate),
    );
    Ok(VideoPipeline::new(
        strategy::build(kind, client),
        config.sampling,
    ))
}

async fn run(cli: Cli) -> Result<(), failure::Error> {
    let kind = cli.options.strategy;
    let config = cli.options.into_config();
    let mut pipeline = build_pipeline(&config, kind)?;

    match cli.command {
        Command::Process { path, no_store } => {
            let result = if no_store {
                pipeline.process_path(&path).await?
            } else {
                let mut archive = Archive::open(&config.storage)?;
                pipeline.process_and_record(&path, &mut archive).await?
            };
            println!("{}", result.plate_text());
        }
        Command::Watch {
            dir,
            settle_secs,
            poll_secs,
            extension,
        } => {
            video::ensure_decodes_files(&extension)?;
            let archive = Archive::open(&config.storage)?;
            let watch_config = watch::WatchConfig {
                dir,
                extension,
                settle: Duration::from_secs(settle_secs),
                poll: Duration::from_secs(poll_secs),
            };
            watch::serve(watch_config, pipeline, archive).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-watch");

    if let Err(e) = run(Cli::parse()).await {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("Exiting main");
}
