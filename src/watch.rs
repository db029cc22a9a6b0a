use crate::pipeline::{SightingSink, VideoPipeline};
use crate::types::PipelineResult;
use failure::Error;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::time::delay_for;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub dir: PathBuf,
    pub extension: String,
    /// How long a new file sits before it is queued. Cameras upload clips
    /// over FTP and the file shows up before it is complete.
    pub settle: Duration,
    pub poll: Duration,
}

/// Runs the watcher and the queue processor until one of them stops. A
/// watcher failure is returned.
pub async fn serve<S>(
    config: WatchConfig,
    pipeline: VideoPipeline,
    sink: S,
) -> Result<(), Error>
where
    S: SightingSink + Send + 'static,
{
    let (tx, rx) = channel(8);
    let watch_task = tokio::spawn(run(config, tx));
    let queue_task = tokio::spawn(process_queue(rx, pipeline, sink));
    tokio::select! {
        result = watch_task => match result {
            Ok(result) => result,
            Err(e) => Err(format_err!("Watcher task failed: {}", e)),
        },
        result = queue_task => result.map_err(|e| format_err!("Queue task failed: {}", e)),
    }
}

/// Polls the watched tree and sends each newly created video to `tx` once it
/// has settled. Files present at start-up are not queued.
pub async fn run(config: WatchConfig, tx: Sender<PathBuf>) -> Result<(), Error> {
    let mut seen = scan(&config.dir, &config.extension)?;
    info!(
        "Watching {} for *.{} ({} existing files ignored)",
        config.dir.display(),
        config.extension,
        seen.len()
    );
    loop {
        delay_for(config.poll).await;
        let found = match scan(&config.dir, &config.extension) {
            Ok(found) => found,
            Err(e) => {
                warn!("Unable to scan {}: {}", config.dir.display(), e);
                continue;
            }
        };
        // processed videos are deleted; forget them so a reused name is queued again
        seen.retain(|path| found.contains(path));
        for path in found {
            if !seen.insert(path.clone()) {
                continue;
            }
            info!("Video queued: {}", path.display());
            let mut tx = tx.clone();
            let settle = config.settle;
            tokio::spawn(async move {
                delay_for(settle).await;
                if let Err(e) = tx.send(path).await {
                    error!("Unable to queue video: {}", e);
                }
            });
        }
    }
}

/// Processes queued videos one at a time, until every sender is gone.
///
/// A video is deleted once its plate has been recorded. Videos with no
/// plate, or whose sighting could not be stored, are left in place.
pub async fn process_queue<S: SightingSink>(
    mut rx: Receiver<PathBuf>,
    mut pipeline: VideoPipeline,
    mut sink: S,
) {
    while let Some(path) = rx.recv().await {
        let outcome = pipeline.process_path(&path).await;
        match outcome {
            Ok(PipelineResult::Detected(entry)) => {
                info!(
                    "{}: plate {} ({} readings)",
                    path.display(),
                    entry.text,
                    entry.count
                );
                match sink.record(&entry.text, &entry.snapshot) {
                    Ok(()) => remove_input(&path),
                    Err(e) => error!("Unable to record plate {}: {}", entry.text, e),
                }
            }
            Ok(PipelineResult::NoDetection) => info!("{}: no plate", path.display()),
            Err(e) => error!(
                "Unable to process {} ({:?}): {}",
                path.display(),
                pipeline.stage(),
                e
            ),
        }
    }
    info!("Video queue closed");
}

fn remove_input(path: &Path) {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) => warn!("Unable to remove {}: {}", path.display(), e),
    }
}

/// Files under `dir` (recursively) with the given extension.
fn scan(dir: &Path, extension: &str) -> io::Result<HashSet<PathBuf>> {
    let mut found = HashSet::new();
    let mut dirs = vec![dir.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.eq_ignore_ascii_case(extension))
            {
                found.insert(path);
            }
        }
    }
    debug!("Found {} *.{} files under {}", found.len(), extension, dir.display());
    Ok(found)
}
