use crate::config::StorageConfig;
use crate::db::PlateStore;
use crate::pipeline::SightingSink;
use crate::types::Snapshot;
use failure::Error;
use log::info;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes evidence images under `<root>/<plate>/`.
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SnapshotWriter { root: root.into() }
    }

    /// Saves the frame as `<seconds>.jpg` and the plate crop, if any, as
    /// `<seconds>_plate.jpg`. Returns the frame's path.
    pub fn save(&self, plate: &str, snapshot: &Snapshot) -> Result<PathBuf, Error> {
        let dir = self.root.join(dir_name(plate));
        fs::create_dir_all(&dir)?;
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let frame_path = dir.join(format!("{}.jpg", stamp));
        info!("Writing snapshot to {}", frame_path.display());
        snapshot.frame.image().save(&frame_path)?;

        if let Some(crop) = &snapshot.plate {
            crop.save(dir.join(format!("{}_plate.jpg", stamp)))?;
        }
        Ok(frame_path)
    }
}

// OCR output goes into a path. Bytes outside [A-Za-z0-9_-] are written as
// %XX so distinct plates never share a directory.
fn dir_name(plate: &str) -> String {
    if plate.is_empty() {
        return "%".to_string();
    }
    let mut name = String::with_capacity(plate.len());
    for byte in plate.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name
}

/// Stores the snapshot, then records the sighting.
pub struct Archive {
    writer: SnapshotWriter,
    store: PlateStore,
}

impl Archive {
    pub fn new(writer: SnapshotWriter, store: PlateStore) -> Self {
        Archive { writer, store }
    }

    pub fn open(config: &StorageConfig) -> Result<Self, Error> {
        Ok(Archive::new(
            SnapshotWriter::new(&config.snapshot_dir),
            PlateStore::open(&config.db_path)?,
        ))
    }
}

impl SightingSink for Archive {
    fn record(&mut self, text: &str, snapshot: &Snapshot) -> Result<(), Error> {
        self.writer.save(text, snapshot)?;
        self.store.record_sighting(text)?;
        info!(
            "Plate {} has been seen {} times",
            text,
            self.store.sightings(text)?
        );
        Ok(())
    }
}
