use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:32168/v1/";
pub const DEFAULT_DB_PATH: &str = "plates.db";
pub const DEFAULT_SNAPSHOT_DIR: &str = "license_plates";

/// Tokens that OCR picks up from plate frames and badges rather than plates.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "dealer", "toyota", "nissan", "subaru", "hyundai", "lexus", "honda", "mazda",
];

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub service: ServiceConfig,
    pub detection: DetectionConfig,
    pub plate: PlateRules,
    pub sampling: SamplingPolicy,
    pub storage: StorageConfig,
}

/// Where the inference server lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl ServiceConfig {
    /// `Url::join` drops the last path segment unless the base ends with a
    /// slash, so one is appended here.
    pub fn new(mut base_url: Url, timeout: Duration) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        ServiceConfig { base_url, timeout }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig::new(
            Url::parse(DEFAULT_SERVER_URL).expect("default server url is valid"),
            Duration::from_secs(30),
        )
    }
}

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Object detector label that counts as a vehicle.
    pub car_label: String,
    /// Car predictions must score strictly above this.
    pub car_confidence: f64,
    /// Template text the combined ALPR model puts in front of every reading.
    pub alpr_label_prefix: String,
    pub jpeg_quality: u8,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            car_label: "car".to_string(),
            car_confidence: 0.80,
            alpr_label_prefix: "Plate: ".to_string(),
            jpeg_quality: 90,
        }
    }
}

/// Admissible plate text: `min_len..=max_len` characters, not on the denylist.
#[derive(Debug, Clone)]
pub struct PlateRules {
    pub min_len: usize,
    pub max_len: usize,
    pub denylist: Vec<String>,
}

impl Default for PlateRules {
    fn default() -> Self {
        PlateRules {
            min_len: 6,
            max_len: 7,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SamplingPolicy {
    /// Only frames whose 1-based ordinal is a multiple of this are detected.
    /// Captures run at roughly 24 fps, so 3 gives eight detections a second.
    pub interval: u64,
    /// Sampled frames allowed in detection at once.
    pub max_in_flight: usize,
}

impl SamplingPolicy {
    pub fn is_sampled(&self, ordinal: u64) -> bool {
        ordinal % self.interval.max(1) == 0
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight.max(1)
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        SamplingPolicy {
            interval: 3,
            max_in_flight: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub snapshot_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
        }
    }
}
