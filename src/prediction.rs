use crate::config::{DetectionConfig, ServiceConfig};
use crate::types::Prediction;
use crate::validator::PlateValidator;
use async_trait::async_trait;
use failure::Error;
use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

const PREDICTIONS_KEY: &str = "predictions";
const IMAGE_FIELD: &str = "image";

/// The inference server capabilities this crate uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ObjectDetection,
    LicensePlate,
    Ocr,
    Alpr,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::ObjectDetection => "vision/detection",
            Endpoint::LicensePlate => "vision/custom/license-plate",
            Endpoint::Ocr => "image/ocr",
            Endpoint::Alpr => "image/alpr",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Sends one encoded image to an endpoint and returns the decoded JSON reply.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn predict(&self, endpoint: Endpoint, image: Vec<u8>) -> Result<Value, Error>;
}

#[async_trait]
impl<T: InferenceService + ?Sized> InferenceService for Arc<T> {
    async fn predict(&self, endpoint: Endpoint, image: Vec<u8>) -> Result<Value, Error> {
        (**self).predict(endpoint, image).await
    }
}

/// Talks to the inference server over HTTP, posting the image as a
/// multipart upload.
pub struct HttpInference {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpInference {
    pub fn new(config: &ServiceConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(HttpInference {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl InferenceService for HttpInference {
    async fn predict(&self, endpoint: Endpoint, image: Vec<u8>) -> Result<Value, Error> {
        let url = self.base_url.join(endpoint.path())?;
        let part = Part::bytes(image)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part(IMAGE_FIELD, part);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}

/// Turns raw server replies into filtered, typed predictions.
///
/// Nothing here fails: an unreachable server, an unexpected reply, or a reply
/// without a `predictions` array all mean "nothing detected".
pub struct PredictionClient<S> {
    service: S,
    config: DetectionConfig,
    validator: PlateValidator,
}

impl<S: InferenceService> PredictionClient<S> {
    pub fn new(service: S, config: DetectionConfig, validator: PlateValidator) -> Self {
        PredictionClient {
            service,
            config,
            validator,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Confident `car` detections only.
    pub async fn detect_cars(&self, image: &[u8]) -> Vec<Prediction> {
        let config = &self.config;
        self.request(Endpoint::ObjectDetection, image)
            .await
            .into_iter()
            .filter(|p| p.confidence > config.car_confidence && p.label == config.car_label)
            .collect()
    }

    /// Every plate box the plate detector reports, regardless of score.
    pub async fn detect_plates(&self, image: &[u8]) -> Vec<Prediction> {
        self.request(Endpoint::LicensePlate, image).await
    }

    /// OCR on an already cropped plate. Boxes are relative to the crop.
    pub async fn read_text(&self, image: &[u8]) -> Vec<Prediction> {
        let validator = &self.validator;
        self.request(Endpoint::Ocr, image)
            .await
            .into_iter()
            .filter(|p| validator.is_valid_plate(&p.label))
            .collect()
    }

    /// The combined detector + reader. Its labels carry a template prefix
    /// which is removed before validation.
    pub async fn detect_alpr(&self, image: &[u8]) -> Vec<Prediction> {
        let prefix = self.config.alpr_label_prefix.as_str();
        let validator = &self.validator;
        self.request(Endpoint::Alpr, image)
            .await
            .into_iter()
            .map(|mut p| {
                if !prefix.is_empty() {
                    p.label = p.label.replace(prefix, "");
                }
                p
            })
            .filter(|p| validator.is_valid_plate(&p.label))
            .collect()
    }

    async fn request(&self, endpoint: Endpoint, image: &[u8]) -> Vec<Prediction> {
        match self.service.predict(endpoint, image.to_vec()).await {
            Ok(reply) => parse_predictions(endpoint, &reply),
            Err(e) => {
                warn!("Request to {} failed, treating as no predictions: {}", endpoint, e);
                Vec::new()
            }
        }
    }
}

/// Pulls the `predictions` array out of a reply, skipping malformed entries.
pub fn parse_predictions(endpoint: Endpoint, reply: &Value) -> Vec<Prediction> {
    let items = match reply.get(PREDICTIONS_KEY).and_then(Value::as_array) {
        Some(items) => items,
        None => {
            debug!("No {} in reply from {}", PREDICTIONS_KEY, endpoint);
            return Vec::new();
        }
    };
    items
        .iter()
        .filter_map(|item| {
            let prediction = Prediction::from_json(item);
            if prediction.is_none() {
                warn!("Ignoring malformed prediction from {}: {}", endpoint, item);
            }
            prediction
        })
        .collect()
}
