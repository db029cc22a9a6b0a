use crate::frame::{encode_jpeg, Frame};
use crate::prediction::{InferenceService, PredictionClient};
use crate::types::Candidate;
use async_trait::async_trait;
use log::{debug, warn};

/// Finds plate readings in a single frame.
#[async_trait]
pub trait DetectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(&self, frame: &Frame) -> Vec<Candidate>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StrategyKind {
    /// Car detection, then plate detection, then OCR on each plate crop.
    Cascade,
    /// The server's combined plate reader. Noisier than the cascade.
    SinglePass,
}

pub fn build<S>(kind: StrategyKind, client: PredictionClient<S>) -> Box<dyn DetectionStrategy>
where
    S: InferenceService + 'static,
{
    match kind {
        StrategyKind::Cascade => Box::new(Cascade::new(client)),
        StrategyKind::SinglePass => Box::new(SinglePass::new(client)),
    }
}

/// One call to the combined ALPR endpoint per frame.
pub struct SinglePass<S> {
    client: PredictionClient<S>,
}

impl<S: InferenceService> SinglePass<S> {
    pub fn new(client: PredictionClient<S>) -> Self {
        SinglePass { client }
    }
}

#[async_trait]
impl<S: InferenceService> DetectionStrategy for SinglePass<S> {
    fn name(&self) -> &'static str {
        "single-pass"
    }

    async fn detect(&self, frame: &Frame) -> Vec<Candidate> {
        let image = match frame.to_jpeg(self.client.config().jpeg_quality) {
            Ok(image) => image,
            Err(e) => {
                warn!("Unable to encode frame {}: {}", frame.ordinal(), e);
                return Vec::new();
            }
        };
        self.client
            .detect_alpr(&image)
            .await
            .into_iter()
            .map(|plate| {
                let crop = frame.crop(&plate.bbox);
                Candidate::new(plate, frame.clone(), crop)
            })
            .collect()
    }
}

/// Car detection gates plate detection, which runs once on the whole frame.
/// Each plate box is cropped and read separately.
pub struct Cascade<S> {
    client: PredictionClient<S>,
}

impl<S: InferenceService> Cascade<S> {
    pub fn new(client: PredictionClient<S>) -> Self {
        Cascade { client }
    }
}

#[async_trait]
impl<S: InferenceService> DetectionStrategy for Cascade<S> {
    fn name(&self) -> &'static str {
        "cascade"
    }

    async fn detect(&self, frame: &Frame) -> Vec<Candidate> {
        let quality = self.client.config().jpeg_quality;
        let image = match frame.to_jpeg(quality) {
            Ok(image) => image,
            Err(e) => {
                warn!("Unable to encode frame {}: {}", frame.ordinal(), e);
                return Vec::new();
            }
        };

        let cars = self.client.detect_cars(&image).await;
        if cars.is_empty() {
            debug!("Frame {}: no cars", frame.ordinal());
            return Vec::new();
        }

        let plates = self.client.detect_plates(&image).await;
        debug!(
            "Frame {}: {} cars, {} plates",
            frame.ordinal(),
            cars.len(),
            plates.len()
        );

        let mut candidates = Vec::new();
        for plate in plates {
            let crop = match frame.crop(&plate.bbox) {
                Some(crop) => crop,
                None => {
                    debug!("Frame {}: plate box {:?} is empty", frame.ordinal(), plate.bbox);
                    continue;
                }
            };
            let crop_image = match encode_jpeg(&crop, quality) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Unable to encode plate crop: {}", e);
                    continue;
                }
            };
            // OCR boxes are relative to the crop; report the plate box instead.
            for reading in self.client.read_text(&crop_image).await {
                candidates.push(Candidate::new(
                    reading.with_bbox(plate.bbox),
                    frame.clone(),
                    Some(crop.clone()),
                ));
            }
        }
        candidates
    }
}
