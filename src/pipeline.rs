use crate::config::SamplingPolicy;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::strategy::DetectionStrategy;
use crate::tracker::OccurrenceTracker;
use crate::types::{Candidate, PipelineResult, Snapshot};
use crate::video::{self, FrameSource};
use failure::Error;
use futures::stream::{FuturesOrdered, StreamExt};
use log::{debug, error, info, warn};
use std::path::Path;

/// Frames per second the cameras record at; used only to pace progress logs.
const CAPTURE_FPS: u64 = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Opening,
    Sampling,
    Detecting { ordinal: u64 },
    Aggregating { ordinal: u64 },
    Finalizing,
    Done,
    Failed(String),
}

/// Receives the winning plate of each video. Saving images and recording
/// the sighting both live behind this.
pub trait SightingSink {
    fn record(&mut self, text: &str, snapshot: &Snapshot) -> Result<(), Error>;
}

/// Runs one detection strategy over sampled frames of a video and votes on
/// the plate. The pipeline can be reused; each run starts a fresh tally.
pub struct VideoPipeline {
    strategy: Box<dyn DetectionStrategy>,
    sampling: SamplingPolicy,
    stage: Stage,
}

impl VideoPipeline {
    pub fn new(strategy: Box<dyn DetectionStrategy>, sampling: SamplingPolicy) -> Self {
        VideoPipeline {
            strategy,
            sampling,
            stage: Stage::Opening,
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Opens `path` and processes it. Only a source that cannot be opened is
    /// an error; finding nothing is `PipelineResult::NoDetection`.
    pub async fn process_path(&mut self, path: &Path) -> Result<PipelineResult, PipelineError> {
        enter(&mut self.stage, Stage::Opening);
        info!(
            "Processing {} with {} detection",
            path.display(),
            self.strategy.name()
        );
        match video::open(path) {
            Ok(source) => Ok(self.process(source).await),
            Err(e) => {
                enter(&mut self.stage, Stage::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Like `process_path`, then hands a winner to `sink`. A sink failure is
    /// logged and does not change the returned result.
    pub async fn process_and_record<S: SightingSink>(
        &mut self,
        path: &Path,
        sink: &mut S,
    ) -> Result<PipelineResult, PipelineError> {
        let result = self.process_path(path).await?;
        if let PipelineResult::Detected(entry) = &result {
            if let Err(e) = sink.record(&entry.text, &entry.snapshot) {
                error!("Unable to record plate {}: {}", entry.text, e);
            }
        }
        Ok(result)
    }

    /// Reads `source` to the end, detecting on every sampled frame.
    pub async fn process(&mut self, source: Box<dyn FrameSource>) -> PipelineResult {
        let strategy = self.strategy.as_ref();
        let stage = &mut self.stage;
        let mut frames = SampledFrames::new(source, self.sampling);
        let mut tracker = OccurrenceTracker::new();
        let mut pending = FuturesOrdered::new();
        let mut sampled = 0u64;
        enter(stage, Stage::Sampling);

        loop {
            while pending.len() < self.sampling.in_flight() {
                match frames.next() {
                    Some(frame) => {
                        sampled += 1;
                        enter(stage, Stage::Detecting { ordinal: frame.ordinal() });
                        pending.push_back(detect_frame(strategy, frame));
                    }
                    None => break,
                }
            }
            // Results come back in frame order, so ties still go to the
            // earliest frame when several are in flight.
            let (ordinal, candidates) = match pending.next().await {
                Some(detected) => detected,
                None => break,
            };
            enter(stage, Stage::Aggregating { ordinal });
            for candidate in candidates {
                debug!("Frame {}: read {} at {:?}", ordinal, candidate.text, candidate.bbox);
                tracker.record(candidate);
            }
            enter(stage, Stage::Sampling);
        }

        enter(stage, Stage::Finalizing);
        debug!(
            "{} frames read, {} sampled, {} readings of {} distinct texts",
            frames.read(),
            sampled,
            tracker.readings(),
            tracker.len()
        );
        let result = tracker.into_winner();
        match &result {
            PipelineResult::Detected(entry) => info!(
                "Detected plate {} in {} of {} sampled frames",
                entry.text, entry.count, sampled
            ),
            PipelineResult::NoDetection => info!("No plate detected"),
        }
        enter(stage, Stage::Done);
        result
    }
}

fn enter(stage: &mut Stage, next: Stage) {
    debug!("Pipeline {:?} -> {:?}", stage, next);
    *stage = next;
}

async fn detect_frame(strategy: &dyn DetectionStrategy, frame: Frame) -> (u64, Vec<Candidate>) {
    let candidates = strategy.detect(&frame).await;
    (frame.ordinal(), candidates)
}

/// Pulls frames from a source and yields the sampled ones. The source is
/// dropped as soon as it ends or fails to decode.
struct SampledFrames {
    source: Option<Box<dyn FrameSource>>,
    policy: SamplingPolicy,
    read: u64,
}

impl SampledFrames {
    fn new(source: Box<dyn FrameSource>, policy: SamplingPolicy) -> Self {
        SampledFrames {
            source: Some(source),
            policy,
            read: 0,
        }
    }

    fn read(&self) -> u64 {
        self.read
    }
}

impl Iterator for SampledFrames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        loop {
            let source = self.source.as_mut()?;
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.read += 1;
                    if frame.ordinal() % CAPTURE_FPS == 0 {
                        info!("... frame {}", frame.ordinal());
                    }
                    if self.policy.is_sampled(frame.ordinal()) {
                        return Some(frame);
                    }
                }
                Ok(None) => {
                    debug!("End of stream after {} frames", self.read);
                    self.source = None;
                }
                Err(e) => {
                    warn!("Stopping after {} frames: {}", self.read, e);
                    self.source = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectionConfig, PlateRules};
    use crate::prediction::{Endpoint, PredictionClient};
    use crate::strategy::Cascade;
    use crate::testing::{prediction_json, StubService, StubSource};
    use crate::types::{BoundingBox, Prediction};
    use crate::validator::PlateValidator;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};

    /// Reads a plate text chosen by frame ordinal.
    struct ScriptedStrategy {
        script: fn(u64) -> Vec<&'static str>,
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl ScriptedStrategy {
        fn new(script: fn(u64) -> Vec<&'static str>) -> Self {
            ScriptedStrategy {
                script,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl DetectionStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn detect(&self, frame: &Frame) -> Vec<Candidate> {
            self.seen.lock().unwrap().push(frame.ordinal());
            (self.script)(frame.ordinal())
                .into_iter()
                .map(|text| {
                    Candidate::new(
                        Prediction {
                            confidence: 0.9,
                            label: text.to_string(),
                            bbox: BoundingBox::new(10, 10, 40, 20),
                        },
                        frame.clone(),
                        None,
                    )
                })
                .collect()
        }
    }

    fn policy(max_in_flight: usize) -> SamplingPolicy {
        SamplingPolicy {
            interval: 3,
            max_in_flight,
        }
    }

    fn two_plates(ordinal: u64) -> Vec<&'static str> {
        if ordinal <= 60 {
            vec!["ABC1234"]
        } else {
            vec!["XYZ999"]
        }
    }

    #[tokio::test]
    async fn majority_over_ninety_frames() {
        let strategy = ScriptedStrategy::new(two_plates);
        let seen = strategy.seen.clone();
        let mut pipeline = VideoPipeline::new(Box::new(strategy), policy(1));

        let result = pipeline.process(Box::new(StubSource::new(90))).await;

        let entry = result.entry().unwrap();
        assert_eq!(entry.text, "ABC1234");
        assert_eq!(entry.count, 20);
        assert_eq!(entry.snapshot.frame.ordinal(), 3);
        let expected: Vec<u64> = (1..=30).map(|n| n * 3).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(pipeline.stage(), &Stage::Done);
    }

    #[tokio::test]
    async fn concurrent_detection_keeps_frame_order() {
        fn alternating(ordinal: u64) -> Vec<&'static str> {
            if (ordinal / 3) % 2 == 1 {
                vec!["FIRST11"]
            } else {
                vec!["SECOND2"]
            }
        }
        let mut pipeline =
            VideoPipeline::new(Box::new(ScriptedStrategy::new(alternating)), policy(4));

        let result = pipeline.process(Box::new(StubSource::new(60))).await;

        // ten readings each; the text from frame 3 wins the tie
        assert_eq!(result.plate_text(), "FIRST11");
        assert_eq!(result.entry().unwrap().count, 10);
    }

    #[tokio::test]
    async fn nothing_read_is_no_detection() {
        let mut pipeline =
            VideoPipeline::new(Box::new(ScriptedStrategy::new(|_| Vec::new())), policy(1));
        let result = pipeline.process(Box::new(StubSource::new(30))).await;
        assert!(matches!(result, PipelineResult::NoDetection));
        assert_eq!(result.plate_text(), "");
    }

    #[tokio::test]
    async fn short_video_samples_nothing() {
        let strategy = ScriptedStrategy::new(two_plates);
        let seen = strategy.seen.clone();
        let mut pipeline = VideoPipeline::new(Box::new(strategy), policy(1));
        let result = pipeline.process(Box::new(StubSource::new(2))).await;
        assert!(matches!(result, PipelineResult::NoDetection));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn decode_failure_ends_stream_and_releases_source() {
        let strategy = ScriptedStrategy::new(two_plates);
        let seen = strategy.seen.clone();
        let source = StubSource::new(90).failing_at(10);
        let released = source.released_flag();
        let mut pipeline = VideoPipeline::new(Box::new(strategy), policy(1));

        let result = pipeline.process(Box::new(source)).await;

        assert!(released.load(Ordering::SeqCst));
        assert_eq!(*seen.lock().unwrap(), vec![3, 6, 9]);
        assert_eq!(result.entry().unwrap().count, 3);
    }

    #[tokio::test]
    async fn cascade_without_cars_never_reads_plates() {
        let stub = Arc::new(StubService::with_replies(vec![
            (
                Endpoint::ObjectDetection,
                json!({ "predictions": [prediction_json("dog", 0.99, [0, 0, 50, 50])] }),
            ),
            (
                Endpoint::LicensePlate,
                json!({ "predictions": [prediction_json("Plate", 0.9, [10, 10, 60, 30])] }),
            ),
            (
                Endpoint::Ocr,
                json!({ "predictions": [prediction_json("ABC1234", 0.9, [0, 0, 50, 20])] }),
            ),
        ]));
        let client = PredictionClient::new(
            stub.clone(),
            DetectionConfig::default(),
            PlateValidator::new(&PlateRules::default()),
        );
        let mut pipeline = VideoPipeline::new(Box::new(Cascade::new(client)), policy(1));

        let result = pipeline.process(Box::new(StubSource::new(30))).await;

        assert!(matches!(result, PipelineResult::NoDetection));
        assert_eq!(stub.calls(Endpoint::ObjectDetection), 10);
        assert_eq!(stub.calls(Endpoint::LicensePlate), 0);
        assert_eq!(stub.calls(Endpoint::Ocr), 0);
    }

    #[tokio::test]
    async fn missing_video_fails_opening() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            VideoPipeline::new(Box::new(ScriptedStrategy::new(two_plates)), policy(1));

        let result = pipeline.process_path(&dir.path().join("missing.mp4")).await;

        assert!(result.is_err());
        assert!(matches!(pipeline.stage(), Stage::Failed(_)));
    }

    struct CountingSink {
        recorded: Vec<String>,
        fail: bool,
        calls: usize,
    }

    impl SightingSink for CountingSink {
        fn record(&mut self, text: &str, _snapshot: &Snapshot) -> Result<(), Error> {
            self.calls += 1;
            if self.fail {
                bail!("disk full");
            }
            self.recorded.push(text.to_string());
            Ok(())
        }
    }

    fn frames_dir(count: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=count {
            image::RgbImage::new(16, 12)
                .save(dir.path().join(format!("frame_{:03}.png", i)))
                .unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn winner_goes_to_sink() {
        let dir = frames_dir(6);
        let mut sink = CountingSink {
            recorded: Vec::new(),
            fail: false,
            calls: 0,
        };
        let mut pipeline =
            VideoPipeline::new(Box::new(ScriptedStrategy::new(two_plates)), policy(1));

        let result = pipeline
            .process_and_record(dir.path(), &mut sink)
            .await
            .unwrap();

        assert_eq!(result.plate_text(), "ABC1234");
        assert_eq!(sink.recorded, vec!["ABC1234".to_string()]);
    }

    #[tokio::test]
    async fn sink_failure_keeps_result() {
        let dir = frames_dir(3);
        let mut sink = CountingSink {
            recorded: Vec::new(),
            fail: true,
            calls: 0,
        };
        let mut pipeline =
            VideoPipeline::new(Box::new(ScriptedStrategy::new(two_plates)), policy(1));

        let result = pipeline
            .process_and_record(dir.path(), &mut sink)
            .await
            .unwrap();

        assert_eq!(result.plate_text(), "ABC1234");
        assert_eq!(sink.calls, 1);
    }

    #[tokio::test]
    async fn no_detection_skips_sink() {
        let dir = frames_dir(6);
        let mut sink = CountingSink {
            recorded: Vec::new(),
            fail: false,
            calls: 0,
        };
        let mut pipeline =
            VideoPipeline::new(Box::new(ScriptedStrategy::new(|_| Vec::new())), policy(1));

        pipeline
            .process_and_record(dir.path(), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.calls, 0);
    }
}
