//! Stubs shared by the unit tests.

use crate::frame::Frame;
use crate::prediction::{Endpoint, InferenceService};
use crate::video::FrameSource;
use async_trait::async_trait;
use failure::Error;
use image::RgbImage;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn prediction_json(label: &str, confidence: f64, bbox: [u32; 4]) -> Value {
    json!({
        "label": label,
        "confidence": confidence,
        "x_min": bbox[0],
        "y_min": bbox[1],
        "x_max": bbox[2],
        "y_max": bbox[3],
    })
}

type Responder = Box<dyn Fn(Endpoint) -> Result<Value, Error> + Send + Sync>;

/// Inference server stand-in that counts calls per endpoint.
pub struct StubService {
    responder: Responder,
    calls: Mutex<HashMap<Endpoint, usize>>,
}

impl StubService {
    pub fn new(responder: impl Fn(Endpoint) -> Result<Value, Error> + Send + Sync + 'static) -> Self {
        StubService {
            responder: Box::new(responder),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Endpoints without a reply answer with an empty object.
    pub fn with_replies(replies: Vec<(Endpoint, Value)>) -> Self {
        let replies: HashMap<Endpoint, Value> = replies.into_iter().collect();
        StubService::new(move |endpoint| Ok(replies.get(&endpoint).cloned().unwrap_or_else(|| json!({}))))
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.calls.lock().unwrap().get(&endpoint).copied().unwrap_or(0)
    }
}

#[async_trait]
impl InferenceService for StubService {
    async fn predict(&self, endpoint: Endpoint, _image: Vec<u8>) -> Result<Value, Error> {
        *self.calls.lock().unwrap().entry(endpoint).or_insert(0) += 1;
        (self.responder)(endpoint)
    }
}

pub fn blank_frame(ordinal: u64) -> Frame {
    Frame::new(ordinal, RgbImage::new(160, 120))
}

/// In-memory video of blank frames. Can be told to fail part way through,
/// and reports when it is dropped.
pub struct StubSource {
    next: u64,
    total: u64,
    fail_at: Option<u64>,
    released: Arc<AtomicBool>,
}

impl StubSource {
    pub fn new(total: u64) -> Self {
        StubSource {
            next: 1,
            total,
            fail_at: None,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing_at(mut self, ordinal: u64) -> Self {
        self.fail_at = Some(ordinal);
        self
    }

    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl FrameSource for StubSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        if Some(self.next) == self.fail_at {
            bail!("corrupt packet at frame {}", self.next);
        }
        if self.next > self.total {
            return Ok(None);
        }
        let frame = blank_frame(self.next);
        self.next += 1;
        Ok(Some(frame))
    }
}

impl Drop for StubSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
