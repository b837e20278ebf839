use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::analytics::{DetectionBox, HazardLabel};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestResult {
    pub frame_width: i32,
    pub frame_height: i32,
    pub detections: Vec<DetectionBox>,
    pub alert_trigger: Option<HazardLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f32>,
}

/// The last published cycle. Readers get a cheap `Arc` clone and never wait on
/// inference.
#[derive(Clone, Default)]
pub struct ResultCache {
    inner: Arc<RwLock<Arc<LatestResult>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, result: LatestResult) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(result);
    }

    pub fn latest(&self) -> Arc<LatestResult> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }
}
