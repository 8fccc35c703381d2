// =============================================================================
// Predictor Port — external win-probability model
// =============================================================================
//
// The engine treats the predictor as best-effort: a short deadline, a cached
// health probe, and a small per-signal result cache. Any failure means the
// signal ships unenhanced; there is no retry within an analysis cycle.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::features::FeatureVector;
use crate::types::QualityTier;

/// Deadline for predict calls.
const PREDICT_TIMEOUT_MS: u64 = 2_000;

/// Health probe cache lifetime.
const HEALTH_CACHE_MS: i64 = 30_000;

/// Prediction result cache lifetime, keyed by signal id.
const PREDICTION_CACHE_MS: i64 = 5_000;

/// A win-probability estimate for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Probability in [0, 1] that the signal resolves WIN.
    pub win_probability: f64,
    pub quality_tier: QualityTier,
    /// The model's own confidence in the estimate.
    pub confidence: f64,
    pub model_version: String,
}

/// Aggregate statistics reported by the predictor service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorStats {
    pub model_version: String,
    pub training_samples: u64,
    pub validation_auc: f64,
    pub validation_accuracy: f64,
}

/// Port to the external probability model.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Predict the outcome for `features`. `signal_id` keys the result cache.
    async fn predict(&self, signal_id: &str, features: &FeatureVector) -> Result<Prediction>;

    /// Whether the service is reachable and serving a model.
    async fn health(&self) -> bool;

    /// Optional: current model statistics.
    async fn stats(&self) -> Result<PredictorStats>;
}

// =============================================================================
// HTTP adapter
// =============================================================================

/// HTTP adapter for the companion predictor service.
pub struct HttpPredictor {
    base_url: String,
    client: reqwest::Client,
    clock: Clock,
    /// (healthy, probed-at).
    health_cache: RwLock<Option<(bool, i64)>>,
    /// signal_id -> (prediction, cached-at).
    prediction_cache: RwLock<HashMap<String, (Prediction, i64)>>,
}

impl HttpPredictor {
    pub fn new(base_url: impl Into<String>, clock: Clock) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(PREDICT_TIMEOUT_MS))
            .build()
            .expect("failed to build reqwest client for HttpPredictor");

        Self {
            base_url: base_url.into(),
            client,
            clock,
            health_cache: RwLock::new(None),
            prediction_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cached prediction for `signal_id` if still fresh.
    fn cached_prediction(&self, signal_id: &str) -> Option<Prediction> {
        let now = self.clock.now_ms();
        let cache = self.prediction_cache.read();
        cache.get(signal_id).and_then(|(prediction, at)| {
            (now - at < PREDICTION_CACHE_MS).then(|| prediction.clone())
        })
    }

    fn store_prediction(&self, signal_id: &str, prediction: &Prediction) {
        let now = self.clock.now_ms();
        let mut cache = self.prediction_cache.write();
        cache.insert(signal_id.to_string(), (prediction.clone(), now));
        // Expired entries are swept opportunistically on insert.
        cache.retain(|_, (_, at)| now - *at < PREDICTION_CACHE_MS);
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, signal_id: &str, features: &FeatureVector) -> Result<Prediction> {
        if let Some(cached) = self.cached_prediction(signal_id) {
            debug!(signal_id, "prediction served from cache");
            return Ok(cached);
        }

        let url = format!("{}/predict", self.base_url);
        let body = serde_json::json!({
            "signal_id": signal_id,
            "features": features.to_array().to_vec(),
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST /predict request failed")?;

        let status = resp.status();
        let prediction: Prediction = resp
            .json()
            .await
            .context("failed to parse prediction response")?;

        if !status.is_success() {
            return Err(EngineError::Predictor(format!("predictor returned {status}")).into());
        }

        self.store_prediction(signal_id, &prediction);
        Ok(prediction)
    }

    async fn health(&self) -> bool {
        let now = self.clock.now_ms();
        if let Some((healthy, at)) = *self.health_cache.read() {
            if now - at < HEALTH_CACHE_MS {
                return healthy;
            }
        }

        let url = format!("{}/health", self.base_url);
        let healthy = match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "predictor health probe failed");
                false
            }
        };

        *self.health_cache.write() = Some((healthy, now));
        healthy
    }

    async fn stats(&self) -> Result<PredictorStats> {
        let url = format!("{}/stats", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /stats request failed")?;
        resp.json().await.context("failed to parse stats response")
    }
}

/// A shared, optional predictor handle.
pub type SharedPredictor = Arc<dyn Predictor>;

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts outbound calls so cache behaviour is observable.
    struct CountingPredictor {
        calls: AtomicUsize,
        inner: HttpPredictor,
    }

    #[async_trait]
    impl Predictor for CountingPredictor {
        async fn predict(&self, signal_id: &str, _features: &FeatureVector) -> Result<Prediction> {
            if let Some(cached) = self.inner.cached_prediction(signal_id) {
                return Ok(cached);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let prediction = Prediction {
                win_probability: 0.65,
                quality_tier: QualityTier::Medium,
                confidence: 0.8,
                model_version: "v1".into(),
            };
            self.inner.store_prediction(signal_id, &prediction);
            Ok(prediction)
        }

        async fn health(&self) -> bool {
            true
        }

        async fn stats(&self) -> Result<PredictorStats> {
            anyhow::bail!("not implemented")
        }
    }

    #[tokio::test]
    async fn prediction_cache_deduplicates_within_five_seconds() {
        let clock = Clock::manual(0);
        let predictor = CountingPredictor {
            calls: AtomicUsize::new(0),
            inner: HttpPredictor::new("http://localhost:0", clock.clone()),
        };
        let features = FeatureVector::default();

        let first = predictor.predict("sig-1", &features).await.unwrap();
        clock.advance_ms(3_000);
        let second = predictor.predict("sig-1", &features).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prediction_cache_expires() {
        let clock = Clock::manual(0);
        let predictor = CountingPredictor {
            calls: AtomicUsize::new(0),
            inner: HttpPredictor::new("http://localhost:0", clock.clone()),
        };
        let features = FeatureVector::default();

        predictor.predict("sig-1", &features).await.unwrap();
        clock.advance_ms(PREDICTION_CACHE_MS + 1);
        predictor.predict("sig-1", &features).await.unwrap();

        assert_eq!(predictor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_signal_ids_do_not_share_cache() {
        let clock = Clock::manual(0);
        let predictor = CountingPredictor {
            calls: AtomicUsize::new(0),
            inner: HttpPredictor::new("http://localhost:0", clock.clone()),
        };
        let features = FeatureVector::default();

        predictor.predict("sig-1", &features).await.unwrap();
        predictor.predict("sig-2", &features).await.unwrap();
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 2);
    }
}
