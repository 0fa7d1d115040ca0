//! The inference collaborator behind a single `infer` seam.
//!
//! Derived task summaries come from an external LLM aggregator. The core
//! must keep working without it, so every failure maps to the retryable
//! `inference_unavailable` kind and callers treat summaries as optional.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use hs_domain::config::InferenceConfig;
use hs_domain::hash::content_hash;
use hs_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Instruction,
    CompletionSummary,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Instruction => "instruction",
            Purpose::CompletionSummary => "completion_summary",
        }
    }
}

#[async_trait]
pub trait Inference: Send + Sync {
    async fn infer(&self, prompt: &str, purpose: Purpose) -> Result<String>;
}

/// Stand-in when no aggregator is configured. Always unavailable; the
/// core proceeds without derived summaries.
pub struct DisabledInference;

#[async_trait]
impl Inference for DisabledInference {
    async fn infer(&self, _prompt: &str, _purpose: Purpose) -> Result<String> {
        Err(Error::InferenceUnavailable("inference not configured".into()))
    }
}

#[derive(Deserialize)]
struct InferResponse {
    text: String,
}

/// HTTP client to the aggregator with caching, retry/backoff, and a
/// per-purpose minimum call interval.
pub struct HttpInference {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    min_interval: Duration,
    last_call: Mutex<HashMap<Purpose, Instant>>,
    cache: Mutex<HashMap<String, String>>,
    cache_capacity: usize,
}

impl HttpInference {
    pub fn new(config: &InferenceConfig, base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("inference client: {e}")))?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        Ok(Self {
            client,
            base_url,
            api_key,
            max_retries: config.max_retries,
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_call: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            cache_capacity: config.cache_capacity,
        })
    }

    /// Sleep until the per-purpose rate limit admits another call.
    async fn throttle(&self, purpose: Purpose) {
        let wait = {
            let mut last_call = self.last_call.lock();
            let now = Instant::now();
            let wait = match last_call.get(&purpose) {
                Some(last) => self.min_interval.saturating_sub(now.duration_since(*last)),
                None => Duration::ZERO,
            };
            last_call.insert(purpose, now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    async fn call_once(&self, prompt: &str, purpose: Purpose) -> Result<String> {
        let mut request = self
            .client
            .post(format!("{}/v1/infer", self.base_url.trim_end_matches('/')))
            .json(&serde_json::json!({
                "prompt": prompt,
                "purpose": purpose.as_str(),
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::InferenceUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::InferenceUnavailable(format!(
                "aggregator returned {}",
                response.status()
            )));
        }
        let body: InferResponse = response
            .json()
            .await
            .map_err(|e| Error::InferenceUnavailable(format!("bad response body: {e}")))?;
        Ok(body.text)
    }
}

#[async_trait]
impl Inference for HttpInference {
    async fn infer(&self, prompt: &str, purpose: Purpose) -> Result<String> {
        let cache_key = content_hash(&format!("{}:{prompt}", purpose.as_str()));
        if let Some(hit) = self.cache.lock().get(&cache_key) {
            return Ok(hit.clone());
        }

        self.throttle(purpose).await;

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(250u64 << (attempt - 1))).await;
            }
            match self.call_once(prompt, purpose).await {
                Ok(text) => {
                    let mut cache = self.cache.lock();
                    if cache.len() >= self.cache_capacity {
                        cache.clear();
                    }
                    cache.insert(cache_key, text.clone());
                    return Ok(text);
                }
                Err(e) => {
                    tracing::debug!(purpose = purpose.as_str(), attempt, error = %e, "inference attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::InferenceUnavailable("no attempts made".into())))
    }
}

/// Build the collaborator the config asks for.
pub fn from_config(config: &InferenceConfig) -> Result<Arc<dyn Inference>> {
    match &config.base_url {
        Some(base_url) => Ok(Arc::new(HttpInference::new(config, base_url.clone())?)),
        None => Ok(Arc::new(DisabledInference)),
    }
}
