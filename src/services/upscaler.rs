use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    models::{ResultRef, SourceFile},
    utils::file,
};

/// Real-ESRGAN on Replicate.
pub const DEFAULT_MODEL_VERSION: &str = "42fed1c4974146d4d2414e2be2c5277c7fcf05fcc972b6f777b83f18e0b5ee90";

/// Upscale factors the model accepts.
pub const SUPPORTED_SCALES: [u8; 3] = [2, 4, 8];

pub fn is_supported_scale(scale: u8) -> bool {
    SUPPORTED_SCALES.contains(&scale)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpscaleHandle(pub String);

impl fmt::Display for UpscaleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpscaleStatus {
    Running { progress: u8 },
    Succeeded { result: ResultRef },
    Failed { reason: String },
}

#[derive(Debug, Error)]
pub enum UpscalerError {
    #[error("upscaler request failed: {0}")]
    Transport(String),

    #[error("upscaler rejected the request: {0}")]
    Rejected(String),

    #[error("unexpected upscaler response: {0}")]
    Protocol(String),
}

/// External AI upscaling service.
#[async_trait]
pub trait Upscaler: Send + Sync {
    /// Starts upscaling `image` by `scale` and returns a handle to poll.
    async fn submit(&self, image: &SourceFile, scale: u8) -> Result<UpscaleHandle, UpscalerError>;

    async fn status(&self, handle: &UpscaleHandle) -> Result<UpscaleStatus, UpscalerError>;
}

/// Client for a Replicate-style predictions API.
pub struct ReplicateUpscaler {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    model_version: String,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    logs: Option<String>,
}

impl ReplicateUpscaler {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        model_version: &str,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            model_version: model_version.to_string(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_prediction(response: reqwest::Response) -> Result<Prediction, UpscalerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpscalerError::Rejected(format!("{}: {}", status, body)));
        }
        response
            .json::<Prediction>()
            .await
            .map_err(|e| UpscalerError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl Upscaler for ReplicateUpscaler {
    async fn submit(&self, image: &SourceFile, scale: u8) -> Result<UpscaleHandle, UpscalerError> {
        let body = json!({
            "version": self.model_version,
            "input": {
                "image": data_uri(image),
                "scale": scale,
            }
        });

        let response = self
            .authorize(self.client.post(format!("{}/v1/predictions", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| UpscalerError::Transport(e.to_string()))?;

        let prediction = Self::read_prediction(response).await?;
        if matches!(prediction.status.as_str(), "failed" | "canceled") {
            return Err(UpscalerError::Rejected(
                prediction.error.unwrap_or(prediction.status),
            ));
        }

        tracing::debug!(prediction_id = %prediction.id, "Prediction created");
        Ok(UpscaleHandle(prediction.id))
    }

    async fn status(&self, handle: &UpscaleHandle) -> Result<UpscaleStatus, UpscalerError> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/v1/predictions/{}", self.base_url, handle.0)),
            )
            .send()
            .await
            .map_err(|e| UpscalerError::Transport(e.to_string()))?;

        let prediction = Self::read_prediction(response).await?;
        match prediction.status.as_str() {
            "starting" => Ok(UpscaleStatus::Running { progress: 0 }),
            "processing" => Ok(UpscaleStatus::Running {
                progress: prediction.logs.as_deref().and_then(parse_progress).unwrap_or(0),
            }),
            "succeeded" => {
                let location = prediction
                    .output
                    .as_ref()
                    .and_then(output_location)
                    .ok_or_else(|| UpscalerError::Protocol("prediction succeeded without output".to_string()))?;
                Ok(UpscaleStatus::Succeeded {
                    result: ResultRef::new(location),
                })
            }
            "failed" | "canceled" => Ok(UpscaleStatus::Failed {
                reason: prediction
                    .error
                    .unwrap_or_else(|| format!("prediction {}", prediction.status)),
            }),
            other => Err(UpscalerError::Protocol(format!("unknown prediction status '{}'", other))),
        }
    }
}

fn data_uri(image: &SourceFile) -> String {
    format!("data:{};base64,{}", image.media_type, STANDARD.encode(&image.data))
}

/// Output is either a URL or a list whose first element is the URL.
fn output_location(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}

/// Last percentage printed in the model logs (progress bars such as `45%|####`).
pub fn parse_progress(logs: &str) -> Option<u8> {
    logs.rmatch_indices('%').find_map(|(idx, _)| {
        let prefix = &logs[..idx];
        let start = prefix.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        prefix[start..]
            .parse::<u32>()
            .ok()
            .map(|value| value.min(100) as u8)
    })
}

/// Deterministic stand-in that advances by a fixed step on every status poll.
///
/// A prediction is forgotten once it reports success. Handles nobody polls
/// to the end are dropped after `abandon_after`.
pub struct SimulatedUpscaler {
    step: u8,
    abandon_after: Duration,
    predictions: Mutex<HashMap<String, SimulatedPrediction>>,
}

struct SimulatedPrediction {
    progress: u8,
    location: String,
    submitted_at: Instant,
}

impl Default for SimulatedUpscaler {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SimulatedUpscaler {
    pub fn new(step: u8) -> Self {
        Self {
            step: step.max(1),
            abandon_after: Duration::from_secs(15 * 60),
            predictions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_abandon_after(mut self, window: Duration) -> Self {
        self.abandon_after = window;
        self
    }

    /// Predictions still tracked.
    pub fn pending(&self) -> usize {
        self.predictions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Upscaler for SimulatedUpscaler {
    async fn submit(&self, image: &SourceFile, scale: u8) -> Result<UpscaleHandle, UpscalerError> {
        let id = format!("sim-{}", Uuid::new_v4().simple());
        let location = format!(
            "sim://results/{}_x{}.{}",
            id,
            scale,
            file::get_file_extension(&image.media_type)
        );

        let mut predictions = self.predictions.lock().unwrap_or_else(|e| e.into_inner());
        let before = predictions.len();
        predictions.retain(|_, p| p.submitted_at.elapsed() < self.abandon_after);
        if predictions.len() < before {
            tracing::debug!(dropped = before - predictions.len(), "Dropped abandoned predictions");
        }
        predictions.insert(
            id.clone(),
            SimulatedPrediction {
                progress: 0,
                location,
                submitted_at: Instant::now(),
            },
        );
        Ok(UpscaleHandle(id))
    }

    async fn status(&self, handle: &UpscaleHandle) -> Result<UpscaleStatus, UpscalerError> {
        let mut predictions = self.predictions.lock().unwrap_or_else(|e| e.into_inner());
        let prediction = predictions
            .get_mut(&handle.0)
            .ok_or_else(|| UpscalerError::Protocol(format!("unknown prediction {}", handle)))?;

        prediction.progress = prediction.progress.saturating_add(self.step).min(100);
        if prediction.progress < 100 {
            return Ok(UpscaleStatus::Running {
                progress: prediction.progress,
            });
        }

        let finished = predictions.remove(&handle.0);
        Ok(UpscaleStatus::Succeeded {
            result: ResultRef::new(finished.map(|p| p.location).unwrap_or_default()),
        })
    }
}
