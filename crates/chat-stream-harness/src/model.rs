use std::fmt;

use crate::errors::HarnessError;

/// Stable identifier for a model vendor (for example `openai`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct VendorId(pub String);

impl VendorId {
    /// Creates a vendor id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the vendor id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VendorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for VendorId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Per-token pricing attached to a model, recorded with the run's metrics.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelPricing {
    /// Price per million input tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_per_mtok: Option<f64>,
    /// Price per million output tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_per_mtok: Option<f64>,
    /// Price per million cache-read input tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_per_mtok: Option<f64>,
}

/// Model settings as configured by the user, before validation.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSettings {
    /// Vendor-side model reference (for example `gpt-4o-mini`).
    pub model_ref: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Output token cap; omitted from the request when unset.
    pub max_tokens: Option<u32>,
    /// Pricing used when recording metrics.
    pub pricing: Option<ModelPricing>,
}

impl ModelSettings {
    /// Creates settings for a vendor-side model reference.
    pub fn new(model_ref: impl Into<String>) -> Self {
        Self {
            model_ref: Some(model_ref.into()),
            ..Self::default()
        }
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the output token cap.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the model pricing.
    pub fn pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = Some(pricing);
        self
    }
}

/// Validated model parameters sent with the generate request.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelParams {
    pub id: String,
    pub temperature: f32,
    #[serde(rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelParams {
    /// Validates `settings` into request parameters.
    ///
    /// Fails with `HarnessError::Config` when the model reference or the
    /// temperature is missing.
    pub fn from_settings(model_id: &str, settings: &ModelSettings) -> Result<Self, HarnessError> {
        let id = settings
            .model_ref
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                HarnessError::Config(format!("model {model_id} has no model reference"))
            })?;
        let temperature = settings.temperature.ok_or_else(|| {
            HarnessError::Config(format!("model {model_id} has no temperature configured"))
        })?;
        Ok(Self {
            id: id.to_string(),
            temperature,
            max_tokens: settings.max_tokens,
        })
    }
}
