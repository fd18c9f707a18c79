use crate::model::VendorId;

/// Why the model stopped producing tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenStopReason {
    /// Natural end of generation.
    Ok,
    /// The model stopped to invoke tools.
    ToolInvocations,
    /// The output token cap was reached.
    OutOfTokens,
    /// Output was cut by a vendor-side filter.
    Filtered,
    /// Generation ended on an error.
    Issue,
    /// The caller cancelled the run.
    ClientAbort,
}

/// Token counters and timings reported for one generation.
///
/// Every field is optional: streams report them piecemeal and updates are
/// merged field by field.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_cache_read: Option<u64>,
    /// Time to first token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt_start_ms: Option<u64>,
    /// Time spent producing tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt_inner_ms: Option<u64>,
    /// Wall time of the whole call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt_all_ms: Option<u64>,
    /// Output tokens per second while producing tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v_tout_inner: Option<f64>,
}

impl GenerationMetrics {
    /// Overwrites the fields present in `update`; absent fields are kept.
    pub fn merge(&mut self, update: &GenerationMetrics) {
        fn take<T: Copy>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.tokens_in, update.tokens_in);
        take(&mut self.tokens_out, update.tokens_out);
        take(&mut self.tokens_cache_read, update.tokens_cache_read);
        take(&mut self.dt_start_ms, update.dt_start_ms);
        take(&mut self.dt_inner_ms, update.dt_inner_ms);
        take(&mut self.dt_all_ms, update.dt_all_ms);
        take(&mut self.v_tout_inner, update.v_tout_inner);
    }

    /// Derives the output rate from the token count and the generation time.
    pub(crate) fn derive_output_rate(&mut self) {
        if self.v_tout_inner.is_some() {
            return;
        }
        let inner_ms = self.dt_inner_ms.or_else(|| {
            self.dt_all_ms
                .map(|all| all.saturating_sub(self.dt_start_ms.unwrap_or(0)))
        });
        if let (Some(tokens), Some(ms)) = (self.tokens_out, inner_ms)
            && ms > 0
        {
            let rate = tokens as f64 * 1000.0 / ms as f64;
            self.v_tout_inner = Some((rate * 100.0).round() / 100.0);
        }
    }
}

/// Who produced a message.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GeneratorKind {
    /// A model known only by name.
    Named,
    /// A model resolved to a vendor route.
    Aix { vendor_id: VendorId, model_id: String },
}

/// Generator metadata accumulated alongside the content fragments.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Generator {
    pub kind: GeneratorKind,
    /// Model name; streams may replace it with the vendor's canonical name.
    pub name: String,
    pub metrics: Option<GenerationMetrics>,
    pub token_stop_reason: Option<TokenStopReason>,
}

impl Generator {
    /// Generator for a model known only by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            kind: GeneratorKind::Named,
            name: name.into(),
            metrics: None,
            token_stop_reason: None,
        }
    }

    /// Generator for a model resolved through a vendor.
    pub fn aix(vendor_id: impl Into<VendorId>, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            kind: GeneratorKind::Aix {
                vendor_id: vendor_id.into(),
                model_id: model_id.clone(),
            },
            name: model_id,
            metrics: None,
            token_stop_reason: None,
        }
    }

    /// Merges the name, metrics and stop reason present in `update`.
    ///
    /// The kind is never replaced and nothing is cleared.
    pub fn merge_from(&mut self, update: &Generator) {
        if !update.name.is_empty() {
            self.name.clone_from(&update.name);
        }
        if let Some(metrics) = &update.metrics {
            self.metrics
                .get_or_insert_with(GenerationMetrics::default)
                .merge(metrics);
        }
        if update.token_stop_reason.is_some() {
            self.token_stop_reason = update.token_stop_reason;
        }
    }
}
