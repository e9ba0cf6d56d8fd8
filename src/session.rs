/// Active-model context for one CLI session.
///
/// Operations that act on "the current model" (asking the assistant,
/// predicting, browsing history) take a `&SessionState` instead of reading a
/// global. The model comes from `--model` or, failing that, the backend's
/// default-model setting.
use crate::api::ApiClient;
use crate::error::{PulseError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    active_model: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.set_active_model(model);
        state
    }

    pub fn active_model(&self) -> Option<&str> {
        self.active_model.as_deref()
    }

    /// Set the active model. Blank names clear it.
    pub fn set_active_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        let model = model.trim();
        self.active_model = (!model.is_empty()).then(|| model.to_string());
    }

    pub fn clear(&mut self) {
        self.active_model = None;
    }

    /// The active model, or a validation error naming what to do about it.
    pub fn require_model(&self) -> Result<&str> {
        self.active_model().ok_or_else(|| {
            PulseError::validation(
                "No active model. Pass --model or set one with `pulse default-model set`.",
            )
        })
    }

    /// Resolve the session from an explicit choice, falling back to the
    /// backend's default model. An unreachable backend leaves it empty.
    pub fn resolve(explicit: Option<&str>, client: &ApiClient) -> Self {
        if let Some(model) = explicit {
            return Self::with_model(model);
        }
        match client.default_model() {
            Ok(Some(model)) => Self::with_model(model),
            Ok(None) => Self::new(),
            Err(err) => {
                log::debug!("default model lookup failed: {err}");
                Self::new()
            }
        }
    }
}
