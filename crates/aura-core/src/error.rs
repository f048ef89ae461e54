use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// One rejected form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// Every field that failed validation, in form order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: &'static str, message: &'static str) {
        self.0.push(FieldError { field, message });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&FieldError> {
        self.0.first()
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|e| e.field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.fields().collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

/// Failure kinds produced by the funnel core.
///
/// Only [`FunnelError::Validation`] is meant to reach a visitor; every other
/// variant is logged and reported as a non-blocking outcome.
#[derive(Debug, Error)]
pub enum FunnelError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("webhook delivery failed: {0}")]
    Webhook(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
