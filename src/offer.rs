//! Exit-intent offer submission
//!
//! Accepting the retention offer is an explicit asynchronous operation with a
//! success/failure result. The tracker makes exactly one attempt per call and
//! never retries on its own.

use crate::error::EngageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Data captured by the offer form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferSubmission {
    pub form_id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl OfferSubmission {
    pub fn new(form_id: impl Into<String>) -> Self {
        Self {
            form_id: form_id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Backend that receives offer submissions (lead API, CRM, ...)
#[async_trait]
pub trait OfferSubmitter: Send + Sync {
    async fn submit(&self, submission: &OfferSubmission) -> Result<(), EngageError>;
}
