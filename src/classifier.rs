//! Image classifier abstraction
//!
//! A classifier takes a locally stored photo and answers whether it likely
//! shows the screened condition, with a short rationale.

mod error;
mod gemini;

pub use error::{ClassifierError, ClassifierErrorKind};
pub use gemini::{GeminiClassifier, GeminiConfig};

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Outcome of a successful classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub is_positive: bool,
    pub rationale: String,
}

/// Common interface for image classification backends
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, path: &Path) -> Result<Assessment, ClassifierError>;

    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: ImageClassifier + ?Sized> ImageClassifier for Arc<T> {
    async fn classify(&self, path: &Path) -> Result<Assessment, ClassifierError> {
        (**self).classify(path).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for classifiers
pub struct LoggingClassifier {
    inner: Arc<dyn ImageClassifier>,
    model_id: String,
}

impl LoggingClassifier {
    pub fn new(inner: Arc<dyn ImageClassifier>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ImageClassifier for LoggingClassifier {
    async fn classify(&self, path: &Path) -> Result<Assessment, ClassifierError> {
        let start = std::time::Instant::now();
        let result = self.inner.classify(path).await;
        let duration = start.elapsed();

        match &result {
            Ok(assessment) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    photo = %path.display(),
                    positive = assessment.is_positive,
                    "Classification completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    photo = %path.display(),
                    error = %e.message,
                    kind = ?e.kind,
                    retryable = e.kind.is_retryable(),
                    "Classification failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
