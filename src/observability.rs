//! Correlation identifiers carried through one submission or launch

use uuid::Uuid;

/// Trace context for one pipeline operation.
///
/// `span()` opens a tracing span carrying the identifiers so that every log
/// line emitted by the stages below it can be tied back to one user intent.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub operation: String,
}

impl TraceContext {
    pub fn new(operation: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            operation: operation.to_string(),
        }
    }

    pub fn child_span(&self, operation: &str) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
            operation: operation.to_string(),
        }
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "pipeline",
            operation = %self.operation,
            trace_id = %self.trace_id,
            span_id = %self.span_id,
            parent_span_id = ?self.parent_span_id,
        )
    }
}
