//! Error types for workflow templates

/// Errors raised while loading or serializing a workflow graph
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The template is not a mapping of node id → node descriptor
    #[error("malformed template: {reason}")]
    MalformedTemplate {
        /// What was wrong with the template
        reason: String,
    },

    /// Serializing the graph back to JSON failed
    #[error("failed to serialize graph: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl GraphError {
    /// Create a malformed-template error
    #[inline]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedTemplate {
            reason: reason.into(),
        }
    }

    /// Check if this is a template shape error
    #[inline]
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedTemplate { .. })
    }
}
