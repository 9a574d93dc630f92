//! Activation error types.

/// Errors raised by user activation callbacks.
///
/// These are never returned from the public observe/stop calls. Engines
/// report them through [`Dispatcher::report`](crate::Dispatcher::report)
/// and leave the affected slot or key without an activation.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    /// The activation callback returned an error.
    #[error("activation for {context} failed: {source}")]
    Failed {
        /// Identifies the failing slot or key.
        context: String,
        /// The error returned by the callback.
        #[source]
        source: anyhow::Error,
    },

    /// The activation callback panicked.
    #[error("activation for {context} panicked: {message}")]
    Panicked {
        /// Identifies the failing slot or key.
        context: String,
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl ActivationError {
    /// Returns the context string identifying the failing slot or key.
    #[must_use]
    pub fn context(&self) -> &str {
        match self {
            Self::Failed { context, .. } | Self::Panicked { context, .. } => context,
        }
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
