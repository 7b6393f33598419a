use thiserror::Error;

/// Boxed transport error carried inside [`HarnessError::Subscription`].
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Domain errors raised by the harness.
///
/// Most call sites propagate these through `anyhow::Result`; callers that need
/// to branch on the failure kind recover them with `downcast_ref`.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A handler could not subscribe to its topic/channel. Fatal for the run.
    #[error("{handler} failed to subscribe to topic '{topic}' on channel '{channel}': {source}")]
    Subscription {
        handler: String,
        topic: String,
        channel: String,
        #[source]
        source: TransportError,
    },

    /// A message was attributed to a handler that was never registered.
    #[error("unknown handler '{0}'")]
    UnknownHandler(String),

    /// The transport was asked to release a subscription it does not know.
    #[error("unknown subscription {0}")]
    UnknownSubscription(u64),

    /// Run or publish configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Topic or channel name does not follow queue naming rules.
    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },
}
