//! Dispatch lifecycle events.

use predikit_core::schemas::PredictionErrorKind;

/// Where a prediction ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DispatchTarget {
    Native,
    Remote,
}

/// Progress notification emitted while a prediction is dispatched.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Resolving {
        tag: String,
    },
    FetchingResource {
        tag: String,
        name: String,
    },
    Executing {
        tag: String,
        target: DispatchTarget,
    },
    Completed {
        tag: String,
        target: DispatchTarget,
        latency_ms: f64,
    },
    Failed {
        tag: String,
        kind: PredictionErrorKind,
    },
}

/// Receives dispatch events. Implementations must not block.
pub trait DispatchObserver: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

/// Default observer that forwards events to `tracing`.
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Resolving { tag } => {
                tracing::debug!(%tag, "resolving predictor");
            }
            DispatchEvent::FetchingResource { tag, name } => {
                tracing::info!(%tag, %name, "fetching resource");
            }
            DispatchEvent::Executing { tag, target } => {
                tracing::info!(%tag, %target, "executing prediction");
            }
            DispatchEvent::Completed {
                tag,
                target,
                latency_ms,
            } => {
                tracing::info!(%tag, %target, latency_ms, "prediction completed");
            }
            DispatchEvent::Failed { tag, kind } => {
                tracing::warn!(%tag, %kind, "prediction failed");
            }
        }
    }
}
