//! Prediction runtime for Predikit: validates inputs, resolves predictors,
//! and dispatches predictions to an on-device module or the remote API.

pub mod dispatch;
pub mod error;
pub mod events;
pub mod native;
pub mod stream;
pub mod validate;

pub use dispatch::{Dispatcher, DispatcherBuilder, RemoteEvents, RemoteExecutor};
pub use error::DispatchError;
pub use events::{DispatchEvent, DispatchObserver, DispatchTarget, TracingObserver};
pub use native::{
    current_library, module_library, ModuleConfig, NativeError, NativeHandle, NativeModule,
    NativeProvider,
};
pub use stream::PredictionStream;
pub use validate::validate_inputs;
