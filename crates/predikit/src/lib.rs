//! Predikit client SDK.
//!
//! Predictions run through a [`Dispatcher`], which routes each request to
//! an on-device native module when one is available for the predictor and
//! platform, and to the remote prediction API otherwise.
//!
//! ```no_run
//! use predikit::{connect, Acceleration, Value};
//!
//! # fn main() -> Result<(), predikit::SetupError> {
//! let dispatcher = connect("https://api.fxn.ai/v1/", None)?;
//! let prediction = dispatcher.create(
//!     "@fxn/greeting",
//!     vec![("name".into(), Value::String("Peter".into()))],
//!     Acceleration::Auto,
//! );
//! println!("{:?}", prediction.results);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub use predikit_core::{
    Acceleration, ApiClient, ApiError, CodecError, Dtype, EnumValue, EnumerationMember,
    NamedValue, Parameter, Prediction, PredictionErrorKind, PredictionFailure, PredictionRequest,
    PredictionResource, Predictor, PredictorAccess, PredictorStatus, RetryPolicy, Signature,
    Tensor, Value,
};
pub use predikit_core::{value, wire};
pub use predikit_registry::{CacheConfig, CacheError, ResourceCache, ResourceFetcher};
pub use predikit_runtime::{
    DispatchError, DispatchEvent, DispatchObserver, DispatchTarget, Dispatcher,
    DispatcherBuilder, ModuleConfig, NativeError, NativeModule, NativeProvider, PredictionStream,
};

/// Errors raised while wiring up a client.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Build a dispatcher against a remote endpoint, with the per-user
/// resource cache and no native provider.
pub fn connect(api_url: &str, access_key: Option<&str>) -> Result<Dispatcher, SetupError> {
    let mut client = ApiClient::new(api_url)?;
    if let Some(key) = access_key {
        client = client.with_access_key(key);
    }
    let cache = ResourceCache::new(CacheConfig::default())?;
    Ok(Dispatcher::builder(Arc::new(client), Arc::new(cache)).build())
}
