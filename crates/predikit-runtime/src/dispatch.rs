//! Prediction dispatcher.
//!
//! One resolution path serves both one-shot and streamed predictions:
//! fetch the predictor, validate inputs, then pick a target. A predictor
//! runs natively when a provider is installed, the predictor ships a
//! platform library for this host, and the requested acceleration is
//! satisfiable; everything else goes to the remote API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use predikit_core::client::{ApiClient, ApiError, PredictionRequest};
use predikit_core::schemas::{Acceleration, Prediction, Predictor, PredictorStatus};
use predikit_core::value::Value;
use predikit_core::wire;
use predikit_registry::ResourceCache;

use crate::error::DispatchError;
use crate::events::{DispatchEvent, DispatchObserver, DispatchTarget, TracingObserver};
use crate::native::{current_library, ModuleConfig, NativeHandle, NativeProvider};
use crate::stream::{PredictionStream, StreamEmitter};
use crate::validate::validate_inputs;

/// Remote execution backend, normally an [`ApiClient`].
pub trait RemoteExecutor: Send + Sync {
    fn predictor(&self, tag: &str) -> Result<Predictor, ApiError>;
    fn create(&self, request: &PredictionRequest) -> Result<Prediction, ApiError>;
    fn stream(&self, request: &PredictionRequest) -> Result<RemoteEvents, ApiError>;
}

pub type RemoteEvents = Box<dyn Iterator<Item = Result<Prediction, ApiError>> + Send>;

impl RemoteExecutor for ApiClient {
    fn predictor(&self, tag: &str) -> Result<Predictor, ApiError> {
        self.get_predictor(tag)
    }

    fn create(&self, request: &PredictionRequest) -> Result<Prediction, ApiError> {
        self.create_prediction(request)
    }

    fn stream(&self, request: &PredictionRequest) -> Result<RemoteEvents, ApiError> {
        Ok(Box::new(self.stream_prediction(request)?))
    }
}

fn local_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("pred_{millis:x}{seq:04x}")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Target {
    Native(Arc<NativeHandle>),
    Remote,
}

impl Target {
    fn kind(&self) -> DispatchTarget {
        match self {
            Target::Native(_) => DispatchTarget::Native,
            Target::Remote => DispatchTarget::Remote,
        }
    }
}

/// Builds a [`Dispatcher`].
pub struct DispatcherBuilder {
    remote: Arc<dyn RemoteExecutor>,
    cache: Arc<ResourceCache>,
    provider: Option<Arc<dyn NativeProvider>>,
    observer: Arc<dyn DispatchObserver>,
    deadline: Option<Duration>,
}

impl DispatcherBuilder {
    /// Install an on-device execution provider.
    pub fn provider(mut self, provider: Arc<dyn NativeProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Overall deadline per prediction, checked at state transitions.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            inner: Arc::new(Inner {
                remote: self.remote,
                cache: self.cache,
                provider: self.provider,
                observer: self.observer,
                deadline: self.deadline,
                predictors: Mutex::new(HashMap::new()),
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }
}

struct Inner {
    remote: Arc<dyn RemoteExecutor>,
    cache: Arc<ResourceCache>,
    provider: Option<Arc<dyn NativeProvider>>,
    observer: Arc<dyn DispatchObserver>,
    deadline: Option<Duration>,
    predictors: Mutex<HashMap<String, Predictor>>,
    handles: Mutex<HashMap<String, Arc<NativeHandle>>>,
}

/// Routes predictions to native modules or the remote API.
///
/// Cheap to clone; clones share predictor metadata and module handles.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn builder(remote: Arc<dyn RemoteExecutor>, cache: Arc<ResourceCache>) -> DispatcherBuilder {
        DispatcherBuilder {
            remote,
            cache,
            provider: None,
            observer: Arc::new(TracingObserver),
            deadline: None,
        }
    }

    /// Fetch (and memoize) a predictor's metadata.
    pub fn predictor(&self, tag: &str) -> Result<Predictor, DispatchError> {
        self.inner.predictor(tag)
    }

    /// Run one prediction to its terminal state.
    ///
    /// Never panics and never returns early: every failure is folded into
    /// a terminal prediction with an error kind and message.
    pub fn create(
        &self,
        tag: &str,
        inputs: Vec<(String, Value)>,
        acceleration: Acceleration,
    ) -> Prediction {
        let started = Instant::now();
        match self.inner.create_inner(tag, &inputs, acceleration, started) {
            Ok((prediction, target)) => {
                self.inner.emit(DispatchEvent::Completed {
                    tag: tag.to_string(),
                    target,
                    latency_ms: started.elapsed().as_secs_f64() * 1e3,
                });
                prediction
            }
            Err(e) => {
                self.inner.emit(DispatchEvent::Failed {
                    tag: tag.to_string(),
                    kind: e.kind(),
                });
                e.into_failure(local_id(), tag)
            }
        }
    }

    /// Run one streamed prediction. The returned stream yields every
    /// partial prediction and ends after the terminal one; failures arrive
    /// as a terminal failed prediction.
    pub fn stream(
        &self,
        tag: &str,
        inputs: Vec<(String, Value)>,
        acceleration: Acceleration,
    ) -> PredictionStream {
        let inner = Arc::clone(&self.inner);
        let tag = tag.to_string();
        PredictionStream::spawn(move |emitter| {
            let started = Instant::now();
            match inner.stream_inner(&tag, &inputs, acceleration, started, emitter) {
                Ok(target) => inner.emit(DispatchEvent::Completed {
                    tag: tag.clone(),
                    target,
                    latency_ms: started.elapsed().as_secs_f64() * 1e3,
                }),
                Err(e) => {
                    inner.emit(DispatchEvent::Failed {
                        tag: tag.clone(),
                        kind: e.kind(),
                    });
                    emitter.emit(e.into_failure(local_id(), &tag));
                }
            }
        })
    }

    /// Whether a native module for this tag is loaded and not currently
    /// mid-invocation.
    pub fn ready(&self, tag: &str) -> bool {
        lock(&self.inner.handles)
            .get(tag)
            .map(|handle| handle.ready())
            .unwrap_or(false)
    }

    /// Unload the native module for a tag, if one is open. Idempotent;
    /// the next prediction for the tag re-resolves from scratch.
    pub fn unload(&self, tag: &str) {
        if let Some(handle) = lock(&self.inner.handles).remove(tag) {
            handle.unload();
        }
    }
}

impl Inner {
    fn emit(&self, event: DispatchEvent) {
        self.observer.on_event(&event);
    }

    fn check_deadline(&self, started: Instant) -> Result<(), DispatchError> {
        match self.deadline {
            Some(deadline) if started.elapsed() > deadline => Err(DispatchError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    fn predictor(&self, tag: &str) -> Result<Predictor, DispatchError> {
        if let Some(predictor) = lock(&self.predictors).get(tag) {
            return Ok(predictor.clone());
        }
        let predictor = self.remote.predictor(tag)?;
        lock(&self.predictors)
            .insert(tag.to_string(), predictor.clone());
        Ok(predictor)
    }

    fn resolve(
        &self,
        tag: &str,
        inputs: &[(String, Value)],
        acceleration: Acceleration,
    ) -> Result<(Vec<(String, Value)>, Target), DispatchError> {
        self.emit(DispatchEvent::Resolving {
            tag: tag.to_string(),
        });
        let predictor = self.predictor(tag)?;
        if predictor.status != PredictorStatus::Active {
            return Err(DispatchError::InvalidInput(format!(
                "predictor {tag} is not active"
            )));
        }
        let validated = validate_inputs(&predictor.signature, inputs)?;
        let target = self.select_target(tag, &predictor, acceleration)?;
        self.emit(DispatchEvent::Executing {
            tag: tag.to_string(),
            target: target.kind(),
        });
        Ok((validated, target))
    }

    fn select_target(
        &self,
        tag: &str,
        predictor: &Predictor,
        acceleration: Acceleration,
    ) -> Result<Target, DispatchError> {
        if let Some(handle) = lock(&self.handles).get(tag) {
            if acceleration.satisfied_by(handle.accelerations()) {
                return Ok(Target::Native(Arc::clone(handle)));
            }
            return Ok(Target::Remote);
        }
        let provider = match &self.provider {
            Some(provider) => provider,
            None => return Ok(Target::Remote),
        };
        let library = match current_library() {
            Some(library) => library,
            None => return Ok(Target::Remote),
        };
        if !predictor
            .resources
            .iter()
            .any(|r| r.kind == "dso" && r.name == library)
        {
            return Ok(Target::Remote);
        }

        let mut library_path = None;
        let mut resources = Vec::new();
        for resource in &predictor.resources {
            self.emit(DispatchEvent::FetchingResource {
                tag: tag.to_string(),
                name: resource.name.clone(),
            });
            let path = self.cache.ensure(resource)?;
            if resource.kind == "dso" && resource.name == library {
                library_path = Some(path);
            } else {
                resources.push((resource.name.clone(), path));
            }
        }
        let library_path = match library_path {
            Some(path) => path,
            None => return Ok(Target::Remote),
        };

        // Modules never see `Auto`; it resolves to a concrete class here.
        let resolved = match acceleration {
            Acceleration::Auto => Acceleration::Cpu,
            other => other,
        };
        let config = ModuleConfig {
            tag: tag.to_string(),
            library_path,
            resources,
            acceleration: resolved,
        };
        let module = provider.open(&config)?;
        if !acceleration.satisfied_by(module.accelerations()) {
            tracing::debug!(%tag, %acceleration, "module cannot serve acceleration, using remote");
            return Ok(Target::Remote);
        }
        let handle = Arc::new(NativeHandle::new(tag, module));
        lock(&self.handles).insert(tag.to_string(), Arc::clone(&handle));
        Ok(Target::Native(handle))
    }

    fn request(
        &self,
        tag: &str,
        inputs: Vec<(String, Value)>,
        acceleration: Acceleration,
    ) -> PredictionRequest {
        let mut request = PredictionRequest::new(tag, inputs);
        request.acceleration = acceleration;
        request
    }

    fn native_prediction(
        tag: &str,
        raw: &[u8],
        started: Instant,
    ) -> Result<Prediction, DispatchError> {
        let outputs = wire::decode_map(raw)?;
        Ok(Prediction {
            id: local_id(),
            tag: tag.to_string(),
            results: Some(outputs.into_iter().map(|(_, value)| value).collect()),
            latency_ms: Some(started.elapsed().as_secs_f64() * 1e3),
            error: None,
            logs: None,
        })
    }

    fn create_inner(
        &self,
        tag: &str,
        inputs: &[(String, Value)],
        acceleration: Acceleration,
        started: Instant,
    ) -> Result<(Prediction, DispatchTarget), DispatchError> {
        let (validated, target) = self.resolve(tag, inputs, acceleration)?;
        self.check_deadline(started)?;
        let kind = target.kind();
        let prediction = match target {
            Target::Native(handle) => {
                let payload = wire::encode_map(&validated);
                let raw = handle.invoke(&payload)?;
                self.check_deadline(started)?;
                Self::native_prediction(tag, &raw, started)?
            }
            Target::Remote => {
                let request = self.request(tag, validated, acceleration);
                let prediction = self.remote.create(&request)?;
                self.check_deadline(started)?;
                prediction
            }
        };
        Ok((prediction, kind))
    }

    fn stream_inner(
        &self,
        tag: &str,
        inputs: &[(String, Value)],
        acceleration: Acceleration,
        started: Instant,
        emitter: &StreamEmitter,
    ) -> Result<DispatchTarget, DispatchError> {
        let (validated, target) = self.resolve(tag, inputs, acceleration)?;
        self.check_deadline(started)?;
        let kind = target.kind();
        match target {
            Target::Native(handle) => {
                let payload = wire::encode_map(&validated);
                let mut decode_failure = None;
                handle.invoke_stream(&payload, &mut |raw| {
                    if emitter.cancelled() || decode_failure.is_some() {
                        return;
                    }
                    match Self::native_prediction(tag, &raw, started) {
                        Ok(prediction) => {
                            emitter.emit(prediction);
                        }
                        Err(e) => decode_failure = Some(e),
                    }
                })?;
                match decode_failure {
                    Some(e) => Err(e),
                    None => Ok(kind),
                }
            }
            Target::Remote => {
                let request = self.request(tag, validated, acceleration);
                for event in self.remote.stream(&request)? {
                    if emitter.cancelled() {
                        break;
                    }
                    self.check_deadline(started)?;
                    match event {
                        Ok(prediction) => {
                            if !emitter.emit(prediction) {
                                break;
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(kind)
            }
        }
    }
}
