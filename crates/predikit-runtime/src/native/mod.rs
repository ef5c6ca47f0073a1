//! On-device execution boundary.
//!
//! A [`NativeProvider`] opens predictor modules from materialized platform
//! libraries; an open module is held behind a [`NativeHandle`] that
//! serializes invocations and supports idempotent unloading. The default
//! build ships no provider, in which case every prediction runs remotely.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use predikit_core::schemas::Acceleration;

pub mod platform;

pub use platform::{current_library, module_library};

/// Error reported by a native module.
///
/// `code` follows the module ABI: zero is success and never appears here,
/// negative codes are runtime faults, positive codes are predictor-defined.
#[derive(Debug, Clone, thiserror::Error)]
#[error("native module error ({code}): {message}")]
pub struct NativeError {
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Everything a provider needs to open a predictor module.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub tag: String,
    /// Materialized platform library for this host.
    pub library_path: PathBuf,
    /// Remaining materialized resources, by name.
    pub resources: Vec<(String, PathBuf)>,
    pub acceleration: Acceleration,
}

/// An open predictor module.
///
/// Input and output maps travel in the binary wire form of
/// [`predikit_core::wire`]. Invocations take `&mut self`; the handle
/// provides the locking.
pub trait NativeModule: Send {
    /// Bitmask of [`Acceleration`] targets this module can serve.
    fn accelerations(&self) -> u32 {
        Acceleration::Cpu.bits()
    }

    /// Run one prediction over a wire-encoded input map, returning the
    /// wire-encoded output map.
    fn invoke(&mut self, inputs: &[u8]) -> Result<Vec<u8>, NativeError>;

    /// Run one prediction, emitting zero or more partial output maps
    /// before returning. The default forwards to [`NativeModule::invoke`]
    /// and emits once.
    fn invoke_stream(
        &mut self,
        inputs: &[u8],
        emit: &mut dyn FnMut(Vec<u8>),
    ) -> Result<(), NativeError> {
        let outputs = self.invoke(inputs)?;
        emit(outputs);
        Ok(())
    }
}

/// Opens native modules for predictors that ship a platform library.
pub trait NativeProvider: Send + Sync {
    fn open(&self, config: &ModuleConfig) -> Result<Box<dyn NativeModule>, NativeError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Thread-safe owner of an open module.
///
/// Invocations are serialized; `unload` is idempotent and any invocation
/// after it fails with a runtime fault rather than touching freed state.
pub struct NativeHandle {
    tag: String,
    module: Mutex<Option<Box<dyn NativeModule>>>,
}

impl NativeHandle {
    pub fn new(tag: impl Into<String>, module: Box<dyn NativeModule>) -> Self {
        Self {
            tag: tag.into(),
            module: Mutex::new(Some(module)),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether the module is loaded and not currently mid-invocation.
    pub fn ready(&self) -> bool {
        match self.module.try_lock() {
            Ok(guard) => guard.is_some(),
            Err(_) => false,
        }
    }

    /// Acceleration bitmask of the loaded module, or zero after unload.
    pub fn accelerations(&self) -> u32 {
        lock(&self.module)
            .as_ref()
            .map(|module| module.accelerations())
            .unwrap_or(0)
    }

    pub fn invoke(&self, inputs: &[u8]) -> Result<Vec<u8>, NativeError> {
        let mut guard = lock(&self.module);
        match guard.as_mut() {
            Some(module) => module.invoke(inputs),
            None => Err(NativeError::new(-1, format!("module {} is unloaded", self.tag))),
        }
    }

    pub fn invoke_stream(
        &self,
        inputs: &[u8],
        emit: &mut dyn FnMut(Vec<u8>),
    ) -> Result<(), NativeError> {
        let mut guard = lock(&self.module);
        match guard.as_mut() {
            Some(module) => module.invoke_stream(inputs, emit),
            None => Err(NativeError::new(-1, format!("module {} is unloaded", self.tag))),
        }
    }

    /// Drop the module. Safe to call more than once.
    pub fn unload(&self) {
        if lock(&self.module).take().is_some() {
            tracing::debug!(tag = %self.tag, "native module unloaded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoModule;

    impl NativeModule for EchoModule {
        fn invoke(&mut self, inputs: &[u8]) -> Result<Vec<u8>, NativeError> {
            Ok(inputs.to_vec())
        }
    }

    #[test]
    fn handle_serializes_and_unloads() {
        let handle = NativeHandle::new("@fxn/echo", Box::new(EchoModule));
        assert!(handle.ready());
        assert_eq!(handle.invoke(b"abc").unwrap(), b"abc");

        handle.unload();
        handle.unload();
        assert!(!handle.ready());
        let err = handle.invoke(b"abc").unwrap_err();
        assert_eq!(err.code, -1);
    }

    #[test]
    fn default_stream_emits_once() {
        let handle = NativeHandle::new("@fxn/echo", Box::new(EchoModule));
        let mut chunks = Vec::new();
        handle
            .invoke_stream(b"xyz", &mut |chunk| chunks.push(chunk))
            .unwrap();
        assert_eq!(chunks, vec![b"xyz".to_vec()]);
    }
}
