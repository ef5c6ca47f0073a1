//! Content-addressed cache for prediction resources.
//!
//! Resources land under `<root>/<identity>/<name>`, where the identity is
//! the declared checksum when the server provides one and a digest of the
//! URL otherwise. Downloads go to a `.partial` sibling and are published
//! with an atomic rename, so a crash never leaves a half-written file at
//! the final path. Concurrent requests for the same resource share one
//! download.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use sha2::{Digest, Sha256};

use predikit_core::schemas::PredictionResource;

use crate::error::CacheError;
use crate::fetch::{FetchPolicy, HttpFetcher, ResourceFetcher};

/// Cache location and verification behavior.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Root directory; resolved per-user when unset.
    pub root: Option<PathBuf>,
    /// Re-hash files already present in the cache before reusing them.
    pub verify_on_hit: bool,
    /// Retry behavior for downloads.
    pub retry: FetchPolicy,
}

fn default_root() -> Result<PathBuf, CacheError> {
    directories::ProjectDirs::from("com", "predikit", "predikit")
        .map(|dirs| dirs.cache_dir().join("resources"))
        .ok_or(CacheError::CacheDirUnavailable)
}

/// Strip an optional algorithm prefix and normalize to lowercase hex.
fn normalize_checksum(checksum: &str) -> String {
    let trimmed = checksum.trim();
    let hex = trimmed.strip_prefix("sha256:").unwrap_or(trimmed);
    hex.to_ascii_lowercase()
}

/// Streaming SHA-256 of a file, as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String, CacheError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Flight {
    state: Mutex<Option<Result<PathBuf, CacheError>>>,
    done: Condvar,
}

impl Flight {
    fn complete(&self, result: Result<PathBuf, CacheError>) {
        *lock(&self.state) = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<PathBuf, CacheError> {
        let mut state = lock(&self.state);
        loop {
            if let Some(result) = state.as_ref() {
                return result.clone();
            }
            state = self
                .done
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Downloads and caches prediction resources.
pub struct ResourceCache {
    root: PathBuf,
    verify_on_hit: bool,
    retry: FetchPolicy,
    fetcher: Arc<dyn ResourceFetcher>,
    flights: Mutex<HashMap<String, Arc<Flight>>>,
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let root = match config.root {
            Some(root) => root,
            None => default_root()?,
        };
        Ok(Self {
            root,
            verify_on_hit: config.verify_on_hit,
            retry: config.retry,
            fetcher: Arc::new(HttpFetcher::new()?),
            flights: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the download backend. Used by the runtime's tests and by
    /// embedders with their own transfer stack.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache identity of a resource: its checksum when declared, a digest
    /// of its URL otherwise.
    fn identity(resource: &PredictionResource) -> String {
        match &resource.checksum {
            Some(checksum) => normalize_checksum(checksum),
            None => {
                let mut hasher = Sha256::new();
                hasher.update(resource.url.as_bytes());
                hex::encode(&hasher.finalize()[..16])
            }
        }
    }

    fn validate_name(name: &str) -> Result<(), CacheError> {
        let clean = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.contains('\0');
        if clean {
            Ok(())
        } else {
            Err(CacheError::InvalidPath(name.to_string()))
        }
    }

    /// Final path a resource will occupy, whether or not it is cached yet.
    pub fn path_for(&self, resource: &PredictionResource) -> Result<PathBuf, CacheError> {
        Self::validate_name(&resource.name)?;
        Ok(self.root.join(Self::identity(resource)).join(&resource.name))
    }

    /// Materialize a resource, downloading it if needed, and return its
    /// path. Concurrent calls for the same resource block on one download.
    pub fn ensure(&self, resource: &PredictionResource) -> Result<PathBuf, CacheError> {
        let path = self.path_for(resource)?;
        let key = path.to_string_lossy().into_owned();

        let (flight, leader) = {
            let mut flights = lock(&self.flights);
            match flights.get(&key) {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::default());
                    flights.insert(key.clone(), Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if !leader {
            return flight.wait();
        }

        let result = self.materialize(resource, &path);
        flight.complete(result.clone());
        lock(&self.flights).remove(&key);
        result
    }

    fn materialize(
        &self,
        resource: &PredictionResource,
        path: &Path,
    ) -> Result<PathBuf, CacheError> {
        let expected = resource.checksum.as_deref().map(normalize_checksum);

        if path.is_file() {
            let stale = match (&expected, self.verify_on_hit) {
                (Some(expected), true) => &sha256_file(path)? != expected,
                _ => false,
            };
            if !stale {
                tracing::debug!(name = %resource.name, "resource cache hit");
                return Ok(path.to_path_buf());
            }
            tracing::warn!(name = %resource.name, "cached resource is corrupt, refetching");
            fs::remove_file(path)?;
        }

        let dir = match path.parent() {
            Some(dir) => dir,
            None => return Err(CacheError::InvalidPath(resource.name.clone())),
        };
        fs::create_dir_all(dir)?;

        let partial = path.with_extension("partial");
        tracing::info!(name = %resource.name, url = %resource.url, "fetching resource");
        let mut failure = None;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                std::thread::sleep(self.retry.delay(attempt - 1));
                tracing::warn!(name = %resource.name, attempt, "retrying resource fetch");
            }
            // Recreate the partial file so a failed attempt leaves no bytes.
            let outcome = {
                let mut sink = fs::File::create(&partial)?;
                self.fetcher.fetch(&resource.url, &mut sink)
            };
            match outcome {
                Ok(_) => {
                    failure = None;
                    break;
                }
                Err(e) => failure = Some(e),
            }
        }
        if let Some(e) = failure {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        if let Some(expected) = expected {
            let actual = sha256_file(&partial)?;
            if actual != expected {
                let _ = fs::remove_file(&partial);
                return Err(CacheError::Integrity {
                    name: resource.name.clone(),
                    expected,
                    actual,
                });
            }
        }

        fs::rename(&partial, path)?;
        Ok(path.to_path_buf())
    }

    /// Delete every cached resource.
    pub fn clear(&self) -> Result<(), CacheError> {
        if self.root.is_dir() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher {
        body: Vec<u8>,
        calls: AtomicUsize,
        delay: Option<std::time::Duration>,
    }

    impl StaticFetcher {
        fn new(body: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_vec(),
                calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn slow(body: &[u8], delay: std::time::Duration) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_vec(),
                calls: AtomicUsize::new(0),
                delay: Some(delay),
            })
        }
    }

    impl ResourceFetcher for StaticFetcher {
        fn fetch(&self, _url: &str, sink: &mut dyn Write) -> Result<u64, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            sink.write_all(&self.body).map_err(CacheError::from)?;
            Ok(self.body.len() as u64)
        }
    }

    fn fast_retry(max_attempts: u32) -> FetchPolicy {
        FetchPolicy {
            max_attempts,
            base_delay: std::time::Duration::from_millis(1),
        }
    }

    fn cache_in(dir: &Path, fetcher: Arc<dyn ResourceFetcher>) -> ResourceCache {
        ResourceCache::new(CacheConfig {
            root: Some(dir.to_path_buf()),
            retry: fast_retry(3),
            ..CacheConfig::default()
        })
        .unwrap()
        .with_fetcher(fetcher)
    }

    fn resource(name: &str, checksum: Option<&str>) -> PredictionResource {
        PredictionResource {
            name: name.into(),
            kind: "dso".into(),
            url: format!("https://cdn.example.com/{name}"),
            checksum: checksum.map(str::to_string),
        }
    }

    fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    #[test]
    fn second_ensure_hits_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::new(b"module bytes");
        let cache = cache_in(dir.path(), fetcher.clone());
        let res = resource("libgreeting.so", Some(&sha256_hex(b"module bytes")));

        let first = cache.ensure(&res).unwrap();
        let second = cache.ensure(&res).unwrap();
        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&first).unwrap(), b"module bytes");
    }

    #[test]
    fn checksum_mismatch_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), StaticFetcher::new(b"corrupted"));
        let res = resource("libgreeting.so", Some(&sha256_hex(b"module bytes")));

        let err = cache.ensure(&res).unwrap_err();
        assert!(matches!(err, CacheError::Integrity { .. }));
        let entry_dir = dir.path().join(normalize_checksum(&sha256_hex(b"module bytes")));
        assert!(!entry_dir.join("libgreeting.so").exists());
        assert!(!entry_dir.join("libgreeting.partial").exists());
    }

    #[test]
    fn resource_without_checksum_is_keyed_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::new(b"data");
        let cache = cache_in(dir.path(), fetcher.clone());
        let res = resource("weights.bin", None);

        let first = cache.ensure(&res).unwrap();
        cache.ensure(&res).unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(first.starts_with(dir.path()));
    }

    #[test]
    fn path_separators_in_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), StaticFetcher::new(b""));
        for name in ["../escape", "a/b", "a\\b", "", ".."] {
            let err = cache.ensure(&resource(name, None)).unwrap_err();
            assert!(matches!(err, CacheError::InvalidPath(_)), "{name}");
        }
    }

    #[test]
    fn concurrent_ensures_share_one_download() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::slow(b"shared", std::time::Duration::from_millis(50));
        let cache = Arc::new(cache_in(dir.path(), fetcher.clone()));
        let res = resource("shared.bin", Some(&sha256_hex(b"shared")));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let res = res.clone();
                std::thread::spawn(move || cache.ensure(&res).unwrap())
            })
            .collect();
        let paths: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn verify_on_hit_refetches_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::new(b"module bytes");
        let cache = ResourceCache::new(CacheConfig {
            root: Some(dir.path().to_path_buf()),
            verify_on_hit: true,
            retry: fast_retry(3),
        })
        .unwrap()
        .with_fetcher(fetcher.clone());
        let res = resource("libgreeting.so", Some(&sha256_hex(b"module bytes")));

        let path = cache.ensure(&res).unwrap();
        fs::write(&path, b"bitrot").unwrap();
        cache.ensure(&res).unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fs::read(&path).unwrap(), b"module bytes");
    }

    struct FlakyFetcher {
        body: Vec<u8>,
        calls: AtomicUsize,
        failures: usize,
    }

    impl ResourceFetcher for FlakyFetcher {
        fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, CacheError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CacheError::Fetch {
                    url: url.to_string(),
                    message: "connection reset".into(),
                });
            }
            sink.write_all(&self.body).map_err(CacheError::from)?;
            Ok(self.body.len() as u64)
        }
    }

    #[test]
    fn transient_fetch_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FlakyFetcher {
            body: b"module bytes".to_vec(),
            calls: AtomicUsize::new(0),
            failures: 2,
        });
        let cache = cache_in(dir.path(), fetcher.clone());
        let res = resource("libgreeting.so", Some(&sha256_hex(b"module bytes")));

        let path = cache.ensure(&res).unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fs::read(&path).unwrap(), b"module bytes");
    }

    #[test]
    fn fetch_retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FlakyFetcher {
            body: Vec::new(),
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
        });
        let cache = cache_in(dir.path(), fetcher.clone());

        let err = cache.ensure(&resource("weights.bin", None)).unwrap_err();
        assert!(matches!(err, CacheError::Fetch { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn integrity_failures_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::new(b"corrupted");
        let cache = cache_in(dir.path(), fetcher.clone());
        let res = resource("libgreeting.so", Some(&sha256_hex(b"module bytes")));

        let err = cache.ensure(&res).unwrap_err();
        assert!(matches!(err, CacheError::Integrity { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn checksum_prefix_and_case_are_normalized() {
        assert_eq!(normalize_checksum("sha256:ABCDEF"), "abcdef");
        assert_eq!(normalize_checksum("  abcdef  "), "abcdef");
    }
}
