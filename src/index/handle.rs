use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use super::{AssetIndex, Indexer, Roots};
use crate::compression::CompressionRegistry;
use crate::error::{Error, Result};
use crate::logging::LoggingExt;

#[derive(Debug, Default)]
struct Shared {
    published: OnceLock<std::result::Result<AssetIndex, String>>,
    lock: Mutex<()>,
    ready: Condvar,
}

/// Publish-once slot for the asset index. Readers block until the index is
/// built; afterwards lookups go through the lock-free `OnceLock` fast path.
#[derive(Debug, Clone, Default)]
pub struct IndexHandle {
    shared: Arc<Shared>,
}

impl IndexHandle {
    /// Resolves the roots on the calling thread, so a missing root fails
    /// immediately, then builds the index on a background thread.
    pub fn spawn(
        compressed_root: PathBuf,
        uncompressed_root: PathBuf,
        registry: Arc<CompressionRegistry>,
        extensions: Vec<String>,
    ) -> Result<Self> {
        let roots = Roots::resolve(&compressed_root, &uncompressed_root)?;
        let handle = Self::default();

        let publisher = handle.clone();
        thread::Builder::new()
            .name("indexer".to_string())
            .spawn(move || {
                let result = "asset index".log_operation("build", || {
                    Indexer::new(&registry, &extensions).build(roots)
                });
                publisher.publish(result);
            })?;

        Ok(handle)
    }

    /// A handle whose index is already available.
    pub fn ready(index: AssetIndex) -> Self {
        let handle = Self::default();
        handle.publish(Ok(index));
        handle
    }

    fn publish(&self, result: Result<AssetIndex>) {
        let _ = self.shared.published.set(result.map_err(|e| e.to_string()));
        // taking the lock orders the notification after any waiter's last check
        let _guard = self
            .shared
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared.ready.notify_all();
    }

    pub fn is_ready(&self) -> bool {
        self.shared.published.get().is_some()
    }

    /// Waits up to `timeout` for indexing to finish.
    pub fn wait(&self, timeout: Duration) -> Result<&AssetIndex> {
        if self.shared.published.get().is_none() {
            let guard = self
                .shared
                .lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let (_guard, wait) = self
                .shared
                .ready
                .wait_timeout_while(guard, timeout, |_| self.shared.published.get().is_none())
                .unwrap_or_else(PoisonError::into_inner);
            if wait.timed_out() && !self.is_ready() {
                return Err(Error::IndexTimeout(timeout));
            }
        }

        match self.shared.published.get() {
            Some(Ok(index)) => Ok(index),
            Some(Err(message)) => Err(Error::IndexWorker(message.clone())),
            None => Err(Error::IndexTimeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn waiters_see_the_complete_index() {
        let root = TempDir::new().unwrap();
        for i in 0..50 {
            let dir = root.path().join(format!("dir{}", i));
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("a.js"), "a").unwrap();
            fs::write(dir.join("a.js.gz"), "a").unwrap();
        }

        let mut registry = CompressionRegistry::new();
        registry.register("gzip", "gz");
        let handle = IndexHandle::spawn(
            root.path().to_path_buf(),
            root.path().to_path_buf(),
            Arc::new(registry),
            Vec::new(),
        )
        .unwrap();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.wait(Duration::from_secs(30)).unwrap().len())
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.join().unwrap(), 50);
        }
        assert!(handle.is_ready());
    }

    #[test]
    fn missing_root_fails_before_spawning() {
        let root = TempDir::new().unwrap();
        let result = IndexHandle::spawn(
            root.path().join("missing"),
            root.path().to_path_buf(),
            Arc::new(CompressionRegistry::new()),
            Vec::new(),
        );
        assert!(matches!(result, Err(Error::RootNotFound(_))));
    }

    #[test]
    fn unpublished_index_times_out() {
        let handle = IndexHandle::default();
        let start = Instant::now();
        let err = handle.wait(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::IndexTimeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn failed_build_is_reported_to_every_waiter() {
        let handle = IndexHandle::default();
        handle.publish(Err(Error::IndexWorker("boom".to_string())));
        for _ in 0..2 {
            match handle.wait(Duration::from_secs(1)) {
                Err(Error::IndexWorker(message)) => assert!(message.contains("boom")),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
