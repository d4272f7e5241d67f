use std::fs::{self, DirEntry};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Instant;

use super::{AssetIndex, RootKind, Roots, Variant};
use crate::compression::{CompressionRegistry, Encoding};
use crate::error::{Error, Result};

/// Indexes `compressed_root` (and `uncompressed_root` when it differs) into an
/// [`AssetIndex`]. Fails with [`Error::RootNotFound`] when a root is missing.
pub fn build_index(
    compressed_root: &Path,
    uncompressed_root: &Path,
    registry: &CompressionRegistry,
    extensions: &[String],
) -> Result<AssetIndex> {
    let roots = Roots::resolve(compressed_root, uncompressed_root)?;
    Indexer::new(registry, extensions).build(roots)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkMode {
    /// Only files carrying a registered compression suffix count.
    Compressed,
    /// Every file is an uncompressed variant of itself.
    Uncompressed,
    /// Single shared root: suffixed files are compressed variants, everything else
    /// is uncompressed.
    Shared,
}

/// A file found during the walk, keyed by the canonical path it serves.
#[derive(Debug)]
struct Discovery {
    canonical: String,
    variant: Variant,
}

enum Child<'scope> {
    Spawned(String, ScopedJoinHandle<'scope, Result<Vec<Discovery>>>),
    Inline(String, Result<Vec<Discovery>>),
}

/// Releases a worker slot when the subdirectory thread finishes, even on panic.
struct WorkerSlot<'a>(&'a AtomicUsize);

impl Drop for WorkerSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Concurrent directory walker. Each subdirectory is walked on its own scoped
/// thread while worker slots remain, inline otherwise; a directory completes only
/// after all of its children have been joined.
pub struct Indexer<'a> {
    registry: &'a CompressionRegistry,
    extensions: &'a [String],
    max_workers: usize,
    workers: AtomicUsize,
}

impl<'a> Indexer<'a> {
    pub fn new(registry: &'a CompressionRegistry, extensions: &'a [String]) -> Self {
        let cpus = thread::available_parallelism().map_or(4, |n| n.get());
        Self {
            registry,
            extensions,
            max_workers: cpus * 4,
            workers: AtomicUsize::new(0),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn build(&self, roots: Roots) -> Result<AssetIndex> {
        let start_time = Instant::now();
        log::info!(
            "Indexing {} (uncompressed: {})",
            roots.path(RootKind::Compressed).display(),
            roots.path(RootKind::Uncompressed).display()
        );

        let discoveries = thread::scope(|scope| -> Result<Vec<Discovery>> {
            if roots.is_shared() {
                let root = roots.path(RootKind::Compressed).to_path_buf();
                return self.walk_dir(scope, WalkMode::Shared, root, String::new());
            }

            let compressed_root = roots.path(RootKind::Compressed).to_path_buf();
            let uncompressed_root = roots.path(RootKind::Uncompressed).to_path_buf();
            let compressed = scope.spawn(move || {
                self.walk_dir(scope, WalkMode::Compressed, compressed_root, String::new())
            });
            let mut found =
                self.walk_dir(scope, WalkMode::Uncompressed, uncompressed_root, String::new())?;
            let mut compressed = join_worker(compressed)?;
            // compressed variants first so inference conflicts resolve the same way every run
            compressed.append(&mut found);
            Ok(compressed)
        })?;

        let mut index = AssetIndex::new(roots);
        let mut duplicates = 0;
        for Discovery { canonical, variant } in discoveries {
            if !index.insert(canonical, variant) {
                duplicates += 1;
            }
        }
        log::debug!("Ignored {} duplicate variants", duplicates);

        log::info!(
            "Indexed {} assets in {}",
            index.len(),
            humantime::format_duration(start_time.elapsed())
        );
        Ok(index)
    }

    fn walk_dir<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        mode: WalkMode,
        dir: PathBuf,
        rel_dir: String,
    ) -> Result<Vec<Discovery>> {
        let mut entries: Vec<DirEntry> = fs::read_dir(&dir)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    None
                }
            })
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut found = Vec::new();
        let mut children = Vec::new();
        for entry in entries {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                log::warn!("Skipping non UTF-8 file name: {}", path.display());
                continue;
            };
            let rel = join_rel(&rel_dir, &name);

            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            if file_type.is_dir() {
                children.push(self.descend(scope, mode, path, rel));
            } else if file_type.is_file() || points_to_file(&path) {
                self.classify(mode, &rel_dir, &name, &mut found);
            } else {
                log::debug!("Not indexing {}", path.display());
            }
        }

        for child in children {
            let (rel, result) = match child {
                Child::Spawned(rel, handle) => (rel, join_worker(handle)),
                Child::Inline(rel, result) => (rel, result),
            };
            merge_child(&rel, result, &mut found)?;
        }

        Ok(found)
    }

    fn descend<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        mode: WalkMode,
        dir: PathBuf,
        rel: String,
    ) -> Child<'scope> {
        if !self.reserve_worker() {
            let result = self.walk_dir(scope, mode, dir, rel.clone());
            return Child::Inline(rel, result);
        }

        let rel_dir = rel.clone();
        let handle = scope.spawn(move || {
            let _slot = WorkerSlot(&self.workers);
            self.walk_dir(scope, mode, dir, rel_dir)
        });
        Child::Spawned(rel, handle)
    }

    fn reserve_worker(&self) -> bool {
        self.workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_workers).then_some(n + 1)
            })
            .is_ok()
    }

    /// Turns one file into zero or more discoveries according to the walk mode.
    fn classify(&self, mode: WalkMode, rel_dir: &str, name: &str, found: &mut Vec<Discovery>) {
        let compressed = match mode {
            WalkMode::Uncompressed => None,
            WalkMode::Compressed | WalkMode::Shared => self.registry.match_suffix(name),
        };

        match (compressed, mode) {
            (Some((encoding, stem)), _) => {
                let file = join_rel(rel_dir, stem);
                self.discover(encoding, RootKind::Compressed, file, found);
            }
            (None, WalkMode::Uncompressed | WalkMode::Shared) => {
                let file = join_rel(rel_dir, name);
                self.discover(self.registry.uncompressed(), RootKind::Uncompressed, file, found);
            }
            (None, WalkMode::Compressed) => {}
        }
    }

    /// Records `file` under its own path and under the path with the first matching
    /// extension stripped.
    fn discover(
        &self,
        encoding: &Arc<Encoding>,
        root: RootKind,
        file: String,
        found: &mut Vec<Discovery>,
    ) {
        for ext in self.extensions {
            let inferred = file
                .strip_suffix(ext.as_str())
                .and_then(|s| s.strip_suffix('.'))
                .filter(|s| !s.is_empty() && !s.ends_with('/'));
            if let Some(canonical) = inferred {
                found.push(Discovery {
                    canonical: canonical.to_string(),
                    variant: Variant::new(Arc::clone(encoding), root, file.clone()),
                });
                break;
            }
        }

        found.push(Discovery {
            canonical: file.clone(),
            variant: Variant::new(Arc::clone(encoding), root, file),
        });
    }
}

/// Folds a subdirectory's discoveries into its parent's. An unreadable
/// subdirectory is logged and skipped; worker failures abort the walk.
fn merge_child(
    rel: &str,
    result: Result<Vec<Discovery>>,
    found: &mut Vec<Discovery>,
) -> Result<()> {
    match result {
        Ok(mut sub) => found.append(&mut sub),
        Err(Error::Io(e)) => log::warn!("Skipping directory {}: {}", rel, e),
        Err(e) => return Err(e),
    }
    Ok(())
}

fn join_worker(handle: ScopedJoinHandle<'_, Result<Vec<Discovery>>>) -> Result<Vec<Discovery>> {
    handle
        .join()
        .map_err(|_| Error::IndexWorker("directory worker panicked".to_string()))?
}

/// Symlinks are indexed when they resolve to a regular file; linked directories
/// are not followed.
fn points_to_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
