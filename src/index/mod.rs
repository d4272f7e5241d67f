//! The asset index: canonical request paths mapped to the encoded files that
//! exist for them on disk.

pub mod handle;
pub mod walker;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compression::Encoding;
use crate::error::{Error, Result};
use crate::logging::LoggingExt;

pub use handle::IndexHandle;
pub use walker::{build_index, Indexer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Compressed,
    Uncompressed,
}

/// The two directory trees assets are served from. They may be the same directory.
#[derive(Debug, Clone)]
pub struct Roots {
    compressed: PathBuf,
    uncompressed: PathBuf,
}

impl Roots {
    /// Canonicalizes both roots. A missing root is fatal.
    pub fn resolve(compressed: &Path, uncompressed: &Path) -> Result<Self> {
        Ok(Self {
            compressed: canonical_root(compressed)?,
            uncompressed: canonical_root(uncompressed)?,
        })
    }

    pub fn path(&self, kind: RootKind) -> &Path {
        match kind {
            RootKind::Compressed => &self.compressed,
            RootKind::Uncompressed => &self.uncompressed,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.compressed == self.uncompressed
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    let canonical = root.log_operation("canonicalize", || fs::canonicalize(root));
    match canonical {
        Ok(path) if path.is_dir() => Ok(path),
        Ok(_) => Err(Error::RootNotFound(root.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(Error::RootNotFound(root.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// One encoded file backing an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    encoding: Arc<Encoding>,
    root: RootKind,
    /// Root-relative path of the uncompressed file name, `/`-separated.
    file: String,
}

impl Variant {
    pub fn new(encoding: Arc<Encoding>, root: RootKind, file: String) -> Self {
        Self {
            encoding,
            root,
            file,
        }
    }

    pub fn encoding(&self) -> &Arc<Encoding> {
        &self.encoding
    }

    pub fn root(&self) -> RootKind {
        self.root
    }

    /// The uncompressed file name, which also determines the content type.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Root-relative path of the file actually holding this encoding.
    pub fn encoded_file(&self) -> String {
        self.encoding.encoded_name(&self.file)
    }
}

/// Everything indexed for one canonical path. Holds at most one variant per
/// encoding, ordered by registry rank.
#[derive(Debug, Clone, Default)]
pub struct AssetEntry {
    variants: Vec<Variant>,
}

impl AssetEntry {
    /// Adds `variant` unless its encoding is already present. Returns whether it was added.
    fn insert(&mut self, variant: Variant) -> bool {
        let rank = variant.encoding.rank();
        match self
            .variants
            .binary_search_by_key(&rank, |v| v.encoding.rank())
        {
            Ok(_) => false,
            Err(pos) => {
                self.variants.insert(pos, variant);
                true
            }
        }
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn encodings(&self) -> Vec<Arc<Encoding>> {
        self.variants.iter().map(|v| Arc::clone(&v.encoding)).collect()
    }

    pub fn variant(&self, encoding: &Encoding) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.encoding.rank() == encoding.rank())
    }

    pub fn has_uncompressed(&self) -> bool {
        self.variants.iter().any(|v| v.encoding.is_uncompressed())
    }
}

#[derive(Debug)]
pub struct AssetIndex {
    roots: Roots,
    entries: HashMap<String, AssetEntry>,
}

impl AssetIndex {
    pub fn new(roots: Roots) -> Self {
        Self {
            roots,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, canonical: String, variant: Variant) -> bool {
        self.entries.entry(canonical).or_default().insert(variant)
    }

    pub fn get(&self, canonical: &str) -> Option<&AssetEntry> {
        self.entries.get(canonical)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AssetEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    pub fn physical_path(&self, variant: &Variant) -> PathBuf {
        self.roots.path(variant.root).join(variant.encoded_file())
    }
}
