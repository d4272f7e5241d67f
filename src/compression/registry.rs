use std::fmt;
use std::sync::Arc;

use crate::args::Config;

/// A compression scheme and the filename suffix its pre-compressed files carry.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Encoding {
    name: String,
    suffix: String,
    rank: usize,
}

impl Encoding {
    pub const UNCOMPRESSED: &'static str = "none";

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Registration order, used to keep variant lists deterministic.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn is_uncompressed(&self) -> bool {
        self.suffix.is_empty()
    }

    /// Value for the `Content-Encoding` response header, if any.
    pub fn content_encoding(&self) -> Option<&str> {
        if self.is_uncompressed() {
            None
        } else {
            Some(&self.name)
        }
    }

    /// Name of the on-disk file holding this encoding of `file_name`.
    pub fn encoded_name(&self, file_name: &str) -> String {
        if self.is_uncompressed() {
            file_name.to_string()
        } else {
            format!("{}.{}", file_name, self.suffix)
        }
    }

    /// Header tokens compare case-insensitively against the encoding name.
    pub fn matches_token(&self, token: &str) -> bool {
        self.name.eq_ignore_ascii_case(token)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug)]
pub struct CompressionRegistry {
    encodings: Vec<Arc<Encoding>>,
}

impl CompressionRegistry {
    /// A registry knowing only the uncompressed encoding.
    pub fn new() -> Self {
        let mut registry = Self {
            encodings: Vec::new(),
        };
        registry.register(Encoding::UNCOMPRESSED, "");
        registry
    }

    /// Built-ins in fixed order: none, gzip, custom encodings, then brotli.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        if config.disable_compression {
            log::info!("Compression disabled, serving uncompressed files only");
            return registry;
        }

        registry.register("gzip", "gz");
        for custom in &config.custom_compressions {
            if !registry.register(&custom.encoding_name, &custom.file_extension) {
                log::warn!(
                    "Ignoring custom compression {}={}: suffix already registered",
                    custom.encoding_name,
                    custom.file_extension
                );
            }
        }
        if config.enable_brotli {
            registry.register("br", "br");
        }

        log::debug!(
            "Registered encodings: {}",
            registry
                .iter()
                .map(|e| format!("{}(.{})", e.name(), e.suffix()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        registry
    }

    /// Adds an encoding unless one with the same suffix exists (same name for the
    /// empty suffix). Returns whether it was added; the first registration wins.
    pub fn register(&mut self, name: &str, suffix: &str) -> bool {
        let suffix = suffix.trim_start_matches('.');
        let duplicate = self.encodings.iter().any(|e| {
            if suffix.is_empty() {
                e.is_uncompressed() || e.matches_token(name)
            } else {
                e.suffix == suffix
            }
        });
        if duplicate {
            return false;
        }

        self.encodings.push(Arc::new(Encoding {
            name: name.to_ascii_lowercase(),
            suffix: suffix.to_string(),
            rank: self.encodings.len(),
        }));
        true
    }

    pub fn uncompressed(&self) -> &Arc<Encoding> {
        // `new` always registers it first
        &self.encodings[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Encoding>> {
        self.encodings.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Encoding>> {
        self.encodings.iter().find(|e| e.matches_token(name))
    }

    /// Finds the compressed encoding whose suffix ends `file_name`, returning it with
    /// the file name stripped of that suffix. The longest matching suffix wins; the
    /// uncompressed encoding never matches.
    pub fn match_suffix<'a>(&self, file_name: &'a str) -> Option<(&Arc<Encoding>, &'a str)> {
        self.encodings
            .iter()
            .filter(|e| !e.is_uncompressed())
            .filter_map(|e| {
                let stem = file_name.strip_suffix(e.suffix.as_str())?.strip_suffix('.')?;
                (!stem.is_empty()).then_some((e, stem))
            })
            .max_by_key(|(e, _)| e.suffix.len())
    }
}

impl Default for CompressionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
