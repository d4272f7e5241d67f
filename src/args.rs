use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(short, long)]
    pub listen_addr: String,

    /// Directory holding the uncompressed files.
    #[arg(short, long)]
    pub serve_dir: PathBuf,

    /// Directory holding pre-compressed files. Defaults to --serve-dir.
    #[arg(short, long)]
    pub compressed_dir: Option<PathBuf>,

    #[arg(short, long, default_value = "index.html")]
    pub index: String,

    #[arg(long)]
    pub disable_compression: bool,

    #[arg(short = 'b', long)]
    pub enable_brotli: bool,

    /// Additional encoding, e.g. `zstd=zst`. May be repeated.
    #[arg(long = "custom-compression", value_name = "NAME=EXT", value_parser = parse_custom_compression)]
    pub custom_compressions: Vec<CustomCompression>,

    /// Encodings the server prefers, highest priority first.
    #[arg(short, long, value_delimiter = ',', default_value = "br")]
    pub order_preference: Vec<String>,

    /// Extensions that may be omitted from request paths, e.g. `html`.
    #[arg(short, long, value_delimiter = ',')]
    pub extensions: Vec<String>,

    #[arg(short = 't', long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub index_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomCompression {
    pub encoding_name: String,
    pub file_extension: String,
}

fn parse_custom_compression(value: &str) -> Result<CustomCompression, String> {
    let (name, ext) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=EXT, got {:?}", value))?;
    let name = name.trim();
    let ext = ext.trim().trim_start_matches('.');

    if name.is_empty() || ext.is_empty() {
        return Err(format!("encoding name and extension must not be empty: {:?}", value));
    }
    if name.contains(|c: char| c.is_whitespace() || c == ',' || c == ';') {
        return Err(format!("invalid encoding name {:?}", name));
    }

    Ok(CustomCompression {
        encoding_name: name.to_ascii_lowercase(),
        file_extension: ext.to_string(),
    })
}

/// Sanitized settings shared by the indexer, resolver and server.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub serve_dir: PathBuf,
    pub compressed_dir: PathBuf,
    pub index: String,
    pub disable_compression: bool,
    pub enable_brotli: bool,
    pub custom_compressions: Vec<CustomCompression>,
    pub order_preference: Vec<String>,
    pub extensions: Vec<String>,
    pub index_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            serve_dir: PathBuf::from("."),
            compressed_dir: PathBuf::from("."),
            index: "index.html".to_string(),
            disable_compression: false,
            enable_brotli: false,
            custom_compressions: Vec::new(),
            order_preference: vec!["br".to_string()],
            extensions: Vec::new(),
            index_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_args(args: Args) -> Self {
        let index = args.index.trim().trim_matches('/');
        let defaults = Self::default();

        Self {
            listen_addr: args.listen_addr,
            compressed_dir: args
                .compressed_dir
                .unwrap_or_else(|| args.serve_dir.clone()),
            serve_dir: args.serve_dir,
            index: if index.is_empty() {
                defaults.index
            } else {
                index.to_string()
            },
            disable_compression: args.disable_compression,
            enable_brotli: args.enable_brotli,
            custom_compressions: args.custom_compressions,
            order_preference: clean_list(args.order_preference, |s| s.to_ascii_lowercase()),
            extensions: clean_list(args.extensions, |s| {
                s.trim_start_matches('.').to_string()
            }),
            index_timeout: args.index_timeout,
        }
    }
}

fn clean_list(values: Vec<String>, normalize: impl Fn(&str) -> String) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for value in values {
        let value = normalize(value.trim());
        if !value.is_empty() && !cleaned.contains(&value) {
            cleaned.push(value);
        }
    }
    cleaned
}
