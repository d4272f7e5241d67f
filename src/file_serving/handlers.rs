use std::fs::File;
use std::io::{self, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use mime_guess::{from_path, mime};

use super::path_utils::{contain_path, normalize_request_path};
use crate::args::Config;
use crate::compression::{select, Encoding, Selection};
use crate::error::{Error, Result};
use crate::index::{AssetIndex, IndexHandle};
use crate::logging::LoggingExt;
use crate::{log_error, log_request, log_response};

/// A physical file chosen for a request, with the headers describing it.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    pub path: PathBuf,
    pub encoding: Arc<Encoding>,
    pub headers: Vec<(String, String)>,
}

/// Looks requests up in a built index and negotiates which variant to send.
pub struct Resolver<'a> {
    index: &'a AssetIndex,
    config: &'a Config,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a AssetIndex, config: &'a Config) -> Self {
        Self { index, config }
    }

    /// Errors are all pass-through: `BadRequestPath`, `NotIndexed` or
    /// `NoAcceptableEncoding`.
    pub fn resolve(&self, target: &str, accept_encoding: Option<&str>) -> Result<ResolvedAsset> {
        let canonical = normalize_request_path(target, &self.config.index)?;
        let entry = self
            .index
            .get(&canonical)
            .ok_or_else(|| Error::NotIndexed(canonical.clone()))?;

        let available = entry.encodings();
        let encoding = match select(accept_encoding, &available, &self.config.order_preference) {
            Selection::Matched(encoding) => encoding,
            Selection::NoMatch => return Err(Error::NoAcceptableEncoding(canonical)),
        };
        let variant = entry
            .variant(&encoding)
            .ok_or_else(|| Error::NoAcceptableEncoding(canonical.clone()))?;
        log::debug!(
            "Resolved {} to {} ({})",
            canonical,
            variant.encoded_file(),
            encoding
        );

        let mut headers = vec![(
            "Content-Type".to_string(),
            content_type(Path::new(variant.file())),
        )];
        if let Some(content_encoding) = encoding.content_encoding() {
            headers.push(("Content-Encoding".to_string(), content_encoding.to_string()));
        }
        headers.push(("Vary".to_string(), "Accept-Encoding".to_string()));

        Ok(ResolvedAsset {
            path: self.index.physical_path(variant),
            encoding,
            headers,
        })
    }
}

pub fn handle_file_request(
    mut client: TcpStream,
    request: &str,
    headers: &[(String, String)],
    index: &IndexHandle,
    config: &Config,
) -> io::Result<()> {
    let start_time = Instant::now();
    let mut parts = request.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("/");
    log_request!(method, target);

    let head_only = match method {
        "GET" => false,
        "HEAD" => true,
        _ => {
            write_text(
                &mut client,
                "405 Method Not Allowed",
                &[("Allow", "GET, HEAD")],
                false,
            )?;
            log_response!(405, target, start_time.elapsed(), "-");
            return Ok(());
        }
    };

    let index = match index.wait(config.index_timeout) {
        Ok(index) => index,
        Err(e) => {
            log_error!(e, "Asset index unavailable");
            let status = write_text(&mut client, "503 Service Unavailable", &[], head_only)?;
            log_response!(status, target, start_time.elapsed(), "-");
            return Ok(());
        }
    };

    let accept_encoding = accept_encoding(headers);
    let resolver = Resolver::new(index, config);
    let (status, encoding) = match resolver.resolve(target, accept_encoding.as_deref()) {
        Ok(asset) => {
            let status = send_file(&mut client, &asset.path, &asset.headers, head_only)?;
            (status, asset.encoding.name().to_string())
        }
        Err(e) => {
            log::debug!("{}, falling back to plain file", e);
            let status = serve_fallback(&mut client, target, config, head_only)?;
            (status, Encoding::UNCOMPRESSED.to_string())
        }
    };

    log_response!(status, target, start_time.elapsed(), encoding);
    Ok(())
}

/// MIME type for `path`, with `charset=utf-8` on textual types.
fn content_type(path: &Path) -> String {
    let guessed = from_path(path).first_or_octet_stream();
    let textual = guessed.type_() == mime::TEXT
        || matches!(guessed.subtype().as_str(), "javascript" | "json")
        || guessed.suffix() == Some(mime::JSON);
    if textual && guessed.get_param(mime::CHARSET).is_none() {
        format!("{}; charset=utf-8", guessed)
    } else {
        guessed.to_string()
    }
}

/// Every `Accept-Encoding` header of the request, joined into one list.
fn accept_encoding(headers: &[(String, String)]) -> Option<String> {
    let values: Vec<&str> = headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("accept-encoding"))
        .map(|(_, v)| v.as_str())
        .collect();
    (!values.is_empty()).then(|| values.join(", "))
}

/// Serves `target` as a plain file from the uncompressed root.
fn serve_fallback(
    client: &mut TcpStream,
    target: &str,
    config: &Config,
    head_only: bool,
) -> io::Result<u16> {
    let relative = match normalize_request_path(target, &config.index) {
        Ok(relative) => relative,
        Err(e) => {
            log::debug!("{}", e);
            return write_text(client, "400 Bad Request", &[], head_only);
        }
    };

    let path = match contain_path(&config.serve_dir, &relative) {
        Ok(Some(path)) if path.is_dir() => path.join(&config.index),
        Ok(Some(path)) => path,
        Ok(None) => return write_text(client, "404 Not Found", &[], head_only),
        Err(e) => {
            log_error!(e, format!("Failed to resolve {}", relative));
            return write_text(client, "500 Internal Server Error", &[], head_only);
        }
    };
    if !path.is_file() {
        log::debug!("Not a regular file: {}", path.display());
        return write_text(client, "404 Not Found", &[], head_only);
    }

    let headers = vec![("Content-Type".to_string(), content_type(&path))];
    send_file(client, &path, &headers, head_only)
}

/// Streams `path` with `headers`. A file that cannot be opened is reported as a
/// server error, not a miss: indexed variants must exist.
fn send_file(
    client: &mut TcpStream,
    path: &Path,
    headers: &[(String, String)],
    head_only: bool,
) -> io::Result<u16> {
    let opened = path.log_operation("open", || {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok::<_, io::Error>((file, length))
    });
    let (mut file, length) = match opened {
        Ok(opened) => opened,
        Err(_) => return write_text(client, "500 Internal Server Error", &[], head_only),
    };

    client.write_all(b"HTTP/1.1 200 OK\r\n")?;
    for (key, value) in headers {
        client.write_all(format!("{}: {}\r\n", key, value).as_bytes())?;
    }
    client.write_all(format!("Content-Length: {}\r\n", length).as_bytes())?;
    client.write_all(b"Connection: close\r\n\r\n")?;

    if !head_only {
        io::copy(&mut file, client)?;
    }
    client.flush()?;
    Ok(200)
}

/// Writes a short plain-text response whose body is the status reason.
fn write_text(
    client: &mut TcpStream,
    status: &str,
    extra_headers: &[(&str, &str)],
    head_only: bool,
) -> io::Result<u16> {
    let code = status
        .split_whitespace()
        .next()
        .and_then(|c| c.parse().ok())
        .unwrap_or(500);
    let body = status.split_once(' ').map_or(status, |(_, reason)| reason);

    client.write_all(format!("HTTP/1.1 {}\r\n", status).as_bytes())?;
    client.write_all(b"Content-Type: text/plain\r\n")?;
    for (key, value) in extra_headers {
        client.write_all(format!("{}: {}\r\n", key, value).as_bytes())?;
    }
    client.write_all(format!("Content-Length: {}\r\n", body.len()).as_bytes())?;
    client.write_all(b"Connection: close\r\n\r\n")?;
    if !head_only {
        client.write_all(body.as_bytes())?;
    }
    client.flush()?;
    Ok(code)
}
