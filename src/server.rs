use log::{debug, info};
use std::io::{self, BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::process;
use std::sync::Arc;
use std::thread;

use crate::args::Config;
use crate::compression::CompressionRegistry;
use crate::error::Result;
use crate::file_serving::handle_file_request;
use crate::index::IndexHandle;
use crate::log_error;

/// State shared by every connection thread.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub index: IndexHandle,
}

impl ServerState {
    /// Starts indexing in the background. Missing roots fail here, before any
    /// socket is bound.
    pub fn start(config: Config) -> Result<Self> {
        let registry = Arc::new(CompressionRegistry::from_config(&config));
        let index = IndexHandle::spawn(
            config.compressed_dir.clone(),
            config.serve_dir.clone(),
            registry,
            config.extensions.clone(),
        )?;
        Ok(Self {
            config: Arc::new(config),
            index,
        })
    }
}

pub fn start_server(config: Config) -> Result<()> {
    let state = ServerState::start(config)?;
    let listener = TcpListener::bind(&state.config.listen_addr)?;
    info!("Listening on: {}", state.config.listen_addr);
    info!("Serving directory: {}", state.config.serve_dir.display());
    if state.config.compressed_dir != state.config.serve_dir {
        info!(
            "Compressed files from: {}",
            state.config.compressed_dir.display()
        );
    }

    spawn_watchdog(&state)?;
    serve(listener, state)?;
    Ok(())
}

/// Exits the process when the index cannot be built in time, rather than leaving
/// every request waiting on it.
fn spawn_watchdog(state: &ServerState) -> io::Result<()> {
    let index = state.index.clone();
    let timeout = state.config.index_timeout;
    thread::Builder::new()
        .name("index-watchdog".to_string())
        .spawn(move || {
            if let Err(e) = index.wait(timeout) {
                log_error!(e, "Startup failed");
                process::exit(1);
            }
        })?;
    Ok(())
}

pub fn serve(listener: TcpListener, state: ServerState) -> io::Result<()> {
    for stream in listener.incoming() {
        let stream = stream?;
        let state = state.clone();

        thread::spawn(move || {
            if let Err(e) = handle_connection(stream, &state) {
                log_error!(e, "Error handling connection");
            }
        });
    }

    Ok(())
}

fn handle_connection(client: TcpStream, state: &ServerState) -> io::Result<()> {
    debug!("New connection from {:?}", client.peer_addr().ok());

    let mut buf_reader = BufReader::new(&client);
    let mut first_line = String::new();
    buf_reader.read_line(&mut first_line)?;
    debug!("Request line: {}", first_line.trim());

    let mut headers = Vec::new();
    let mut line = String::new();
    while {
        line.clear();
        buf_reader.read_line(&mut line)? > 0 && !line.trim().is_empty()
    } {
        debug!("Header line: {}", line.trim());
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    handle_file_request(client, &first_line, &headers, &state.index, &state.config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::CustomCompression;
    use flate2::read::GzDecoder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;
    use std::io::{Read, Write};
    use std::net::SocketAddr;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    impl Response {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    fn start(config: Config) -> SocketAddr {
        let state = ServerState::start(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || serve(listener, state));
        addr
    }

    fn request(addr: SocketAddr, method: &str, path: &str, accept: Option<&str>) -> Response {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let mut raw = format!("{} {} HTTP/1.1\r\nHost: localhost\r\n", method, path);
        if let Some(accept) = accept {
            raw.push_str(&format!("Accept-Encoding: {}\r\n", accept));
        }
        raw.push_str("\r\n");
        stream.write_all(raw.as_bytes()).unwrap();

        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).unwrap();
        let split = bytes
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head");
        let head = String::from_utf8_lossy(&bytes[..split]).to_string();
        let body = bytes[split + 4..].to_vec();

        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|c| c.parse().ok())
            .unwrap();
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Response {
            status,
            headers,
            body,
        }
    }

    fn gzip(content: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap()
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn config(compressed: &Path, uncompressed: &Path) -> Config {
        Config {
            serve_dir: uncompressed.to_path_buf(),
            compressed_dir: compressed.to_path_buf(),
            enable_brotli: true,
            index_timeout: Duration::from_secs(10),
            ..Config::default()
        }
    }

    #[test]
    fn serves_precompressed_gzip() {
        let root = TempDir::new().unwrap();
        let css = b"body { color: red; }\n".repeat(50);
        write(root.path(), "css/app.css", &css);
        write(root.path(), "css/app.css.gz", &gzip(&css));
        let addr = start(config(root.path(), root.path()));

        let response = request(addr, "GET", "/css/app.css", Some("gzip, deflate"));
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Encoding"), Some("gzip"));
        assert_eq!(response.header("Vary"), Some("Accept-Encoding"));
        assert_eq!(response.header("Content-Type"), Some("text/css; charset=utf-8"));

        let mut decoded = Vec::new();
        GzDecoder::new(&response.body[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, css);

        let plain = request(addr, "GET", "/css/app.css", None);
        assert_eq!(plain.status, 200);
        assert_eq!(plain.header("Content-Encoding"), None);
        assert_eq!(plain.body, css);
    }

    #[test]
    fn serves_custom_zstd_encoding_from_separate_root() {
        let compressed = TempDir::new().unwrap();
        let uncompressed = TempDir::new().unwrap();
        let js = b"console.log('hello');\n".repeat(40);
        write(uncompressed.path(), "app.js", &js);
        write(
            compressed.path(),
            "app.js.zst",
            &zstd::encode_all(&js[..], 3).unwrap(),
        );

        let mut config = config(compressed.path(), uncompressed.path());
        config.custom_compressions.push(CustomCompression {
            encoding_name: "zstd".into(),
            file_extension: "zst".into(),
        });
        config.order_preference = vec!["zstd".into()];
        let addr = start(config);

        let response = request(addr, "GET", "/app.js", Some("gzip, zstd;q=0.5"));
        assert_eq!(response.header("Content-Encoding"), Some("zstd"));
        assert_eq!(zstd::decode_all(&response.body[..]).unwrap(), js);

        let plain = request(addr, "GET", "/app.js", Some("gzip"));
        assert_eq!(plain.header("Content-Encoding"), None);
        assert_eq!(plain.body, js);
    }

    #[test]
    fn head_and_unsupported_methods() {
        let root = TempDir::new().unwrap();
        write(root.path(), "index.html", b"<h1>home</h1>");
        let addr = start(config(root.path(), root.path()));

        let head = request(addr, "HEAD", "/", None);
        assert_eq!(head.status, 200);
        assert_eq!(head.header("Content-Length"), Some("13"));
        assert!(head.body.is_empty());

        let post = request(addr, "POST", "/", None);
        assert_eq!(post.status, 405);
        assert_eq!(post.header("Allow"), Some("GET, HEAD"));
    }

    #[test]
    fn unresolved_requests_fall_back_to_plain_files() {
        let compressed = TempDir::new().unwrap();
        let uncompressed = TempDir::new().unwrap();
        write(compressed.path(), "data.json.gz", &gzip(b"{}"));
        write(uncompressed.path(), "docs/index.html", b"docs");
        let addr = start(config(compressed.path(), uncompressed.path()));

        // gzip only exists compressed and the client refuses it
        let refused = request(addr, "GET", "/data.json", Some("identity"));
        assert_eq!(refused.status, 404);

        // added after indexing, served by the fallback
        write(uncompressed.path(), "late.txt", b"late");
        let late = request(addr, "GET", "/late.txt", Some("gzip"));
        assert_eq!(late.status, 200);
        assert_eq!(late.body, b"late");

        let dir = request(addr, "GET", "/docs", None);
        assert_eq!(dir.status, 200);
        assert_eq!(dir.body, b"docs");

        let bad = request(addr, "GET", "/%FF", None);
        assert_eq!(bad.status, 400);

        let missing = request(addr, "GET", "/missing.txt", None);
        assert_eq!(missing.status, 404);
    }

    #[test]
    fn variant_removed_after_indexing_is_a_server_error() {
        let root = TempDir::new().unwrap();
        write(root.path(), "gone.txt.gz", &gzip(b"gone"));
        let state = ServerState::start(config(root.path(), root.path())).unwrap();
        state.index.wait(Duration::from_secs(10)).unwrap();
        fs::remove_file(root.path().join("gone.txt.gz")).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || serve(listener, state));

        let response = request(addr, "GET", "/gone.txt", Some("gzip"));
        assert_eq!(response.status, 500);
    }

    #[test]
    fn missing_root_fails_startup() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("dist");
        let result = ServerState::start(config(&missing, root.path()));
        assert!(matches!(
            result,
            Err(crate::error::Error::RootNotFound(path)) if path == missing
        ));
    }
}
