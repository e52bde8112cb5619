//! Shared fixtures for integration tests: a scripted HTTP server and
//! archive builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use tiny_http::{Header, Response, Server, StatusCode};

use rig_pm::{HttpClient, HttpClientConfig};

/// One scripted answer
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            etag: None,
            last_modified: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            etag: None,
            last_modified: None,
        }
    }

    /// Answer 304 when the request carries a matching `If-None-Match`
    pub fn with_etag(mut self, etag: &str) -> Self {
        self.etag = Some(etag.to_string());
        self
    }

    /// Answer 304 when the request carries a matching `If-Modified-Since`
    pub fn with_last_modified(mut self, last_modified: &str) -> Self {
        self.last_modified = Some(last_modified.to_string());
        self
    }
}

/// A request as seen by the server
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

#[derive(Default)]
struct State {
    /// Replies per path; the last one is repeated once the others are used
    routes: HashMap<String, VecDeque<Reply>>,
    seen: Vec<Seen>,
}

/// HTTP server on an ephemeral port answering from scripted replies
pub struct TestServer {
    server: Arc<Server>,
    state: Arc<Mutex<State>>,
    port: u16,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));

        let handle = {
            let server = Arc::clone(&server);
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                for request in server.incoming_requests() {
                    let path = request.url().to_string();
                    let header = |name: &'static str| {
                        request
                            .headers()
                            .iter()
                            .find(|h| h.field.equiv(name))
                            .map(|h| h.value.as_str().to_string())
                    };
                    let if_none_match = header("If-None-Match");
                    let if_modified_since = header("If-Modified-Since");

                    let reply = {
                        let mut state = state.lock().unwrap();
                        state.seen.push(Seen {
                            path: path.clone(),
                            if_none_match: if_none_match.clone(),
                            if_modified_since: if_modified_since.clone(),
                        });
                        match state.routes.get_mut(&path) {
                            Some(queue) if queue.len() > 1 => queue.pop_front(),
                            Some(queue) => queue.front().cloned(),
                            None => None,
                        }
                    };

                    let reply = reply.unwrap_or_else(|| Reply::status(404));
                    let not_modified = (reply.etag.is_some() && reply.etag == if_none_match)
                        || (reply.last_modified.is_some() && reply.last_modified == if_modified_since);

                    let mut response = if not_modified {
                        Response::from_data(Vec::new()).with_status_code(StatusCode(304))
                    } else {
                        Response::from_data(reply.body.clone()).with_status_code(StatusCode(reply.status))
                    };
                    if let Some(etag) = &reply.etag {
                        response.add_header(Header::from_bytes(&b"ETag"[..], etag.as_bytes()).unwrap());
                    }
                    if let Some(last_modified) = &reply.last_modified {
                        response.add_header(
                            Header::from_bytes(&b"Last-Modified"[..], last_modified.as_bytes()).unwrap(),
                        );
                    }
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            server,
            state,
            port,
            handle: Some(handle),
        }
    }

    /// Script the replies for `path`, replacing earlier ones
    pub fn route(&self, path: &str, replies: Vec<Reply>) {
        let mut state = self.state.lock().unwrap();
        state.routes.insert(path.to_string(), replies.into());
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Requests received for `path`
    pub fn seen(&self, path: &str) -> Vec<Seen> {
        let state = self.state.lock().unwrap();
        state.seen.iter().filter(|s| s.path == path).cloned().collect()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.seen(path).len()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Raw TCP server whose first `truncated` answers announce the full body
/// length but close the connection after a few bytes.
pub struct TruncatingServer {
    port: u16,
    hits: Arc<AtomicUsize>,
}

impl TruncatingServer {
    pub fn start(body: &[u8], truncated: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let body = body.to_vec();

        {
            let hits = Arc::clone(&hits);
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    read_request_head(&mut stream);
                    let attempt = hits.fetch_add(1, Ordering::SeqCst);

                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let sent = if attempt < truncated { &body[..body.len() / 10] } else { &body[..] };
                    let _ = stream.write_all(head.as_bytes());
                    let _ = stream.write_all(sent);
                    let _ = stream.flush();
                    let _ = stream.shutdown(Shutdown::Both);
                }
            });
        }

        Self { port, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn read_request_head(stream: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 512];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}

/// HTTP settings with short backoff so retry tests stay fast
pub fn fast_http() -> HttpClientConfig {
    HttpClientConfig::new()
        .with_max_retries(3)
        .with_retry_delay(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(10))
}

pub fn fast_client() -> Arc<HttpClient> {
    Arc::new(HttpClient::with_config(fast_http()).unwrap())
}

/// Build a gzipped tarball; a path ending in `/` is a directory entry
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, data) in entries {
        let mut header = tar::Header::new_ustar();
        if path.ends_with('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            builder.append_data(&mut header, path, std::io::empty()).unwrap();
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, path, *data).unwrap();
        }
    }

    builder.into_inner().unwrap().finish().unwrap()
}

pub fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Sorted names of the entries of a directory; empty when it is missing
pub fn dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<_> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
