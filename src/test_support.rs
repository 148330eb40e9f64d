//! Fixtures shared by unit tests: a tiny HTTP server and tar.gz builders.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
    chunked: bool,
}

#[derive(Default)]
pub struct FixtureServerBuilder {
    routes: HashMap<String, Route>,
}

impl FixtureServerBuilder {
    pub fn route(mut self, path: &str, status: u16, body: Vec<u8>) -> Self {
        self.routes.insert(
            path.to_string(),
            Route {
                status,
                body,
                chunked: false,
            },
        );
        self
    }

    /// Serve `body` with chunked encoding and no `Content-Length`
    pub fn route_chunked(mut self, path: &str, body: Vec<u8>) -> Self {
        self.routes.insert(
            path.to_string(),
            Route {
                status: 200,
                body,
                chunked: true,
            },
        );
        self
    }

    pub async fn spawn(self) -> FixtureServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(self.routes);
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

        let task = {
            let hits = Arc::clone(&hits);
            tokio::spawn(async move {
                loop {
                    let Ok((mut stream, _)) = listener.accept().await else {
                        break;
                    };
                    let routes = Arc::clone(&routes);
                    let hits = Arc::clone(&hits);
                    tokio::spawn(async move {
                        let mut request = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                            match stream.read(&mut buf).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => request.extend_from_slice(&buf[..n]),
                            }
                        }
                        let head = String::from_utf8_lossy(&request);
                        let path = head
                            .lines()
                            .next()
                            .and_then(|line| line.split_whitespace().nth(1))
                            .unwrap_or("/")
                            .to_string();
                        *hits.lock().unwrap().entry(path.clone()).or_default() += 1;

                        let route = routes.get(&path).cloned().unwrap_or(Route {
                            status: 404,
                            body: b"not found".to_vec(),
                            chunked: false,
                        });
                        let mut response = format!("HTTP/1.1 {} FIXTURE\r\n", route.status);
                        response.push_str("Connection: close\r\n");
                        if route.chunked {
                            response.push_str("Transfer-Encoding: chunked\r\n\r\n");
                            let mut out = response.into_bytes();
                            for chunk in route.body.chunks(512) {
                                out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                                out.extend_from_slice(chunk);
                                out.extend_from_slice(b"\r\n");
                            }
                            out.extend_from_slice(b"0\r\n\r\n");
                            let _ = stream.write_all(&out).await;
                        } else {
                            response
                                .push_str(&format!("Content-Length: {}\r\n\r\n", route.body.len()));
                            let mut out = response.into_bytes();
                            out.extend_from_slice(&route.body);
                            let _ = stream.write_all(&out).await;
                        }
                        let _ = stream.shutdown().await;
                    });
                }
            })
        };

        FixtureServer { addr, hits, task }
    }
}

pub struct FixtureServer {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    task: JoinHandle<()>,
}

impl FixtureServer {
    pub fn start() -> FixtureServerBuilder {
        FixtureServerBuilder::default()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Builds gzip-compressed tarballs, including entries `tar::Builder` would
/// refuse (parent segments, absolute paths).
#[derive(Default)]
pub struct TarGzBuilder {
    entries: Vec<(String, tar::EntryType, Vec<u8>, Option<String>)>,
}

impl TarGzBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.entries
            .push((path.to_string(), tar::EntryType::Regular, content.to_vec(), None));
        self
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.entries
            .push((path.to_string(), tar::EntryType::Directory, Vec::new(), None));
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.entries.push((
            path.to_string(),
            tar::EntryType::Symlink,
            Vec::new(),
            Some(target.to_string()),
        ));
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, kind, content, link) in self.entries {
            let mut header = tar::Header::new_old();
            {
                let raw = header.as_old_mut();
                raw.name = [0; 100];
                raw.name[..path.len()].copy_from_slice(path.as_bytes());
                if let Some(link) = &link {
                    raw.linkname = [0; 100];
                    raw.linkname[..link.len()].copy_from_slice(link.as_bytes());
                }
            }
            header.set_entry_type(kind);
            header.set_mode(if kind.is_dir() { 0o755 } else { 0o644 });
            header.set_size(content.len() as u64);
            header.set_mtime(0);
            header.set_cksum();
            builder.append(&header, content.as_slice()).unwrap();
        }
        let encoder = builder.into_inner().unwrap();
        encoder.finish().unwrap()
    }
}
