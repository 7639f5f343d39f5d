use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use pkg_constants::audit::{HTTP_USER_AGENT, PIPELINE_CHANNEL_CAPACITY, STDIN_SOURCE};

use crate::error::AuditError;

/// One open audit log stream.
pub struct AuditSource {
    /// Path, URL or `-`, for error reporting.
    pub name: String,
    pub reader: Box<dyn Read + Send>,
}

impl std::fmt::Debug for AuditSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSource").field("name", &self.name).finish()
    }
}

impl AuditSource {
    pub fn new(name: &str, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.to_string(),
            reader: Box::new(reader),
        }
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Self {
        Self::new(name, Cursor::new(bytes))
    }
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Open every source descriptor.
///
/// A descriptor is an `http://`/`https://` URL, `-` for stdin, a file, or a
/// directory (walked recursively in name order). Failures are collected
/// per source; the sources that did open are returned alongside.
pub async fn open_sources(sources: &[String]) -> (Vec<AuditSource>, Vec<AuditError>) {
    let mut opened = Vec::new();
    let mut errors = Vec::new();

    debug!("Opening {} audit source(s)", sources.len());

    let mut client = None;
    for source in sources {
        if is_url(source) {
            if client.is_none() {
                match http_client() {
                    Ok(c) => client = Some(c),
                    Err(e) => {
                        errors.push(source_error(source, e));
                        continue;
                    }
                }
            }
            if let Some(client) = client.as_ref() {
                match fetch(client, source).await {
                    Ok(s) => opened.push(s),
                    Err(e) => errors.push(e),
                }
            }
            continue;
        }

        if source == STDIN_SOURCE {
            opened.push(AuditSource::new(STDIN_SOURCE, std::io::stdin()));
            continue;
        }

        let path = Path::new(source);
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => walk_dir(path, &mut opened, &mut errors),
            Ok(_) => open_file(path, &mut opened, &mut errors),
            Err(e) => {
                debug!("Failed to stat {}: {}", source, e);
                errors.push(source_error(source, e));
            }
        }
    }

    (opened, errors)
}

fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .user_agent(HTTP_USER_AGENT)
        .build()
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<AuditSource, AuditError> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| source_error(url, e))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(AuditError::Source {
            source_name: url.to_string(),
            message: format!("HTTP {}", response.status()),
        });
    }

    let (tx, rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
    let name = url.to_string();
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = tx.closed() => break,
                chunk = response.chunk() => chunk,
            };
            let item = match next {
                Ok(Some(chunk)) => Ok(chunk.to_vec()),
                Ok(None) => break,
                Err(e) => Err(io::Error::other(e)),
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
        debug!("Finished fetching {}", name);
    });

    Ok(AuditSource::new(
        url,
        BodyReader {
            chunks: rx,
            current: Cursor::new(Vec::new()),
        },
    ))
}

/// Blocking view of a response body that a runtime task fetches chunk by
/// chunk. Must be read outside the runtime, like every decoder.
struct BodyReader {
    chunks: mpsc::Receiver<io::Result<Vec<u8>>>,
    current: Cursor<Vec<u8>>,
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            match self.chunks.blocking_recv() {
                Some(Ok(chunk)) => self.current = Cursor::new(chunk),
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
    }
}

fn open_file(path: &Path, opened: &mut Vec<AuditSource>, errors: &mut Vec<AuditError>) {
    let name = path.display().to_string();
    match File::open(path) {
        Ok(f) => {
            debug!("Opened {}", name);
            opened.push(AuditSource::new(&name, f));
        }
        Err(e) => errors.push(source_error(&name, e)),
    }
}

fn walk_dir(dir: &Path, opened: &mut Vec<AuditSource>, errors: &mut Vec<AuditError>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read directory {}: {}", dir.display(), e);
            errors.push(source_error(&dir.display().to_string(), e));
            return;
        }
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => paths.push(entry.path()),
            Err(e) => errors.push(source_error(&dir.display().to_string(), e)),
        }
    }
    paths.sort();

    for path in paths {
        if path.is_dir() {
            debug!("Descending into {}", path.display());
            walk_dir(&path, opened, errors);
        } else {
            open_file(&path, opened, errors);
        }
    }
}

fn source_error(source: &str, e: impl std::fmt::Display) -> AuditError {
    AuditError::Source {
        source_name: source.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer a single HTTP request on 127.0.0.1 and return its URL.
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/audit.log", addr)
    }

    #[tokio::test]
    async fn opens_files_and_walks_directories_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.log"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("a.log"), "{}").unwrap();
        let single = dir.path().join("b.log");

        let sources = vec![
            dir.path().display().to_string(),
            single.display().to_string(),
        ];
        let (opened, errors) = open_sources(&sources).await;
        assert!(errors.is_empty());
        let names: Vec<String> = opened.iter().map(|s| s.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                dir.path().join("b.log").display().to_string(),
                dir.path().join("nested").join("a.log").display().to_string(),
                single.display().to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn missing_path_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.log"), "{}").unwrap();
        let sources = vec![
            dir.path().join("missing.log").display().to_string(),
            dir.path().join("ok.log").display().to_string(),
        ];
        let (opened, errors) = open_sources(&sources).await;
        assert_eq!(opened.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], AuditError::Source { .. }));
    }

    #[tokio::test]
    async fn non_ok_response_is_a_source_error() {
        let url = serve_once("HTTP/1.1 404 Not Found", String::new()).await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.log"), "{}").unwrap();
        let file = dir.path().join("ok.log").display().to_string();

        let (opened, errors) = open_sources(&[url.clone(), file.clone()]).await;
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            AuditError::Source {
                source_name,
                message,
            } => {
                assert_eq!(source_name, &url);
                assert!(message.contains("404"), "{}", message);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].name, file);
    }

    #[tokio::test]
    async fn response_body_is_read_as_a_stream() {
        let body = "{\"a\":1}\n{\"a\":2}\n".to_string();
        let url = serve_once("HTTP/1.1 200 OK", body.clone()).await;

        let (mut opened, errors) = open_sources(&[url.clone()]).await;
        assert!(errors.is_empty());
        let mut source = opened.remove(0);
        assert_eq!(source.name, url);

        let read = tokio::task::spawn_blocking(move || {
            let mut text = String::new();
            source.reader.read_to_string(&mut text).map(|_| text)
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(read, body);
    }
}
