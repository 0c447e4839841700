use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RenderError;

const EMBEDDED_PREFIX: &str = "data:image/png;base64,";

/// Where a rendered syntax tree can be found.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeImage {
    Url(String),
    /// Base64 encoded PNG.
    Embedded(String),
}

impl TreeImage {
    /// Reference usable as an image source, also the persisted form.
    pub fn src(&self) -> String {
        match self {
            TreeImage::Url(url) => url.clone(),
            TreeImage::Embedded(data) => format!("{}{}", EMBEDDED_PREFIX, data),
        }
    }

    pub fn from_src(src: &str) -> Self {
        match src.strip_prefix(EMBEDDED_PREFIX) {
            Some(data) => TreeImage::Embedded(data.to_string()),
            None => TreeImage::Url(src.to_string()),
        }
    }
}

pub trait TreeRenderer: Send + Sync {
    fn render(&self, expression: &str) -> Result<TreeImage, RenderError>;
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    expression: &'a str,
}

#[derive(Deserialize)]
struct RenderResponse {
    success: bool,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

/// Talks plain HTTP/1.1 to the tree rendering service, one connection per
/// request.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    host: String,
    port: u16,
    path: String,
    timeout: Duration,
}

impl HttpRenderer {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RenderError> {
        let invalid = || RenderError::Endpoint(endpoint.to_string());

        let rest = endpoint.strip_prefix("http://").ok_or_else(invalid)?;
        let (authority, path) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, "/"),
        };
        // IPv6 literals come bracketed: [::1]:5000
        let (host, port) = match authority.strip_prefix('[') {
            Some(bracketed) => {
                let (host, rest) = bracketed.split_once(']').ok_or_else(invalid)?;
                match rest.strip_prefix(':') {
                    Some(port) => (host, port.parse::<u16>().map_err(|_| invalid())?),
                    None if rest.is_empty() => (host, 80),
                    None => return Err(invalid()),
                }
            }
            None => match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
                None => (authority, 80),
            },
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
            timeout,
        })
    }

    fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn connect(&self) -> Result<TcpStream, RenderError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(transport)?
            .next()
            .ok_or_else(|| RenderError::Endpoint(self.authority()))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(transport)?;
        stream.set_read_timeout(Some(self.timeout)).map_err(transport)?;
        stream.set_write_timeout(Some(self.timeout)).map_err(transport)?;
        Ok(stream)
    }
}

impl TreeRenderer for HttpRenderer {
    fn render(&self, expression: &str) -> Result<TreeImage, RenderError> {
        let body = serde_json::to_string(&RenderRequest { expression })
            .map_err(|e| RenderError::Malformed(e.to_string()))?;
        let request = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.path,
            self.authority(),
            body.len(),
            body
        );

        let mut stream = self.connect()?;
        stream.write_all(request.as_bytes()).map_err(transport)?;
        stream.flush().map_err(transport)?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).map_err(transport)?;
        parse_response(&response)
    }
}

fn transport(err: io::Error) -> RenderError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => RenderError::Timeout,
        _ => RenderError::Transport(err),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn dechunk(mut body: &[u8]) -> Result<Vec<u8>, RenderError> {
    let mut decoded = Vec::new();

    loop {
        let line_end = find(body, b"\r\n").ok_or_else(|| RenderError::Malformed("truncated chunk".into()))?;
        let size_line = String::from_utf8_lossy(&body[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| RenderError::Malformed(format!("bad chunk size {:?}", size_hex)))?;
        body = &body[line_end + 2..];

        if size == 0 {
            return Ok(decoded);
        }
        if body.len() < size {
            return Err(RenderError::Malformed("truncated chunk".into()));
        }
        decoded.extend_from_slice(&body[..size]);
        body = body.get(size + 2..).unwrap_or(&[]);
    }
}

fn parse_response(raw: &[u8]) -> Result<TreeImage, RenderError> {
    let split = find(raw, b"\r\n\r\n").ok_or_else(|| RenderError::Malformed("missing header terminator".into()))?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let mut body = raw[split + 4..].to_vec();

    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or("");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| RenderError::Malformed(format!("bad status line {:?}", status_line)))?;
    if status != 200 {
        return Err(RenderError::Status(status));
    }

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        if name == "transfer-encoding" && value.eq_ignore_ascii_case("chunked") {
            body = dechunk(&body)?;
        } else if name == "content-length" {
            if let Ok(length) = value.parse::<usize>() {
                body.truncate(length);
            }
        }
    }

    let response: RenderResponse =
        serde_json::from_slice(&body).map_err(|e| RenderError::Malformed(e.to_string()))?;
    if !response.success {
        return Err(RenderError::Rejected);
    }

    match (response.image_url, response.image) {
        (Some(url), _) => Ok(TreeImage::Url(url)),
        (None, Some(data)) => Ok(TreeImage::Embedded(data)),
        (None, None) => Err(RenderError::Malformed("success without an image".into())),
    }
}

/// A render running on its own thread. Dropping it discards the answer.
pub struct PendingRender {
    expression: String,
    receiver: Receiver<Result<TreeImage, RenderError>>,
}

impl PendingRender {
    pub fn spawn(renderer: Arc<dyn TreeRenderer>, expression: String) -> Self {
        let (sender, receiver) = mpsc::channel();
        let request = expression.clone();

        thread::spawn(move || {
            // The receiver may be gone already; nobody wants the result then.
            let _ = sender.send(renderer.render(&request));
        });

        Self { expression, receiver }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn wait(&self, timeout: Duration) -> Result<TreeImage, RenderError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(RenderError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(worker_gone()),
        }
    }

    /// Non-blocking poll; `None` while the request is still in flight.
    pub fn try_take(&self) -> Option<Result<TreeImage, RenderError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(worker_gone())),
        }
    }
}

fn worker_gone() -> RenderError {
    RenderError::Transport(io::Error::new(io::ErrorKind::Other, "render worker exited"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Accepts one connection, captures the request and answers with `response`.
    fn serve_once(response: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(split) = find(&request, b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..split]).to_string();
                    let length = head
                        .lines()
                        .find_map(|l| l.strip_prefix("Content-Length: "))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8(request).unwrap()
        });

        (format!("http://127.0.0.1:{}/generate-syntax-tree", port), handle)
    }

    fn renderer(endpoint: &str) -> HttpRenderer {
        HttpRenderer::new(endpoint, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_parsing() {
        let r = renderer("http://localhost:5000/generate-syntax-tree");
        assert_eq!(r.host, "localhost");
        assert_eq!(r.port, 5000);
        assert_eq!(r.path, "/generate-syntax-tree");

        let r = renderer("http://example.org");
        assert_eq!(r.port, 80);
        assert_eq!(r.path, "/");

        assert!(HttpRenderer::new("https://example.org/x", Duration::from_secs(1)).is_err());
        assert!(HttpRenderer::new("http://:80/x", Duration::from_secs(1)).is_err());
        assert!(HttpRenderer::new("http://host:notaport/x", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_bracketed_ipv6_endpoint() {
        let r = renderer("http://[::1]:5000/generate-syntax-tree");
        assert_eq!(r.host, "::1");
        assert_eq!(r.port, 5000);
        assert_eq!(r.path, "/generate-syntax-tree");
        assert_eq!(r.authority(), "[::1]:5000");

        let r = renderer("http://[fe80::2]/x");
        assert_eq!(r.host, "fe80::2");
        assert_eq!(r.port, 80);

        assert!(HttpRenderer::new("http://[::1/x", Duration::from_secs(1)).is_err());
        assert!(HttpRenderer::new("http://[::1]5000/x", Duration::from_secs(1)).is_err());
        assert!(HttpRenderer::new("http://[]:80/x", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_posts_expression_and_reads_url() {
        let (endpoint, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 50\r\n\r\n{\"success\": true, \"image_url\": \"/static/tree.png\"}",
        );

        let image = renderer(&endpoint).render("x*2").unwrap();
        assert_eq!(image, TreeImage::Url("/static/tree.png".to_string()));

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /generate-syntax-tree HTTP/1.1\r\n"));
        assert!(request.ends_with("{\"expression\":\"x*2\"}"));
    }

    #[test]
    fn test_reads_embedded_image() {
        let (endpoint, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"success\": true, \"image\": \"iVBORw0KGgo=\"}",
        );

        let image = renderer(&endpoint).render("1+2").unwrap();
        assert_eq!(image, TreeImage::Embedded("iVBORw0KGgo=".to_string()));
        assert_eq!(image.src(), "data:image/png;base64,iVBORw0KGgo=");
        server.join().unwrap();
    }

    #[test]
    fn test_unsuccessful_render_is_rejected() {
        let (endpoint, server) = serve_once("HTTP/1.1 200 OK\r\n\r\n{\"success\": false}");
        assert!(matches!(renderer(&endpoint).render("1"), Err(RenderError::Rejected)));
        server.join().unwrap();
    }

    #[test]
    fn test_error_status_is_reported() {
        let (endpoint, server) = serve_once("HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n");
        assert!(matches!(renderer(&endpoint).render("1"), Err(RenderError::Status(500))));
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused_is_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = renderer(&format!("http://127.0.0.1:{}/tree", port)).render("1");
        assert!(matches!(result, Err(RenderError::Transport(_))));
    }

    #[test]
    fn test_chunked_response() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n10\r\n{\"success\": true\r\n17\r\n, \"image_url\": \"/t.png\"\r\n1\r\n}\r\n0\r\n\r\n";
        assert_eq!(parse_response(raw).unwrap(), TreeImage::Url("/t.png".to_string()));
    }

    #[test]
    fn test_garbage_response_is_malformed() {
        assert!(matches!(parse_response(b"nonsense"), Err(RenderError::Malformed(_))));
        assert!(matches!(
            parse_response(b"HTTP/1.1 200 OK\r\n\r\n<html>"),
            Err(RenderError::Malformed(_))
        ));
    }

    #[test]
    fn test_src_roundtrip() {
        for image in [
            TreeImage::Url("http://host/tree.png".to_string()),
            TreeImage::Embedded("AAAA".to_string()),
        ] {
            assert_eq!(TreeImage::from_src(&image.src()), image);
        }
    }

    struct Fixed(Result<&'static str, ()>);

    impl TreeRenderer for Fixed {
        fn render(&self, _expression: &str) -> Result<TreeImage, RenderError> {
            match self.0 {
                Ok(url) => Ok(TreeImage::Url(url.to_string())),
                Err(()) => Err(RenderError::Rejected),
            }
        }
    }

    struct Slow;

    impl TreeRenderer for Slow {
        fn render(&self, _expression: &str) -> Result<TreeImage, RenderError> {
            thread::sleep(Duration::from_millis(500));
            Ok(TreeImage::Url("late".to_string()))
        }
    }

    #[test]
    fn test_pending_render_delivers_result() {
        let pending = PendingRender::spawn(Arc::new(Fixed(Ok("/tree.png"))), "x".to_string());
        assert_eq!(pending.expression(), "x");
        assert_eq!(
            pending.wait(Duration::from_secs(5)).unwrap(),
            TreeImage::Url("/tree.png".to_string())
        );

        let pending = PendingRender::spawn(Arc::new(Fixed(Err(()))), "x".to_string());
        assert!(matches!(pending.wait(Duration::from_secs(5)), Err(RenderError::Rejected)));
    }

    #[test]
    fn test_pending_render_times_out() {
        let pending = PendingRender::spawn(Arc::new(Slow), "x".to_string());
        assert!(pending.try_take().is_none());
        assert!(matches!(pending.wait(Duration::from_millis(10)), Err(RenderError::Timeout)));
    }
}
