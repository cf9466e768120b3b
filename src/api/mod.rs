//! HTTP surface: control page, MJPEG feed, and the control routes.
//!
//! Plain `std::net` with a thread per connection. Every `/video_feed`
//! connection gets its own `FrameStream` over the shared resources.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::stream::{FrameStream, StreamResources, CONTENT_TYPE};

const MAX_REQUEST_BYTES: usize = 8192;

pub const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_SNAPSHOT_PATH: &str = "snapshot.jpg";

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>maskwatch</title>
<style>
body { font-family: sans-serif; background: #111; color: #eee; text-align: center; }
img { max-width: 100%; border: 1px solid #444; }
button { margin: 0.5em; padding: 0.6em 1.2em; }
</style>
</head>
<body>
<h1>Face mask monitor</h1>
<img src="/video_feed" alt="video feed">
<div>
<button onclick="fetch('/alarm')">Toggle alarm</button>
<button onclick="fetch('/picture')">Take picture</button>
<button onclick="fetch('/activateViedoFeed')">Video on</button>
<button onclick="fetch('/disableViedoFeed')">Video off</button>
</div>
</body>
</html>
"#;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub snapshot_path: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_API_ADDR.to_string(),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections and wait for the accept loop.
    ///
    /// Open feed connections end at their next frame.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    resources: StreamResources,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, resources: StreamResources) -> Self {
        Self { cfg, resources }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(RouteContext {
            cfg: self.cfg,
            resources: self.resources,
            shutdown: Arc::clone(&shutdown),
            subscribers: AtomicUsize::new(0),
        });
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, ctx) {
                log::error!("http server stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct RouteContext {
    cfg: ApiConfig,
    resources: StreamResources,
    shutdown: Arc<AtomicBool>,
    subscribers: AtomicUsize,
}

fn run_api(listener: TcpListener, ctx: Arc<RouteContext>) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::debug!("request from {} failed: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &RouteContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_text_response(&mut stream, 405, "method not allowed");
    }

    let state = &ctx.resources.state;
    match request.path.as_str() {
        "/" => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            INDEX_HTML.as_bytes(),
        ),
        "/video_feed" => serve_feed(stream, ctx),
        "/alarm" => {
            let armed = state.toggle_alarm();
            log::info!("alarm {}", if armed { "enabled" } else { "disabled" });
            write_text_response(&mut stream, 200, "alarm")
        }
        "/picture" => {
            let path = &ctx.cfg.snapshot_path;
            match state.save_snapshot(path) {
                Ok(true) => log::info!("snapshot written to {}", path.display()),
                Ok(false) => log::warn!("snapshot skipped: no frame rendered yet"),
                Err(err) => log::warn!("snapshot failed: {:#}", err),
            }
            write_text_response(&mut stream, 200, "picture")
        }
        "/activateViedoFeed" => {
            state.set_stream_enabled(true);
            log::info!("video feed enabled");
            write_text_response(&mut stream, 200, "activateViedoFeed")
        }
        "/disableViedoFeed" => {
            state.set_stream_enabled(false);
            log::info!("video feed disabled");
            write_text_response(&mut stream, 200, "disableViedoFeed")
        }
        "/health" => {
            let (source_healthy, frames_captured) = {
                let source = ctx
                    .resources
                    .source
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                (source.is_healthy(), source.stats().frames_captured)
            };
            let body = serde_json::json!({
                "status": "ok",
                "alarm_enabled": state.alarm_enabled(),
                "stream_enabled": state.stream_enabled(),
                "source_healthy": source_healthy,
                "frames_captured": frames_captured,
                "subscribers": ctx.subscribers.load(Ordering::SeqCst),
            });
            write_response(
                &mut stream,
                200,
                "application/json",
                &serde_json::to_vec(&body)?,
            )
        }
        _ => write_text_response(&mut stream, 404, "not found"),
    }
}

fn serve_feed(mut stream: TcpStream, ctx: &RouteContext) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;

    let _guard = SubscriberGuard::attach(&ctx.subscribers);
    let mut frames = FrameStream::new(ctx.resources.clone());
    let mut sent = 0u64;
    while !ctx.shutdown.load(Ordering::SeqCst) {
        let Some(chunk) = frames.next_chunk() else {
            break;
        };
        if let Err(err) = stream.write_all(&chunk.bytes).and_then(|_| stream.flush()) {
            log::debug!("feed subscriber left after {} frames: {}", sent, err);
            return Ok(());
        }
        sent += 1;
    }
    log::info!("feed ended after {} frames ({:?})", sent, frames.state());
    Ok(())
}

struct SubscriberGuard<'a>(&'a AtomicUsize);

impl<'a> SubscriberGuard<'a> {
    fn attach(count: &'a AtomicUsize) -> Self {
        let active = count.fetch_add(1, Ordering::SeqCst) + 1;
        if active > 1 {
            log::warn!(
                "{} concurrent feed subscribers share one camera and feedback sink; frames and alerts will interleave",
                active
            );
        }
        Self(count)
    }
}

impl Drop for SubscriberGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    log::debug!("{} {}", method, path);
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_text_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "text/plain; charset=utf-8", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
