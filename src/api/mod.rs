//! Inbound trigger endpoint.
//!
//! `GET /{camera_id}` runs the engine for that camera and answers
//! `200 text/plain` with the outcome text, whatever the outcome.
//! `GET /health` answers `ok`. One acceptor thread hands connections to a
//! fixed pool of worker threads, so slow collaborators only block the worker
//! serving that request.

use anyhow::{anyhow, Result};
use percent_encoding::percent_decode_str;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::engine::Engine;

const MAX_REQUEST_BYTES: usize = 8192;
const DEFAULT_WORKERS: usize = 5;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub workers: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:80".to_string(),
            workers: DEFAULT_WORKERS,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting, let workers drain queued connections, join all threads.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.acceptor.take() {
            join.join()
                .map_err(|_| anyhow!("api acceptor thread panicked"))?;
        }
        for join in self.workers.drain(..) {
            join.join()
                .map_err(|_| anyhow!("api worker thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    engine: Arc<Engine>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, engine: Arc<Engine>) -> Self {
        Self { cfg, engine }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        if self.cfg.workers == 0 {
            return Err(anyhow!("api needs at least one worker"));
        }
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let (tx, rx) = mpsc::channel::<TcpStream>();
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..self.cfg.workers)
            .map(|id| {
                let rx = rx.clone();
                let engine = self.engine.clone();
                std::thread::Builder::new()
                    .name(format!("api-worker-{}", id))
                    .spawn(move || run_worker(rx, engine))
                    .map_err(|e| anyhow!("failed to spawn api worker: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let acceptor = std::thread::Builder::new()
            .name("api-acceptor".to_string())
            .spawn(move || {
                if let Err(err) = run_acceptor(listener, tx, shutdown_thread) {
                    log::error!("trigger api stopped: {}", err);
                }
            })
            .map_err(|e| anyhow!("failed to spawn api acceptor: {}", e))?;

        Ok(ApiHandle {
            addr,
            shutdown,
            acceptor: Some(acceptor),
            workers,
        })
    }
}

/// Dropping `tx` on return lets the workers exit once the queue is drained.
fn run_acceptor(
    listener: TcpListener,
    tx: Sender<TcpStream>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if tx.send(stream).is_err() {
                    return Err(anyhow!("all api workers exited"));
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn run_worker(rx: Arc<Mutex<Receiver<TcpStream>>>, engine: Arc<Engine>) {
    loop {
        let next = match rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let Ok(stream) = next else {
            return;
        };
        if let Err(err) = handle_connection(stream, &engine) {
            log::warn!("trigger api request failed: {}", err);
        }
    }
}

fn handle_connection(mut stream: TcpStream, engine: &Engine) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_text_response(&mut stream, 405, "method not allowed")?;
        return Ok(());
    }
    match request.path.as_str() {
        "/health" => write_text_response(&mut stream, 200, "ok"),
        path => match camera_id_from_path(path) {
            Some(camera_id) => {
                let outcome = engine.handle(&camera_id);
                write_text_response(&mut stream, 200, &outcome.to_string())
            }
            None => write_text_response(&mut stream, 404, "not found"),
        },
    }
}

/// `/{camera_id}` with a single, non-empty segment, percent-decoded.
/// Segments that do not decode to UTF-8 are not camera ids.
fn camera_id_from_path(path: &str) -> Option<String> {
    let raw = path.strip_prefix('/')?;
    if raw.is_empty() || raw.contains('/') {
        return None;
    }
    let id = percent_decode_str(raw).decode_utf8().ok()?;
    if id.is_empty() {
        return None;
    }
    Some(id.into_owned())
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
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_text_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body.as_bytes())?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
