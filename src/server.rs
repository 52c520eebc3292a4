//! HTTP streaming and snapshot server.
//!
//! Serves the live MJPEG stream plus JSON snapshots of the newest
//! detections and pipeline status. The listener runs nonblocking on its
//! own thread; each accepted connection is handled on a short-lived
//! thread so a slow stream client never stalls the accept loop.

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::Frame;
use crate::live::LiveState;

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_BOUNDARY: &str = "frame";
/// Roughly 30 parts per second per stream client.
const STREAM_TICK: Duration = Duration::from_millis(33);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub jpeg_quality: u8,
}

pub struct VideoServer {
    cfg: ServerConfig,
    live: LiveState,
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections and join the accept thread. In-flight
    /// stream clients notice the shutdown flag on their next tick.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("video server thread panicked"))?;
        }
        Ok(())
    }
}

impl VideoServer {
    pub fn new(cfg: ServerConfig, live: LiveState) -> Self {
        Self { cfg, live }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(("0.0.0.0", self.cfg.port))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("video server listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let live = self.live.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, cfg, live, shutdown_thread) {
                log::error!("video server stopped: {}", err);
            }
        });

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    cfg: ServerConfig,
    live: LiveState,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let cfg = cfg.clone();
                let live = live.clone();
                let shutdown = shutdown.clone();
                // Stream clients hold their connection open indefinitely,
                // so every connection gets its own thread.
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &live, &shutdown) {
                        log::debug!("client connection ended: {}", err);
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

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ServerConfig,
    live: &LiveState,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/video_feed" => stream_video(stream, cfg, live, shutdown),
        "/api/detections" => {
            let detections = live.detections_snapshot();
            let wire: Vec<_> = detections.iter().map(|d| d.to_wire()).collect();
            let body = serde_json::to_vec(&serde_json::json!({
                "success": true,
                "count": wire.len(),
                "detections": wire,
            }))?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        "/api/status" => {
            let body = match live.status_snapshot() {
                Some(status) => serde_json::to_vec(&status)?,
                None => b"{}".to_vec(),
            };
            write_response(&mut stream, 200, "application/json", &body)
        }
        "/health" => {
            let body = serde_json::to_vec(&serde_json::json!({
                "status": "ok",
                "server": "signwatch",
                "port": cfg.port,
            }))?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        _ => write_response(&mut stream, 404, "text/plain", b"Not Found"),
    }
}

/// Push MJPEG parts until the client disconnects or the server stops.
/// Frames are copied out of the shared state and encoded without holding
/// any lock. While the pipeline stalls, the last published frame keeps
/// being re-sent so players do not drop the connection.
fn stream_video(
    mut stream: TcpStream,
    cfg: &ServerConfig,
    live: &LiveState,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={STREAM_BOUNDARY}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Some(frame) = live.frame_snapshot() {
            let jpeg = encode_jpeg(&frame, cfg.jpeg_quality)?;
            let part = format!(
                "--{STREAM_BOUNDARY}\r\n\
                 Content-Type: image/jpeg\r\n\
                 Content-Length: {}\r\n\r\n",
                jpeg.len()
            );
            if stream.write_all(part.as_bytes()).is_err()
                || stream.write_all(&jpeg).is_err()
                || stream.write_all(b"\r\n").is_err()
            {
                // Client went away.
                break;
            }
        }
        std::thread::sleep(STREAM_TICK);
    }
    Ok(())
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let image = frame.to_rgb_image()?;
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    image.write_with_encoder(encoder)?;
    Ok(out)
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
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
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
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\
         Access-Control-Allow-Origin: *\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_encoding_produces_valid_magic_bytes() {
        let frame = Frame::black(32, 24);
        let jpeg = encode_jpeg(&frame, 80).expect("encode");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}
