//! HTTP control API
//!
//! JSON over plain HTTP/1.1. `route` maps a request onto the control
//! surface and is independent of the server, `ApiServer` accepts from a
//! `tiny_http` listener thread and answers each request on a short-lived
//! worker, so a slow `/stop` never holds up `/status`.

use crate::control::ControlSurface;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tiny_http::{Header, Request, Response, Server};
use tracing::{debug, info, warn};

/// Largest request body read, anything longer is cut off and fails to parse
const MAX_BODY: u64 = 64 * 1024;

#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    duration_minutes: Option<f64>,
    fade_out_minutes: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct VolumeRequest {
    volume: Option<Value>,
}

/// Handle one request, returning status code and JSON body
pub fn route(control: &ControlSurface, method: &str, url: &str, body: &str) -> (u16, Value) {
    let path = url.split('?').next().unwrap_or(url);
    match (method, path) {
        ("GET", "/status") => {
            let status = control.status();
            (
                200,
                json!({
                    "running": status.running,
                    "remaining_seconds": status.remaining_seconds,
                    "volume": status.volume,
                }),
            )
        }
        ("GET", "/health") => (200, json!({ "status": "ok" })),
        ("POST", "/start") => handle_start(control, body),
        ("POST", "/stop") => {
            control.stop();
            (200, json!({ "message": "Fireplace stopped" }))
        }
        ("POST", "/volume") => handle_volume(control, body),
        _ => error(404, "Not found"),
    }
}

fn handle_start(control: &ControlSurface, body: &str) -> (u16, Value) {
    let request: StartRequest = match parse_body(body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let defaults = control.defaults();
    let duration = request.duration_minutes.unwrap_or(defaults.duration_minutes);
    let fade_out = request.fade_out_minutes.unwrap_or(defaults.fade_out_minutes);

    match control.start(duration, fade_out) {
        Ok(outcome) => (
            200,
            json!({
                "message": format!("Fireplace {} for {} minutes", outcome.as_str(), duration),
                "action": outcome.as_str(),
                "fade_out_minutes": fade_out.min(duration),
            }),
        ),
        Err(e) => {
            if e.status_code() >= 500 {
                warn!("Start failed: {}", e);
            }
            error(e.status_code(), &e.to_string())
        }
    }
}

fn handle_volume(control: &ControlSurface, body: &str) -> (u16, Value) {
    let request: VolumeRequest = match parse_body(body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let level = match request.volume {
        None | Some(Value::Null) => return error(400, "volume is required"),
        Some(value) => match value.as_f64() {
            Some(level) => level,
            None => return error(400, "volume must be a number"),
        },
    };

    let volume = control.set_volume(level.round() as i64);
    (
        200,
        json!({
            "message": format!("Volume set to {}%", volume),
            "volume": volume,
        }),
    )
}

/// Empty body counts as `{}`
fn parse_body<T>(body: &str) -> Result<T, (u16, Value)>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|e| {
        if e.is_data() {
            error(400, &e.to_string())
        } else {
            error(400, "Invalid JSON")
        }
    })
}

fn error(code: u16, message: &str) -> (u16, Value) {
    (code, json!({ "error": message }))
}

/// HTTP listener thread plus one worker per request
pub struct ApiServer {
    server: Arc<Server>,
    thread: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn spawn(bind: &str, control: Arc<ControlSurface>) -> io::Result<Self> {
        let server = Server::http(bind).map_err(io::Error::other)?;
        let server = Arc::new(server);
        if let Some(addr) = server.server_addr().to_ip() {
            info!("Control API listening on http://{}", addr);
        }

        let listener = Arc::clone(&server);
        let thread = thread::Builder::new()
            .name("http".into())
            .spawn(move || {
                for request in listener.incoming_requests() {
                    let control = Arc::clone(&control);
                    let worker = thread::Builder::new()
                        .name("http-request".into())
                        .spawn(move || serve(&control, request));
                    if let Err(e) = worker {
                        warn!("Failed to spawn request worker: {}", e);
                    }
                }
                debug!("HTTP listener exiting");
            })?;

        Ok(Self {
            server,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Block until the listener stops, in-flight workers finish on their own
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.server.unblock();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn serve(control: &ControlSurface, mut request: Request) {
    let method = request.method().to_string();
    let url = request.url().to_string();

    let mut body = String::new();
    let (code, payload) = match request
        .as_reader()
        .take(MAX_BODY)
        .read_to_string(&mut body)
    {
        Ok(_) => route(control, &method, &url, &body),
        Err(_) => error(400, "Invalid JSON"),
    };
    info!(%method, %url, code, "Request");

    let mut response = Response::from_string(payload.to_string()).with_status_code(code);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        warn!("Failed to send response: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::tests::rig;
    use std::io::Write;
    use std::net::TcpStream;
    use std::time::Duration;

    #[test]
    fn test_health_and_unknown_route() {
        let rig = rig();
        assert_eq!(
            route(&rig.control, "GET", "/health", ""),
            (200, json!({ "status": "ok" }))
        );
        assert_eq!(route(&rig.control, "GET", "/nope", "").0, 404);
        assert_eq!(route(&rig.control, "GET", "/start", "").0, 404);
        assert_eq!(
            route(&rig.control, "POST", "/status", "").1,
            json!({ "error": "Not found" })
        );
    }

    #[test]
    fn test_start_defaults_and_update() {
        let rig = rig();
        let (code, body) = route(&rig.control, "POST", "/start", "");
        assert_eq!(code, 200);
        assert_eq!(body["message"], "Fireplace started for 30 minutes");
        assert_eq!(body["action"], "started");
        assert_eq!(body["fade_out_minutes"], 10.0);

        let (code, body) = route(
            &rig.control,
            "POST",
            "/start",
            r#"{"duration_minutes": 60}"#,
        );
        assert_eq!(code, 200);
        assert_eq!(body["action"], "updated");

        let (_, status) = route(&rig.control, "GET", "/status", "");
        assert_eq!(status["running"], true);
        let remaining = status["remaining_seconds"].as_u64().unwrap();
        assert!((3599..=3600).contains(&remaining));
        assert_eq!(rig.audio.launches(), 1);

        assert_eq!(route(&rig.control, "POST", "/stop", "").0, 200);
    }

    #[test]
    fn test_start_rejects_bad_input() {
        let rig = rig();
        let cases = [
            r#"{"duration_minutes": 0}"#,
            r#"{"duration_minutes": 481}"#,
            r#"{"fade_out_minutes": -1}"#,
            r#"{"duration_minutes": "long"}"#,
        ];
        for body in cases {
            let (code, payload) = route(&rig.control, "POST", "/start", body);
            assert_eq!(code, 400, "{}", body);
            assert!(payload["error"].is_string());
        }

        let (code, payload) = route(&rig.control, "POST", "/start", "{not json");
        assert_eq!(code, 400);
        assert_eq!(payload["error"], "Invalid JSON");
        assert!(!rig.control.status().running);
    }

    #[test]
    fn test_start_failure_is_500() {
        let rig = rig();
        rig.audio.set_fail_launch(true);
        let (code, payload) = route(&rig.control, "POST", "/start", "{}");
        assert_eq!(code, 500);
        assert!(payload["error"].as_str().unwrap().starts_with("Audio"));
    }

    #[test]
    fn test_stop_when_idle() {
        let rig = rig();
        let (code, body) = route(&rig.control, "POST", "/stop", "");
        assert_eq!(code, 200);
        assert_eq!(body["message"], "Fireplace stopped");
    }

    #[test]
    fn test_volume() {
        let rig = rig();
        let (code, body) = route(&rig.control, "POST", "/volume", r#"{"volume": 150}"#);
        assert_eq!(code, 200);
        assert_eq!(body["volume"], 100);
        assert_eq!(body["message"], "Volume set to 100%");

        let (_, body) = route(&rig.control, "POST", "/volume", r#"{"volume": -5}"#);
        assert_eq!(body["volume"], 0);

        let (_, body) = route(&rig.control, "POST", "/volume", r#"{"volume": 42.4}"#);
        assert_eq!(body["volume"], 42);

        let (code, body) = route(&rig.control, "POST", "/volume", "{}");
        assert_eq!(code, 400);
        assert_eq!(body["error"], "volume is required");

        let (code, body) = route(&rig.control, "POST", "/volume", r#"{"volume": "loud"}"#);
        assert_eq!(code, 400);
        assert_eq!(body["error"], "volume must be a number");

        assert_eq!(route(&rig.control, "GET", "/status?x=1", "").1["volume"], 42);
    }

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_server_answers_over_tcp() {
        let rig = rig();
        let control = Arc::new(rig.control);
        let server = ApiServer::spawn("127.0.0.1:0", Arc::clone(&control)).unwrap();
        let addr = server.local_addr().unwrap();

        let response = get(addr, "/health");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("application/json"));
        assert!(response.ends_with(r#"{"status":"ok"}"#));
        server.shutdown();
    }

    #[test]
    fn test_slow_request_does_not_block_status() {
        let rig = rig();
        let server = ApiServer::spawn("127.0.0.1:0", Arc::new(rig.control)).unwrap();
        let addr = server.local_addr().unwrap();

        // Bodies over 1 KiB are streamed, so this worker blocks reading it
        let mut slow = TcpStream::connect(addr).unwrap();
        slow.write_all(
            b"POST /volume HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
              Content-Length: 2000\r\n\r\n{\"volume\"",
        )
        .unwrap();
        thread::sleep(Duration::from_millis(50));

        let response = get(addr, "/status");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""running":false"#));

        let rest = format!(": 30}}{}", " ".repeat(2000 - 14));
        slow.write_all(rest.as_bytes()).unwrap();
        slow.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut answer = String::new();
        slow.read_to_string(&mut answer).unwrap();
        assert!(answer.contains(r#""volume":30"#));
        server.shutdown();
    }
}
