//! HTTP API for replay submission
//!
//! `replayguard serve` → accepts uploads, analyses them, serves stored results
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /` | service banner |
//! | `POST /api/v1/analyze?name=<file.osr>` | body is the raw replay; returns its flags |
//! | `GET /api/v1/stats` | stored replay and detection counts |
//! | `GET /api/v1/beatmap?hash=<md5>` | flagged replays of one beatmap |
//! | `GET /api/v1/system` | host and runtime information |

use crate::config::ApiConfig;
use crate::service::{Service, ServiceError};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::time::Instant;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{error, info, warn};

/// Largest accepted upload
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Serialize)]
struct Banner<'a> {
    name: &'static str,
    version: &'static str,
    runtime: &'a str,
    url: String,
}

#[derive(Serialize)]
struct SystemInfo {
    os: String,
    cpu: String,
    analysis_threads: usize,
    api_workers: usize,
    version: &'static str,
}

impl SystemInfo {
    fn current(config: &ApiConfig) -> Self {
        let cpu = std::env::var("PROCESSOR_IDENTIFIER")
            .ok()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| std::env::consts::ARCH.to_string());
        Self {
            os: format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH),
            cpu,
            analysis_threads: rayon::current_num_threads(),
            api_workers: config.workers.max(1),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Deserialize, Debug, Default)]
struct AnalyzeParams {
    name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct BeatmapParams {
    hash: Option<String>,
}

/// A rendered JSON response
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(500, format!("could not serialise response: {}", e)),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        let error = match status {
            400 => "Bad Request",
            404 => "Not Found",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        };
        let body = ErrorBody {
            error,
            message: message.into(),
        };
        Self {
            status,
            body: serde_json::to_string(&body).unwrap_or_default(),
        }
    }
}

/// Start the server and block handling requests on `config.workers` threads
pub fn start(config: &ApiConfig, service: Service) -> io::Result<()> {
    let host = if config.is_production() { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let server = Server::http(&addr).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    eprintln!("\n\x1b[1;32m🛡  replayguard\x1b[0m");
    eprintln!("   {}", config.public_url());
    eprintln!("   Listening on {} ({})\n", addr, config.runtime);
    info!(addr = %addr, workers = config.workers, "server started");

    let workers = config.workers.max(1);
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                for request in server.incoming_requests() {
                    if let Err(e) = handle_request(request, &service, config) {
                        error!("failed to send response: {}", e);
                    }
                }
            });
        }
    });

    Ok(())
}

fn handle_request(mut request: Request, service: &Service, config: &ApiConfig) -> io::Result<()> {
    let started = Instant::now();
    let method = request.method().clone();
    let url = request.url().to_string();

    let reply = if request.body_length().is_some_and(|len| len > MAX_UPLOAD_BYTES) {
        Reply::error(413, format!("uploads are limited to {} bytes", MAX_UPLOAD_BYTES))
    } else {
        let mut body = Vec::new();
        request
            .as_reader()
            .take(MAX_UPLOAD_BYTES as u64 + 1)
            .read_to_end(&mut body)?;
        if body.len() > MAX_UPLOAD_BYTES {
            Reply::error(413, format!("uploads are limited to {} bytes", MAX_UPLOAD_BYTES))
        } else {
            route(service, config, &method, &url, &body)
        }
    };

    info!(
        method = %method,
        path = %url.split('?').next().unwrap_or("/"),
        status = reply.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );

    let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid header"))?;
    let response = Response::from_string(reply.body)
        .with_status_code(reply.status)
        .with_header(content_type);
    request.respond(response)
}

/// Dispatch one request to its handler
pub fn route(service: &Service, config: &ApiConfig, method: &Method, url: &str, body: &[u8]) -> Reply {
    let mut parts = url.splitn(2, '?');
    let path = parts.next().unwrap_or("/");
    let query = parts.next().unwrap_or("");

    match (method, path) {
        (&Method::Get, "/") => Reply::json(
            200,
            &Banner {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                runtime: &config.runtime,
                url: config.public_url(),
            },
        ),

        (&Method::Post, "/api/v1/analyze") => {
            let params: AnalyzeParams = serde_urlencoded::from_str(query).unwrap_or_default();
            let name = params.name.unwrap_or_default();
            match service.submit(&name, body) {
                Ok(submission) => Reply::json(200, &submission.flags),
                Err(e) if e.is_client_error() => {
                    warn!(file = %name, "rejected upload: {}", e);
                    Reply::error(400, e.to_string())
                }
                Err(e) => internal_error(e),
            }
        }

        (&Method::Get, "/api/v1/stats") => match service.storage().stats() {
            Ok(stats) => Reply::json(200, &stats),
            Err(e) => internal_error(e.into()),
        },

        (&Method::Get, "/api/v1/beatmap") => {
            let params: BeatmapParams = serde_urlencoded::from_str(query).unwrap_or_default();
            let Some(hash) = params.hash.filter(|h| !h.is_empty()) else {
                return Reply::error(400, "missing query parameter: hash");
            };
            match service.storage().beatmap_report(&hash) {
                Ok(Some(report)) => Reply::json(200, &report),
                Ok(None) => Reply::error(404, format!("no replays stored for beatmap {}", hash)),
                Err(crate::store::StoreError::InvalidKey(key)) => {
                    Reply::error(400, format!("invalid beatmap hash {:?}", key))
                }
                Err(e) => internal_error(e.into()),
            }
        }

        (&Method::Get, "/api/v1/system") => Reply::json(200, &SystemInfo::current(config)),

        _ => Reply::error(404, format!("no route for {} {}", method, path)),
    }
}

fn internal_error(e: ServiceError) -> Reply {
    error!("request failed: {}", e);
    Reply::error(500, "internal error")
}
