//! HTTP trigger.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `POST` | `/trigger-scrape` | Runs one harvest, returns the baseline file |
//! | `GET` | `/latest` | The latest-run file (data or no-update marker) |
//! | `GET` | `/health` | `OK` |
//!
//! Requests are handled one at a time on a blocking thread, so two runs can
//! never overlap. Fatal run errors come back as `500` with a JSON body
//! `{"status":"error","kind":...,"message":...}`.

use serde_json::json;
use std::fs;
use std::io::{self, Cursor};
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::runtime::Handle;
use tracing::{error, info, instrument, warn};

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::models::Snapshot;
use crate::pipeline::{self, RunSummary};
use crate::sources::HelpCenterSource;
use crate::store;

type Reply = Response<Cursor<Vec<u8>>>;

/// Serve until the process exits. Blocks the calling thread; call it from
/// `spawn_blocking` so `runtime` can drive each run.
#[instrument(level = "info", skip_all, fields(addr = %config.server.addr))]
pub fn serve(config: HarvestConfig, runtime: Handle) -> Result<(), HarvestError> {
    config.validate()?;
    let server = Server::http(&config.server.addr)
        .map_err(|e| HarvestError::Config(format!("bind http at {}: {e}", config.server.addr)))?;
    info!("Trigger listening");

    loop {
        let request = match server.recv() {
            Ok(rq) => rq,
            Err(e) => {
                warn!(error = %e, "http recv error");
                continue;
            }
        };
        handle(request, &config, &runtime);
    }
}

fn handle(request: Request, config: &HarvestConfig, runtime: &Handle) {
    let method = request.method().clone();
    let url = request.url().to_string();
    info!(%method, %url, "Request");

    let reply = match (&method, url.as_str()) {
        (Method::Post, "/trigger-scrape") => {
            let result = HelpCenterSource::new(&config.source)
                .and_then(|source| runtime.block_on(pipeline::run(config, &source)));
            trigger_reply(result, config)
        }
        (Method::Get, "/latest") => latest_reply(config),
        (Method::Get, "/health") => Response::from_string("OK\n"),
        _ => json_reply(404, "not_found", &format!("no route for {method} {url}")),
    };

    if let Err(e) = request.respond(reply) {
        warn!(error = %e, "Failed to send response");
    }
}

/// Success returns the baseline file (header-only if the run has never
/// promoted anything); failure returns a structured error.
pub fn trigger_reply(result: Result<RunSummary, HarvestError>, config: &HarvestConfig) -> Reply {
    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Triggered run failed");
            return json_reply(500, e.kind(), &e.to_string());
        }
    };

    match baseline_bytes(config) {
        Ok(body) => with_header(
            file_reply(body, &config.baseline_file, config),
            "X-Harvest-Outcome",
            summary.outcome.label(),
        ),
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Cannot read baseline after run");
            json_reply(500, e.kind(), &e.to_string())
        }
    }
}

fn latest_reply(config: &HarvestConfig) -> Reply {
    let path = config.latest_path();
    match fs::read(&path) {
        Ok(body) => file_reply(body, &config.latest_file, config),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            json_reply(404, "not_found", "no run has completed yet")
        }
        Err(e) => {
            let e = HarvestError::io(path, e);
            json_reply(500, e.kind(), &e.to_string())
        }
    }
}

pub fn baseline_bytes(config: &HarvestConfig) -> Result<Vec<u8>, HarvestError> {
    let path = config.baseline_path();
    match fs::read(&path) {
        Ok(body) => Ok(body),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Ok(store::render(&Snapshot::new(), &config.file_format()?)?.into_bytes())
        }
        Err(e) => Err(HarvestError::io(path, e)),
    }
}

fn file_reply(body: Vec<u8>, filename: &str, config: &HarvestConfig) -> Reply {
    let reply = with_header(
        Response::from_data(body),
        "Content-Type",
        config.delimiter.media_type(),
    );
    with_header(
        reply,
        "Content-Disposition",
        &format!("attachment; filename=\"{filename}\""),
    )
}

pub fn error_body(kind: &str, message: &str) -> String {
    json!({ "status": "error", "kind": kind, "message": message }).to_string()
}

fn json_reply(status: u16, kind: &str, message: &str) -> Reply {
    let reply = Response::from_string(error_body(kind, message)).with_status_code(status);
    with_header(reply, "Content-Type", "application/json")
}

/// Header values must be ASCII; a non-ASCII file name just loses its header.
fn with_header(reply: Reply, name: &str, value: &str) -> Reply {
    match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
        Ok(h) => reply.with_header(h),
        Err(()) => {
            warn!(name, value, "Dropping invalid response header");
            reply
        }
    }
}
