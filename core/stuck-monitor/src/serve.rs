//! JSON-line request loop over stdio.
//!
//! Each stdin line is one [`Request`]; each gets exactly one [`Response`]
//! line. Engine events are interleaved on the same stream as they happen,
//! tagged with an `event` field so clients can tell them apart.

use serde::Serialize;
use serde_json::{json, Value};
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use stuck_core::{stuck_engine, StuckConfigPatch, StuckEngine, StuckError};
use stuck_protocol::{
    parse_repo_ref, parse_request, parse_update, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES,
};
use tracing::{debug, info, warn};

use crate::settings::{load_settings, validate_patch};

/// Serializes whole lines so responses and events never interleave mid-line.
pub struct JsonLines<W: Write> {
    inner: Mutex<W>,
}

impl<W: Write> JsonLines<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn write<T: Serialize>(&self, value: &T) -> Result<(), String> {
        let mut line = serde_json::to_vec(value)
            .map_err(|err| format!("Failed to serialize output line: {}", err))?;
        line.push(b'\n');
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner
            .write_all(&line)
            .and_then(|_| inner.flush())
            .map_err(|err| format!("Failed to write output line: {}", err))
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn run(config_path: Option<PathBuf>) -> Result<(), String> {
    let patch = load_settings(config_path)?;
    let engine = stuck_engine(Some(patch));
    let output = Arc::new(JsonLines::new(io::stdout()));

    let sink = Arc::clone(&output);
    let subscription =
        engine.subscribe(move |event| sink.write(event).map_err(StuckError::Subscriber));
    info!("stuck-monitor ready");

    let result = serve_lines(engine, io::stdin().lock(), &*output);

    engine.unsubscribe(subscription);
    engine.stop();
    info!("stuck-monitor stopped");
    result
}

/// One request line read with a bounded buffer.
enum RequestLine {
    Line(String),
    TooLarge,
    NotUtf8,
}

/// Reads at most `MAX_REQUEST_BYTES` of the next line. Longer lines are
/// skipped to their end without being buffered. `None` at end of input.
fn read_request_line<R: BufRead>(
    input: &mut R,
    buf: &mut Vec<u8>,
) -> io::Result<Option<RequestLine>> {
    buf.clear();
    let limit = MAX_REQUEST_BYTES as u64 + 1;
    let read = input.by_ref().take(limit).read_until(b'\n', buf)?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_REQUEST_BYTES {
        discard_line(input)?;
        return Ok(Some(RequestLine::TooLarge));
    }

    Ok(Some(match std::str::from_utf8(buf) {
        Ok(line) => RequestLine::Line(line.to_string()),
        Err(_) => RequestLine::NotUtf8,
    }))
}

fn discard_line<R: BufRead>(input: &mut R) -> io::Result<()> {
    loop {
        let (found, used) = {
            let available = input.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|byte| *byte == b'\n') {
                Some(idx) => (true, idx + 1),
                None => (false, available.len()),
            }
        };
        input.consume(used);
        if found {
            return Ok(());
        }
    }
}

/// Handles requests until `input` is exhausted.
pub fn serve_lines<R: BufRead, W: Write>(
    engine: &StuckEngine,
    mut input: R,
    output: &JsonLines<W>,
) -> Result<(), String> {
    let mut buf = Vec::new();
    while let Some(next) = read_request_line(&mut input, &mut buf)
        .map_err(|err| format!("Failed to read request: {}", err))?
    {
        let line = match next {
            RequestLine::Line(line) => line,
            RequestLine::TooLarge => {
                let err = ErrorInfo::new(
                    "request_too_large",
                    format!("request exceeds {} bytes", MAX_REQUEST_BYTES),
                );
                warn!(code = %err.code, "Rejected request");
                output.write(&Response::error_with_info(None, err))?;
                continue;
            }
            RequestLine::NotUtf8 => {
                let err = ErrorInfo::new("invalid_json", "request is not valid UTF-8");
                warn!(code = %err.code, "Rejected request");
                output.write(&Response::error_with_info(None, err))?;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_request(&line) {
            Ok(request) => {
                debug!(method = ?request.method, id = ?request.id, "Request received");
                handle_request(engine, request)
            }
            Err(err) => {
                warn!(code = %err.code, message = %err.message, "Rejected request");
                Response::error_with_info(None, err)
            }
        };
        output.write(&response)?;
    }
    Ok(())
}

pub fn handle_request(engine: &StuckEngine, request: Request) -> Response {
    let id = request.id.clone();
    match dispatch(engine, request) {
        Ok(data) => Response::ok(id, data),
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Request failed");
            Response::error_with_info(id, err)
        }
    }
}

fn dispatch(engine: &StuckEngine, request: Request) -> Result<Value, ErrorInfo> {
    match request.method {
        Method::Update => {
            let update = parse_update(require_params(request.params)?)?;
            engine.update_repo_state(update);
            Ok(json!({ "accepted": true }))
        }
        Method::Output => {
            let repo = parse_repo_ref(require_params(request.params)?)?;
            engine.record_output(&repo.repository_id);
            Ok(json!({ "accepted": true }))
        }
        Method::Acknowledge => {
            let repo = parse_repo_ref(require_params(request.params)?)?;
            let acknowledged = engine.acknowledge_alert(&repo.repository_id);
            Ok(json!({ "acknowledged": acknowledged }))
        }
        Method::Alert => {
            let repo = parse_repo_ref(require_params(request.params)?)?;
            to_value(&engine.get_alert_for_repo(&repo.repository_id))
        }
        Method::Forget => {
            let repo = parse_repo_ref(require_params(request.params)?)?;
            let forgotten = engine.forget_repo(&repo.repository_id);
            Ok(json!({ "forgotten": forgotten }))
        }
        Method::Status => to_value(&engine.get_status()),
        Method::GetConfig => to_value(&engine.get_config()),
        Method::Config => {
            let patch: StuckConfigPatch = serde_json::from_value(require_params(request.params)?)
                .map_err(|err| {
                    ErrorInfo::new("invalid_params", format!("config payload is invalid: {}", err))
                })?;
            validate_patch(&engine.get_config(), &patch)
                .map_err(|message| ErrorInfo::new("invalid_config", message))?;
            engine.update_config(patch);
            to_value(&engine.get_config())
        }
    }
}

fn require_params(params: Option<Value>) -> Result<Value, ErrorInfo> {
    params.ok_or_else(|| ErrorInfo::new("missing_params", "params are required"))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ErrorInfo> {
    serde_json::to_value(value)
        .map_err(|err| ErrorInfo::new("serialization_failed", err.to_string()))
}
