use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::meetings::{self, MeetingReminder};
use crate::message::MessageBoard;
use crate::watcher::SharedSnapshot;

/// Everything the request handlers need, cloned into each connection task.
#[derive(Clone)]
pub struct AppState {
    pub snapshot: SharedSnapshot,
    pub board: MessageBoard,
    pub meetings: Option<Arc<MeetingReminder>>,
}

/// Serves the dashboard API until the process stops.
pub async fn run(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{addr}");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!("Connection error: {e}");
            }
        });
    }
}

async fn handle<B>(req: Request<B>, state: AppState) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/api/gitlab-pipeline") => pipeline_status(&state).await,
        (&Method::POST, "/api/post-a-message/post") => post_message(req, &state).await,
        (&Method::GET, "/api/post-a-message/get") => {
            text_response(StatusCode::OK, state.board.get().await)
        }
        (&Method::GET, "/api/get-next-meetings") => next_meetings(&state).await,
        _ => text_response(StatusCode::NOT_FOUND, "not found".to_string()),
    };
    Ok(response)
}

/// Serializes the current snapshot. The read lock is held only for the
/// clone; serialization happens on the copy.
async fn pipeline_status(state: &AppState) -> Response<Full<Bytes>> {
    let snapshot = state.snapshot.read().await.clone();

    match serde_json::to_vec(&snapshot) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => {
            error!("Failed to serialize snapshot: {e}");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization error".to_string())
        }
    }
}

async fn post_message<B>(req: Request<B>, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body: {e}");
            return text_response(StatusCode::BAD_REQUEST, "unreadable body".to_string());
        }
    };

    let message = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|json| json["message"].as_str().map(str::to_string));

    match message {
        Some(message) => {
            state.board.set(message).await;
            let body = br#"{"status":"success","message":"Message sent"}"#.to_vec();
            json_response(StatusCode::OK, body)
        }
        None => text_response(StatusCode::BAD_REQUEST, "missing 'message' field".to_string()),
    }
}

async fn next_meetings(state: &AppState) -> Response<Full<Bytes>> {
    let Some(reminder) = &state.meetings else {
        return text_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "calendar backend not configured".to_string(),
        );
    };

    match reminder.next_meetings().await {
        Ok(events) => {
            let today = Utc::now().date_naive();
            let mut body = String::new();
            for event in &events {
                if let Some(line) = meetings::format_event(event, today) {
                    body.push_str(&line);
                    body.push('\n');
                }
            }
            text_response(StatusCode::OK, body)
        }
        Err(e) => {
            warn!("Meeting lookup failed: {e}");
            text_response(StatusCode::BAD_GATEWAY, "calendar backend error".to_string())
        }
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    response_with(status, "application/json", Bytes::from(body))
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    response_with(status, "text/plain; charset=utf-8", Bytes::from(body))
}

fn response_with(status: StatusCode, content_type: &str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert("Content-Type", value);
    }
    response
}
