//! Network channel for peer guards and operators.
//!
//! Peers deliver forwarded commands as `GET /checkpoint` and `GET /restore`.
//! Every syntactically valid command gets a 200; commands addressed to a
//! different node are logged and dropped.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use snapstore::{NodeId, Round, SnapshotStore};
use tracing::{info, warn};

use crate::command::{Command, CommandRequest};
use crate::error::GuardError;
use crate::forward::TOKEN_HEADER;
use crate::identity::TargetProcess;
use crate::router::CommandRouter;

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub router: Arc<CommandRouter>,
    pub store: Arc<dyn SnapshotStore>,
    pub target: Arc<TargetProcess>,
    pub start_time: Instant,
    /// When set, command routes require it.
    pub token: Option<String>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/checkpoint", get(handle_checkpoint))
        .route("/restore", get(handle_restore))
        .route("/health", get(handle_health))
        .route("/snapshots", get(list_snapshots))
        .route("/", get(serve_status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CommandQuery {
    node_id: Option<String>,
    round_id: Option<String>,
    token: Option<String>,
}

async fn handle_checkpoint(
    State(state): State<WebState>,
    headers: HeaderMap,
    Query(query): Query<CommandQuery>,
) -> Response {
    handle_command(&state, &headers, query, Command::Checkpoint)
}

async fn handle_restore(
    State(state): State<WebState>,
    headers: HeaderMap,
    Query(query): Query<CommandQuery>,
) -> Response {
    handle_command(&state, &headers, query, Command::Restore)
}

fn handle_command(
    state: &WebState,
    headers: &HeaderMap,
    query: CommandQuery,
    command: Command,
) -> Response {
    if let Some(expected) = state.token.as_deref() {
        let presented = headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .or(query.token.as_deref());
        if presented != Some(expected) {
            warn!(%command, "rejected network command with missing or wrong token");
            return (StatusCode::UNAUTHORIZED, GuardError::Unauthorized.to_string()).into_response();
        }
    }

    let node_id: NodeId = match parse_param("node_id", query.node_id.as_deref()) {
        Ok(v) => v,
        Err(response) => return response,
    };
    let round: Round = match parse_param("round_id", query.round_id.as_deref()) {
        Ok(v) => v,
        Err(response) => return response,
    };

    let request = CommandRequest {
        command,
        node_id,
        round,
    };
    match state.router.accept_network(&request) {
        Ok(Some(ticket)) => {
            info!(op.id = %ticket.id, %command, round, "network command queued");
        }
        Ok(None) => {}
        Err(e) => {
            warn!(%command, node.id = node_id, round, "network command not queued: {}", e);
        }
    }

    (StatusCode::OK, format!("{} ok", command)).into_response()
}

fn parse_param<T: std::str::FromStr>(name: &str, value: Option<&str>) -> Result<T, Response> {
    let bad = |message: String| (StatusCode::BAD_REQUEST, message).into_response();
    let value = value.ok_or_else(|| bad(format!("missing {}", name)))?;
    value
        .trim()
        .parse()
        .map_err(|_| bad(format!("invalid {}: {}", name, value)))
}

/// Health check endpoint
async fn handle_health(State(state): State<WebState>) -> impl IntoResponse {
    let status = state.router.executor().status();
    let healthy = !status.state.is_failed();

    Json(serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "node_id": status.node_id,
        "state": status.state.name(),
        "pid": state.target.pid(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "last_outcome": status.last_outcome,
    }))
}

#[derive(Debug, Serialize)]
pub struct SnapshotSummary {
    pub version: u64,
    pub round: Round,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    pub created_at: Option<String>,
}

async fn list_snapshots(State(state): State<WebState>) -> impl IntoResponse {
    let node_id = state.router.identity().node_id;
    match state.store.list(node_id) {
        Ok(archives) => {
            let summaries: Vec<SnapshotSummary> = archives
                .into_iter()
                .map(|a| SnapshotSummary {
                    version: a.version.get(),
                    round: a.round,
                    size_bytes: a.size_bytes,
                    checksum: a.checksum.map(|c| c.to_string()),
                    created_at: a.created_at.map(|t| t.to_rfc3339()),
                })
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "node_id": node_id,
                    "snapshots": summaries,
                })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

/// Human-readable status page.
async fn serve_status(State(state): State<WebState>) -> impl IntoResponse {
    let status = state.router.executor().status();
    let pid = state
        .target
        .pid()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "none".to_string());
    let last = status
        .last_outcome
        .as_ref()
        .map(|r| match &r.error {
            None => format!("{} ok", r.operation),
            Some(e) => format!("{} failed: {}", r.operation, html_escape(e)),
        })
        .unwrap_or_else(|| "none".to_string());

    let page = STATUS_HTML
        .replace("{node_id}", &status.node_id.to_string())
        .replace("{state}", status.state.name())
        .replace("{pid}", &pid)
        .replace("{completed}", &status.completed.to_string())
        .replace("{last}", &last)
        .replace("{version}", env!("CARGO_PKG_VERSION"));

    ([(header::CACHE_CONTROL, "no-store")], Html(page))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

const STATUS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>snapguard node {node_id}</title></head>
<body>
<h1>snapguard node {node_id}</h1>
<table>
<tr><th>state</th><td>{state}</td></tr>
<tr><th>target pid</th><td>{pid}</td></tr>
<tr><th>operations</th><td>{completed}</td></tr>
<tr><th>last outcome</th><td>{last}</td></tr>
</table>
<p><a href="/health">health</a> | <a href="/snapshots">snapshots</a></p>
<p><small>snapguard {version}</small></p>
</body>
</html>
"#;
