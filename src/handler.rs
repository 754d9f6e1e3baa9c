use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::http::header::RANGE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use percent_encoding::percent_decode_str;
use tracing::{debug, error};

use crate::config::DownloadConfig;
use crate::disposition::{DispositionEncoder, Rfc2231Disposition};
use crate::error::DownloadError;
use crate::registry::{BlobLookup, SessionRegistry};
use crate::stream::channel;
use crate::transfer::{TransferEngine, TransferOutcome};

/// Path segment that marks a big blob download.
pub const BIG_BLOB_MARKER: &str = "nxbigblob";

/// Shared state of the download endpoint.
#[derive(Clone)]
pub struct AppState {
    config: Arc<DownloadConfig>,
    sessions: Arc<SessionRegistry>,
    engine: Arc<TransferEngine>,
    disposition: Arc<dyn DispositionEncoder>,
}

impl AppState {
    pub fn new(config: DownloadConfig, sessions: Arc<SessionRegistry>) -> Self {
        let engine = Arc::new(TransferEngine::new(&config));
        AppState {
            config: Arc::new(config),
            sessions,
            engine,
            disposition: Arc::new(Rfc2231Disposition::attachment()),
        }
    }

    pub fn with_engine(mut self, engine: TransferEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn with_disposition(mut self, disposition: impl DispositionEncoder + 'static) -> Self {
        self.disposition = Arc::new(disposition);
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Relative URL under which `handle` can be downloaded.
    pub fn download_path(&self, handle: &str) -> String {
        format!("{}/{}/{}", self.config.context_path, BIG_BLOB_MARKER, handle)
    }
}

/// Extract the blob handle from a decoded request path.
///
/// Returns `None` unless the path contains the marker segment directly after
/// `context_path`, or when nothing follows the marker.
pub fn blob_handle<'a>(path: &'a str, context_path: &str) -> Option<&'a str> {
    let marker = format!("/{BIG_BLOB_MARKER}/");
    if !path.contains(&marker) {
        return None;
    }
    path.strip_prefix(context_path)?
        .strip_prefix(&marker)
        .filter(|handle| !handle.is_empty())
}

/// Router serving `GET {context_path}/nxbigblob/{*handle}`.
pub fn router(state: AppState) -> Router {
    let route = format!("{}/{}/{{*handle}}", state.config.context_path, BIG_BLOB_MARKER);
    Router::new().route(&route, get(download)).with_state(state)
}

async fn download(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let path = percent_decode_str(uri.path()).decode_utf8_lossy();
    let Some(handle) = blob_handle(&path, &state.config.context_path) else {
        debug!(path = %path, "no blob handle in path");
        return DownloadError::NotFound(String::new()).into_response();
    };

    let session = jar.get(&state.config.session_cookie).map(|cookie| cookie.value().to_owned());
    let blob = match state.sessions.take(session.as_deref(), handle) {
        BlobLookup::Found(blob) => blob,
        BlobLookup::NotFound => {
            debug!(handle, "no blob found");
            return DownloadError::NotFound(handle.to_owned()).into_response();
        }
        BlobLookup::Gone => {
            debug!(handle, "blob is gone");
            return DownloadError::Gone(handle.to_owned()).into_response();
        }
    };

    // a non UTF-8 header cannot parse and falls back to the full blob
    let range = headers
        .get(RANGE)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    let (mut sink, head_rx, body) = channel();
    let engine = state.engine.clone();
    let disposition = state.disposition.clone();
    let transfer = tokio::spawn(async move {
        let outcome = engine
            .transfer(&*blob, range.as_deref(), &*disposition, &mut sink)
            .await;
        if let TransferOutcome::Failed(err) = &outcome {
            sink.abort(err).await;
        }
        outcome
    });

    if let Ok(head) = head_rx.await {
        return head.into_response(body);
    }

    // the transfer ended before producing a head
    match transfer.await {
        Ok(TransferOutcome::Failed(err)) => DownloadError::Transfer(err).into_response(),
        Ok(outcome) => {
            error!(handle, ?outcome, "transfer ended without a response head");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(handle, "transfer task failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
