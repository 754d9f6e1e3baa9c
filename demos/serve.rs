use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use axum_bigblob::{router, AppState, DownloadConfig, FileBlob, SessionRegistry};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;

/// Serves big blob downloads plus a `/register` route that stashes a file
/// for the caller's session and answers with its single-use download path.
///
/// Only files below the working directory can be registered. Session ids are
/// derived from the process id and the clock, so they are guessable: do not
/// expose this server beyond localhost.
///
/// ```text
/// cargo run --example serve -- [config.yaml]
/// curl -c jar -b jar 'http://127.0.0.1:3000/register?path=Cargo.toml'
/// curl -b jar -H 'Range: bytes=0-99' http://127.0.0.1:3000/nxbigblob/<handle>
/// ```
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match DownloadConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        None => DownloadConfig::default(),
    };

    let root = match std::env::current_dir().and_then(|dir| dir.canonicalize()) {
        Ok(root) => Arc::new(root),
        Err(e) => {
            eprintln!("cannot resolve working directory: {e}");
            std::process::exit(1);
        }
    };

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, Arc::new(SessionRegistry::new()));

    let app = Router::new()
        .route(
            "/register",
            get(
                move |state: State<AppState>, jar: CookieJar, query: Query<FileRequest>| {
                    register_file(state, jar, query, root.clone())
                },
            ),
        )
        .with_state(state.clone())
        .merge(router(state));

    let listener = tokio::net::TcpListener::bind(&bind_address).await.unwrap();
    tracing::info!("listening on {bind_address}");
    axum::serve(listener, app).await.unwrap();
}

#[derive(Debug, Deserialize)]
struct FileRequest {
    path: String,
}

async fn register_file(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(q): Query<FileRequest>,
    root: Arc<PathBuf>,
) -> impl IntoResponse {
    let Some(path) = resolve_below(&root, &q.path).await else {
        return (StatusCode::FORBIDDEN, format!("{} is outside {}", q.path, root.display()))
            .into_response();
    };

    let cookie_name = state.config().session_cookie.clone();
    let (jar, session) = match jar.get(&cookie_name) {
        Some(cookie) => {
            let session = cookie.value().to_owned();
            (jar, session)
        }
        None => {
            let session = format!("{:x}", std::process::id() as u128 ^ now_nanos());
            (jar.add(Cookie::new(cookie_name, session.clone())), session)
        }
    };

    match FileBlob::from_path(path).await {
        Ok(blob) => {
            let handle = state.sessions().register(&session, Arc::new(blob));
            (jar, state.download_path(&handle)).into_response()
        }
        Err(e) => (StatusCode::NOT_FOUND, format!("cannot register {}: {e}", q.path)).into_response(),
    }
}

/// Canonicalize `requested` relative to `root`, rejecting anything that
/// escapes it through `..` or symlinks.
async fn resolve_below(root: &Path, requested: &str) -> Option<PathBuf> {
    let path = tokio::fs::canonicalize(root.join(requested)).await.ok()?;
    path.starts_with(root).then_some(path)
}

fn now_nanos() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos())
}
