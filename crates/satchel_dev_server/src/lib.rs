use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
pub use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Path the live-reload client connects to
pub const LIVE_RELOAD_PATH: &str = "/__satchel";

#[derive(Debug)]
pub struct Options {
  pub dist_dir: PathBuf,
  pub port: u16,
}

#[derive(Clone)]
struct ServeState {
  /// When false, requests wait until the active build finishes
  ready: tokio::sync::watch::Receiver<bool>,
}

pub struct ServerHandle {
  join_handle: tokio::task::JoinHandle<anyhow::Result<()>>,
  wait_tx: tokio::sync::watch::Sender<bool>,
  port: u16,
}

impl ServerHandle {
  pub fn on_build_finished(&self) {
    let _ = self.wait_tx.send(true);
  }

  pub fn on_build_started(&self) {
    let _ = self.wait_tx.send(false);
  }

  pub fn port(&self) -> u16 {
    self.port
  }

  pub fn stop(&self) {
    self.join_handle.abort();
  }
}

/// Serve the output directory, holding requests while a build is in flight
pub async fn run_server(options: Options) -> anyhow::Result<ServerHandle> {
  let (wait_tx, wait_rx) = tokio::sync::watch::channel(false);
  let app = serve_dir_router(&options.dist_dir, wait_rx);

  let listener =
    tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], options.port))).await?;
  let port = listener.local_addr()?.port();
  tracing::info!("Serving on http://localhost:{port}");

  Ok(ServerHandle {
    join_handle: tokio::spawn(async move {
      axum::serve(listener, app).await?;
      Ok(())
    }),
    wait_tx,
    port,
  })
}

/// The middleware router used both standalone and mounted into a host app
pub fn serve_dir_router(dist_dir: &Path, ready: tokio::sync::watch::Receiver<bool>) -> Router {
  Router::new()
    .fallback_service(ServeDir::new(dist_dir))
    .layer(axum::middleware::from_fn_with_state(
      ServeState { ready },
      wait_for_build_middleware,
    ))
    .layer(TraceLayer::new_for_http())
}

async fn wait_for_build_middleware(
  mut state: axum::extract::State<ServeState>,
  request: axum::extract::Request,
  next: axum::middleware::Next,
) -> impl IntoResponse {
  loop {
    let ready = *state.ready.borrow_and_update();
    if ready {
      return next.run(request).await;
    }

    tracing::debug!("Waiting for build to finish");
    if state.ready.changed().await.is_err() {
      return (StatusCode::INTERNAL_SERVER_ERROR, "Build failed").into_response();
    }
  }
}

/// One changed asset in a live-reload update delta
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedAsset {
  pub path: PathBuf,
  /// Generated output keyed by type extension
  pub output: BTreeMap<String, String>,
  pub hash: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LiveReloadMessage {
  Update { assets: Vec<UpdatedAsset> },
  Error { message: String },
}

/// WebSocket endpoint pushing update deltas and build errors to connected
/// live-reload clients.
pub struct LiveReloadServer {
  tx: broadcast::Sender<String>,
  join_handle: tokio::task::JoinHandle<anyhow::Result<()>>,
  port: u16,
}

impl LiveReloadServer {
  pub async fn start(port: u16) -> anyhow::Result<LiveReloadServer> {
    let (tx, _) = broadcast::channel::<String>(64);

    let app = Router::new()
      .route(LIVE_RELOAD_PATH, get(live_reload_handler))
      .with_state(tx.clone());

    let listener =
      tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Live reload listening on ws://localhost:{port}{LIVE_RELOAD_PATH}");

    Ok(LiveReloadServer {
      tx,
      join_handle: tokio::spawn(async move {
        axum::serve(listener, app).await?;
        Ok(())
      }),
      port,
    })
  }

  pub fn port(&self) -> u16 {
    self.port
  }

  pub fn emit_update(&self, assets: Vec<UpdatedAsset>) {
    self.broadcast(&LiveReloadMessage::Update { assets });
  }

  pub fn emit_error(&self, message: impl Into<String>) {
    self.broadcast(&LiveReloadMessage::Error {
      message: message.into(),
    });
  }

  fn broadcast(&self, message: &LiveReloadMessage) {
    match serde_json::to_string(message) {
      // Send errors only mean no client is connected right now
      Ok(payload) => {
        let _ = self.tx.send(payload);
      }
      Err(err) => tracing::warn!("Failed to encode live-reload message: {err}"),
    }
  }

  pub fn stop(&self) {
    self.join_handle.abort();
  }
}

async fn live_reload_handler(
  ws: WebSocketUpgrade,
  State(tx): State<broadcast::Sender<String>>,
) -> impl IntoResponse {
  ws.on_upgrade(move |socket| client_loop(socket, tx.subscribe()))
}

async fn client_loop(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
  loop {
    match rx.recv().await {
      Ok(message) => {
        if socket.send(Message::Text(message)).await.is_err() {
          break;
        }
      }
      Err(broadcast::error::RecvError::Lagged(skipped)) => {
        tracing::debug!(%skipped, "Live reload client lagged");
      }
      Err(broadcast::error::RecvError::Closed) => break,
    }
  }
}
