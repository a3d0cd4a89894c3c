//! Edge server assembly

use crate::config::EdgeConfig;
use crate::error::EdgeError;
use crate::forward::http_ingress;
use crate::session::pin_session;
use crate::tunnel::tunnel_ingress;
use crate::websocket::websocket_ingress;
use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use edgelink_control::ControlPlane;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// State shared by every handler of one edge server
pub struct EdgeState {
    pub config: EdgeConfig,
    pub control: ControlPlane,
}

/// Public WebSocket route of the private service
pub const PUBLIC_WEBSOCKET_PATH: &str = "/api/websocket";

/// Edge server: public HTTP/WebSocket ingress plus the agent tunnel endpoint
pub struct EdgeServer {
    state: Arc<EdgeState>,
}

impl EdgeServer {
    pub fn new(config: EdgeConfig) -> Result<Self, EdgeError> {
        config.validate()?;
        let control = ControlPlane::new(config.tenants.iter().cloned());
        Ok(Self {
            state: Arc::new(EdgeState { config, control }),
        })
    }

    /// Build the router
    ///
    /// The tunnel route is added after the session layer, so agents are
    /// authenticated by their handshake and never by cookie or prefix.
    pub fn router(&self) -> Router {
        let state = self.state.clone();

        let mut public = Router::new().route(PUBLIC_WEBSOCKET_PATH, any(websocket_ingress));
        for tenant in &state.config.tenants {
            public = public.route(
                &format!("/{}{}", tenant, PUBLIC_WEBSOCKET_PATH),
                any(websocket_ingress),
            );
        }

        public
            .route("/", any(http_ingress))
            .route("/{*path}", any(http_ingress))
            .layer(middleware::from_fn_with_state(state.clone(), pin_session))
            .route(&state.config.tunnel_path, get(tunnel_ingress))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener and start serving in the background
    pub async fn bind(self) -> Result<EdgeHandle, EdgeError> {
        let addr = self.state.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| EdgeError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            tenants = self.state.config.tenants.len(),
            tunnel_path = %self.state.config.tunnel_path,
            "Edge server listening"
        );

        let router = self.router();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = &result {
                error!("Edge server error: {}", e);
            }
            result
        });

        Ok(EdgeHandle {
            local_addr,
            state: self.state,
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

/// Handle to a running edge server
///
/// Dropping the handle shuts the server down gracefully.
pub struct EdgeHandle {
    local_addr: SocketAddr,
    state: Arc<EdgeState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl EdgeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn control(&self) -> &ControlPlane {
        &self.state.control
    }

    /// Stop accepting connections and wait for the server task
    pub async fn shutdown(mut self) -> Result<(), EdgeError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.wait().await
    }

    /// Wait until the server stops
    pub async fn wait(&mut self) -> Result<(), EdgeError> {
        match (&mut self.task).await {
            Ok(result) => result.map_err(EdgeError::Io),
            Err(e) => Err(EdgeError::Io(std::io::Error::other(e))),
        }
    }
}
