//! The server instance: installed applications, the registry and the sweeper

use crate::app::Application;
use crate::config::{ServerOptions, SockJsConfig};
use crate::handler::{NoopHook, SockJsHandler, SockJsHook};
use crate::http;
use crate::registry::SessionRegistry;
use crate::router::{AppRouter, Route};
use crate::transport::{TransportContext, receive, send, websocket};
use crate::{ServerError, ServerResult};
use axum::{
    Router,
    extract::{ConnectInfo, FromRequestParts, Request, State, ws::WebSocketUpgrade},
    http::Method,
    response::{IntoResponse, Response},
};
use parking_lot::{Mutex, RwLock};
use ras_sockjs_types::{CloseFrame, SockJsError, TransportKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Upper bound on the body of one send request
const MAX_SEND_BODY_BYTES: usize = 16 * 1024 * 1024;

struct ServerState {
    apps: RwLock<AppRouter>,
    registry: Arc<SessionRegistry>,
    hook: RwLock<Arc<dyn SockJsHook>>,
    options: ServerOptions,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ServerState {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

/// A SockJS server instance
///
/// Cheap to clone; all clones share the same applications and sessions.
///
/// ```rust,ignore
/// let server = SockJsServer::new();
/// server.install_app(
///     SockJsConfig::builder().prefix("/echo").build(),
///     handler_fn(|mut socket: SockJsSocket| async move {
///         while let Some(message) = socket.recv().await {
///             let _ = socket.send(message);
///         }
///     }),
/// )?;
/// let app = server.router();
/// ```
#[derive(Clone)]
pub struct SockJsServer {
    state: Arc<ServerState>,
}

impl Default for SockJsServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SockJsServer {
    pub fn new() -> Self {
        Self::with_options(ServerOptions::default())
    }

    pub fn with_options(options: ServerOptions) -> Self {
        Self {
            state: Arc::new(ServerState {
                apps: RwLock::new(AppRouter::new()),
                registry: SessionRegistry::new(),
                hook: RwLock::new(Arc::new(NoopHook)),
                options,
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Install an application under `config.prefix`
    pub fn install_app<H>(&self, config: SockJsConfig, handler: H) -> ServerResult<()>
    where
        H: SockJsHandler,
    {
        self.install_shared(config, Arc::new(handler))
    }

    /// Install an application whose handler is already shared
    pub fn install_shared(
        &self,
        config: SockJsConfig,
        handler: Arc<dyn SockJsHandler>,
    ) -> ServerResult<()> {
        let app = Application::new(config, handler)?;
        let installed = self.state.apps.write().install(app)?;
        info!(
            "Installed SockJS application at '{}' (disabled transports: {:?})",
            installed.config().prefix,
            installed.config().disabled_transports
        );
        Ok(())
    }

    /// Replace the lifecycle hook; affects sockets opened afterwards
    pub fn set_hook<K: SockJsHook>(&self, hook: K) {
        *self.state.hook.write() = Arc::new(hook);
    }

    pub fn hook(&self) -> Arc<dyn SockJsHook> {
        Arc::clone(&self.state.hook.read())
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    pub fn session_count(&self) -> usize {
        self.state.registry.len()
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.state.apps.read().prefixes()
    }

    /// An axum router serving every installed application
    ///
    /// Starts the expiry sweeper when called inside a runtime.
    pub fn router(&self) -> Router {
        self.start();
        Router::new().fallback(dispatch).with_state(self.clone())
    }

    /// Spawn the periodic expiry sweep; calling it again is a no-op
    pub fn start(&self) {
        let mut sweeper = self.state.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; session sweeper not started");
            return;
        };

        let registry = Arc::clone(&self.state.registry);
        let period = self.state.options.sweep_duration();
        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep_expired(Instant::now());
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "session sweeper started");
    }

    /// Stop the sweeper and close every session with "Go away!"
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.state.sweeper.lock().take() {
            sweeper.abort();
        }
        let count = self.state.registry.len();
        self.state.registry.close_all(CloseFrame::go_away());
        info!("SockJS server shut down, closed {} sessions", count);
    }
}

async fn dispatch(State(server): State<SockJsServer>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let resolved = server
        .state
        .apps
        .read()
        .resolve(&path)
        .map(|(app, rest)| (app, rest.to_string()));
    let Some((app, suffix)) = resolved else {
        debug!(path = %path, "no application for path");
        return ServerError::NotFound.into_response();
    };

    let (mut parts, body) = request.into_parts();
    let method = parts.method.clone();
    let ctx = TransportContext {
        app: Arc::clone(&app),
        registry: Arc::clone(&server.state.registry),
        hook: server.hook(),
        headers: parts.headers.clone(),
        query: parts.uri.query().map(str::to_string),
        remote_addr: parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
    };

    match Route::parse(&suffix) {
        Route::Greeting => match method {
            Method::GET | Method::HEAD => http::greeting(),
            _ => ServerError::MethodNotAllowed.into_response(),
        },
        Route::Info => match method {
            Method::GET => http::info(&app, &ctx.headers),
            Method::OPTIONS => http::preflight(&ctx.headers, "OPTIONS, GET"),
            _ => ServerError::MethodNotAllowed.into_response(),
        },
        Route::Iframe => match method {
            Method::GET => http::iframe(&app, &ctx.headers),
            _ => ServerError::MethodNotAllowed.into_response(),
        },
        Route::RawWebSocket => {
            if !app.config().is_enabled(TransportKind::RawWebSocket) {
                return ServerError::NotFound.into_response();
            }
            if method != Method::GET {
                return ServerError::MethodNotAllowed.into_response();
            }
            match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                Ok(upgrade) => websocket::raw(ctx, upgrade),
                Err(_) => ServerError::UpgradeRequired.into_response(),
            }
        }
        Route::Session {
            session, transport, ..
        } => {
            if !app.config().is_enabled(transport) {
                return ServerError::NotFound.into_response();
            }
            match (transport, method) {
                (TransportKind::WebSocket, Method::GET) => {
                    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                        Ok(upgrade) => websocket::framed(ctx, session, upgrade),
                        Err(_) => ServerError::UpgradeRequired.into_response(),
                    }
                }
                (
                    TransportKind::XhrPolling
                    | TransportKind::XhrStreaming
                    | TransportKind::XhrSend,
                    Method::OPTIONS,
                ) => http::preflight(&ctx.headers, "OPTIONS, POST"),
                (TransportKind::XhrPolling | TransportKind::XhrStreaming, Method::POST)
                | (
                    TransportKind::EventSource
                    | TransportKind::HtmlFile
                    | TransportKind::JsonpPolling,
                    Method::GET,
                ) => receive::handle(ctx, session, transport).await,
                (TransportKind::XhrSend | TransportKind::JsonpSend, Method::POST) => {
                    match axum::body::to_bytes(body, MAX_SEND_BODY_BYTES).await {
                        Ok(bytes) => send::handle(&ctx, session, transport, bytes),
                        Err(err) => {
                            warn!(error = %err, "failed to read send body");
                            ServerError::Protocol(SockJsError::detach(err))
                                .into_response()
                        }
                    }
                }
                _ => ServerError::MethodNotAllowed.into_response(),
            }
        }
        Route::NotFound => ServerError::NotFound.into_response(),
    }
}
