//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{Caller, HandlerContext, RequestHandler};
use farmsync_core::{Store, SyncOrchestrator, SyncStats, TenantId};
use farmsync_protocol::{
    PullRequest, PushRequest, PushResponse, SyncMessage, SyncRequest, SyncResponse, WireMessage,
};
use std::sync::Arc;
use tracing::{error, info};

/// Fallback body when an error body itself cannot be encoded.
const INTERNAL_ERROR_BODY: &[u8] = br#"{"kind":"internal","message":"internal error"}"#;

/// The routes a transport exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `POST /api/sync`: push then pull.
    Sync,
    /// `POST /api/sync/push`: legacy push.
    Push,
    /// `POST /api/sync/pull`: legacy pull.
    Pull,
}

impl Endpoint {
    /// All endpoints.
    pub const ALL: [Endpoint; 3] = [Endpoint::Sync, Endpoint::Push, Endpoint::Pull];

    /// Returns the request path.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Sync => "/api/sync",
            Endpoint::Push => "/api/sync/push",
            Endpoint::Pull => "/api/sync/pull",
        }
    }

    /// Matches a request path, ignoring a trailing slash.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        Self::ALL.into_iter().find(|endpoint| endpoint.path() == path)
    }
}

/// The sync server.
///
/// Handles sync, push and pull calls for any number of tenants against one
/// store. It carries no transport of its own: an HTTP layer maps a request
/// to a [`Caller`] and an [`Endpoint`] and hands the body to
/// [`SyncServer::handle_bytes`].
///
/// # Example
///
/// ```rust,ignore
/// use farmsync_server::{Caller, Endpoint, ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default())?;
/// let (status, body) = server.handle_bytes(&caller, Endpoint::Sync, br#"{"sinceWatermark":null}"#);
/// ```
#[derive(Debug)]
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Opens the configured store and creates a server over it.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let store = Arc::new(Store::open(config.store.clone())?);
        let orchestrator = Arc::new(SyncOrchestrator::new(store, config.sync.clone()));
        Ok(Self::with_orchestrator(config, orchestrator))
    }

    /// Creates a server sharing an existing orchestrator.
    pub fn with_orchestrator(config: ServerConfig, orchestrator: Arc<SyncOrchestrator>) -> Self {
        info!(
            require_auth = config.require_auth,
            max_push_rows = config.max_push_rows,
            "sync server ready"
        );
        let context = Arc::new(HandlerContext::new(config, orchestrator));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the engine behind this server.
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.context.orchestrator
    }

    /// Returns call statistics.
    pub fn stats(&self) -> &SyncStats {
        self.context.orchestrator.stats()
    }

    /// Resolves the caller to a tenant.
    pub fn authenticate(&self, caller: &Caller) -> ServerResult<TenantId> {
        self.handler.authenticate(caller)
    }

    /// Handles a combined sync request.
    pub fn handle_sync(&self, caller: &Caller, request: &SyncRequest) -> ServerResult<SyncResponse> {
        let tenant = self.authenticate(caller)?;
        self.handler.handle_sync(tenant, request)
    }

    /// Handles a legacy push request.
    pub fn handle_push(&self, caller: &Caller, request: &PushRequest) -> ServerResult<PushResponse> {
        let tenant = self.authenticate(caller)?;
        self.handler.handle_push(tenant, request)
    }

    /// Handles a legacy pull request.
    pub fn handle_pull(&self, caller: &Caller, request: &PullRequest) -> ServerResult<SyncResponse> {
        let tenant = self.authenticate(caller)?;
        self.handler.handle_pull(tenant, request)
    }

    /// Handles a sync message (dispatches to appropriate handler).
    ///
    /// Failures come back as [`SyncMessage::Error`].
    pub fn handle_message(&self, caller: &Caller, message: SyncMessage) -> SyncMessage {
        let result = match message {
            SyncMessage::SyncRequest(req) => {
                self.handle_sync(caller, &req).map(SyncMessage::SyncResponse)
            }
            SyncMessage::PushRequest(req) => {
                self.handle_push(caller, &req).map(SyncMessage::PushResponse)
            }
            SyncMessage::PullRequest(req) => {
                self.handle_pull(caller, &req).map(SyncMessage::SyncResponse)
            }
            other => Err(ServerError::InvalidRequest(format!(
                "unexpected message type {}",
                other.type_code()
            ))),
        };
        result.unwrap_or_else(|err| SyncMessage::Error(err.to_body()))
    }

    /// Handles a raw JSON body for an endpoint.
    ///
    /// Returns the HTTP-equivalent status and the JSON response body.
    pub fn handle_bytes(&self, caller: &Caller, endpoint: Endpoint, body: &[u8]) -> (u16, Vec<u8>) {
        let result = match endpoint {
            Endpoint::Sync => SyncRequest::decode(body)
                .map_err(ServerError::from)
                .and_then(|req| self.handle_sync(caller, &req))
                .and_then(|resp| resp.encode().map_err(ServerError::from)),
            Endpoint::Push => PushRequest::decode(body)
                .map_err(ServerError::from)
                .and_then(|req| self.handle_push(caller, &req))
                .and_then(|resp| resp.encode().map_err(ServerError::from)),
            Endpoint::Pull => PullRequest::decode(body)
                .map_err(ServerError::from)
                .and_then(|req| self.handle_pull(caller, &req))
                .and_then(|resp| resp.encode().map_err(ServerError::from)),
        };

        match result {
            Ok(bytes) => (200, bytes),
            Err(err) => {
                if err.is_server_error() {
                    error!(endpoint = endpoint.path(), error = %err, "request failed");
                }
                let body = err
                    .to_body()
                    .encode()
                    .unwrap_or_else(|_| INTERNAL_ERROR_BODY.to_vec());
                (err.status_code(), body)
            }
        }
    }

    /// Async variant of [`SyncServer::handle_sync`].
    ///
    /// Runs on the blocking pool so storage work never stalls the runtime.
    pub async fn sync(
        self: &Arc<Self>,
        caller: Caller,
        request: SyncRequest,
    ) -> ServerResult<SyncResponse> {
        let server = Arc::clone(self);
        run_blocking(move || server.handle_sync(&caller, &request)).await?
    }

    /// Async variant of [`SyncServer::handle_push`].
    pub async fn push(
        self: &Arc<Self>,
        caller: Caller,
        request: PushRequest,
    ) -> ServerResult<PushResponse> {
        let server = Arc::clone(self);
        run_blocking(move || server.handle_push(&caller, &request)).await?
    }

    /// Async variant of [`SyncServer::handle_pull`].
    pub async fn pull(
        self: &Arc<Self>,
        caller: Caller,
        request: PullRequest,
    ) -> ServerResult<SyncResponse> {
        let server = Arc::clone(self);
        run_blocking(move || server.handle_pull(&caller, &request)).await?
    }

    /// Async variant of [`SyncServer::handle_bytes`].
    pub async fn serve_bytes(
        self: &Arc<Self>,
        caller: Caller,
        endpoint: Endpoint,
        body: Vec<u8>,
    ) -> (u16, Vec<u8>) {
        let server = Arc::clone(self);
        match run_blocking(move || server.handle_bytes(&caller, endpoint, &body)).await {
            Ok(reply) => reply,
            Err(err) => (err.status_code(), INTERNAL_ERROR_BODY.to_vec()),
        }
    }
}

async fn run_blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("request task failed: {e}")))
}
