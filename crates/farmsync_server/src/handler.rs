//! Request handlers for sync endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use farmsync_core::{SyncOrchestrator, TenantId};
use farmsync_protocol::{PullRequest, PushRequest, PushResponse, SyncRequest, SyncResponse};
use std::sync::Arc;
use tracing::warn;

/// Who is calling, as established by the transport.
///
/// Request bodies never carry the tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// A bearer token to verify.
    Token(String),
    /// A tenant already verified by a trusted upstream (a gateway, the CLI).
    ///
    /// Refused when the server requires authentication.
    Trusted(TenantId),
}

/// Context for request handling.
#[derive(Debug)]
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Engine shared across all handlers.
    pub orchestrator: Arc<SyncOrchestrator>,
    validator: Option<TokenValidator>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, orchestrator: Arc<SyncOrchestrator>) -> Self {
        let validator = config.auth_secret.as_ref().map(|secret| {
            TokenValidator::new(AuthConfig::new(secret.clone()).with_expiry(config.token_expiry))
        });
        Self {
            config,
            orchestrator,
            validator,
        }
    }

    /// Returns the token validator, if a secret is configured.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }
}

/// Handler for sync requests.
#[derive(Debug)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Resolves the caller to a tenant.
    pub fn authenticate(&self, caller: &Caller) -> ServerResult<TenantId> {
        let result = match caller {
            Caller::Token(token) => match self.context.validator() {
                Some(validator) => validator.validate_token(token).map(|claims| claims.tenant),
                None => Err(ServerError::AuthenticationFailed(
                    "token authentication is not configured".into(),
                )),
            },
            Caller::Trusted(_) if self.context.config.require_auth => Err(
                ServerError::AuthenticationFailed("a signed token is required".into()),
            ),
            Caller::Trusted(tenant) => Ok(*tenant),
        };
        if let Err(err) = &result {
            warn!(error = %err, "caller rejected");
        }
        result
    }

    /// Handles a combined sync request.
    pub fn handle_sync(&self, tenant: TenantId, request: &SyncRequest) -> ServerResult<SyncResponse> {
        self.check_rows(request.row_count())?;
        Ok(self.context.orchestrator.sync(tenant, request)?)
    }

    /// Handles a legacy push request.
    pub fn handle_push(&self, tenant: TenantId, request: &PushRequest) -> ServerResult<PushResponse> {
        self.check_rows(request.changes.len())?;
        Ok(self.context.orchestrator.push(tenant, request)?)
    }

    /// Handles a legacy pull request.
    pub fn handle_pull(&self, tenant: TenantId, request: &PullRequest) -> ServerResult<SyncResponse> {
        Ok(self.context.orchestrator.pull(tenant, request)?)
    }

    fn check_rows(&self, rows: usize) -> ServerResult<()> {
        let limit = self.context.config.max_push_rows;
        if rows > limit {
            return Err(ServerError::PayloadTooLarge { rows, limit });
        }
        Ok(())
    }
}
