//! Session Service - Opens authenticated sessions for the pool
//!
//! SessionService is responsible for:
//! - Authenticating against the context's host and port
//! - Binding the new session to the context's group
//! - Wrapping the result in a Connector
//!
//! It never registers anything; the pool decides what to keep.

use std::sync::Arc;

use sessionmux_core::{Credentials, GatewayError, GatewayResult, RemoteClient, SecurityContext};
use tracing::{debug, info, warn};

use super::connector::Connector;

/// Message of the error returned when a session cannot be opened
pub const CONNECTOR_FAILED_MESSAGE: &str = "Cannot create a connector";

pub struct SessionService {
    client: Arc<dyn RemoteClient>,
    /// Reported to the server with every new session
    agent: String,
}

impl SessionService {
    pub fn new(client: Arc<dyn RemoteClient>, agent: impl Into<String>) -> Self {
        Self {
            client,
            agent: agent.into(),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Open a session for `ctx` and wrap it in a connector.
    ///
    /// A session that authenticated but could not join the group is closed
    /// before the error is returned.
    pub async fn open(&self, ctx: &SecurityContext, credentials: &Credentials) -> GatewayResult<Connector> {
        debug!(
            group_id = ctx.group_id,
            address = %ctx.server_address(),
            user = %credentials.username(),
            agent = %self.agent,
            "[SessionService] Creating session"
        );

        let session = self
            .client
            .create_session(
                &ctx.host,
                ctx.port,
                credentials.username(),
                credentials.password(),
                &self.agent,
            )
            .await
            .map_err(|e| {
                warn!(
                    group_id = ctx.group_id,
                    host = %ctx.host,
                    error = %e,
                    "[SessionService] Session creation failed"
                );
                GatewayError::connection(CONNECTOR_FAILED_MESSAGE).with_cause(e)
            })?;

        if let Err(e) = session.set_security_context(ctx.group_id).await {
            warn!(
                group_id = ctx.group_id,
                error = %e,
                "[SessionService] Cannot bind session to group"
            );
            if let Err(close_err) = session.close().await {
                debug!(error = %close_err, "[SessionService] Close after failed bind");
            }
            return Err(GatewayError::connection(CONNECTOR_FAILED_MESSAGE).with_cause(e));
        }

        let connector = Connector::new(ctx.clone(), session);
        info!(
            connector_id = %connector.id(),
            group_id = ctx.group_id,
            host = %ctx.host,
            "[SessionService] Session established"
        );
        Ok(connector)
    }
}
