//! Remote login/logout and the interactive-session flag the scheduler honours.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::db::{self, Pool};
use crate::remote::RemoteService;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub app_name: String,
    pub app_id: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_name", &self.app_name)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Interactive,
    Service,
}

pub struct SessionManager {
    pool: Pool,
    remote: Arc<dyn RemoteService>,
    interactive: AtomicBool,
}

impl SessionManager {
    pub fn new(pool: Pool, remote: Arc<dyn RemoteService>) -> Self {
        Self {
            pool,
            remote,
            interactive: AtomicBool::new(false),
        }
    }

    pub fn interactive_active(&self) -> bool {
        self.interactive.load(Ordering::SeqCst)
    }

    /// Set by the interactive login/logout path.
    pub fn set_interactive(&self, active: bool) {
        self.interactive.store(active, Ordering::SeqCst);
    }

    #[instrument(skip_all, fields(user = %credentials.username, kind = ?kind))]
    pub async fn login(&self, credentials: &Credentials, kind: SessionKind) -> Result<()> {
        let token = self
            .remote
            .login(credentials)
            .await
            .context("remote login failed")?;
        self.remote.set_token(Some(token.clone())).await;
        db::save_auth_token(&self.pool, &token).await?;
        if kind == SessionKind::Interactive {
            self.set_interactive(true);
        }
        info!("logged in to remote system");
        Ok(())
    }

    /// Deauthenticate and forget the cached token. The local state is cleared
    /// even when the remote call fails.
    #[instrument(skip_all)]
    pub async fn logout(&self) -> Result<()> {
        let remote_result = self.remote.logout().await;
        self.remote.set_token(None).await;
        db::clear_auth_token(&self.pool).await?;
        self.set_interactive(false);
        match remote_result {
            Ok(()) => {
                info!("logged out of remote system");
                Ok(())
            }
            Err(err) => {
                warn!(?err, "remote logout failed; local session cleared anyway");
                Err(err).context("remote logout failed")
            }
        }
    }

    /// Reinstall a token cached by a previous process. Returns whether one was found.
    pub async fn restore(&self) -> Result<bool> {
        match db::load_auth_token(&self.pool).await? {
            Some(token) => {
                self.remote.set_token(Some(token)).await;
                info!("restored cached remote session");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reuse the cached session, or log in as the service account. Returns
    /// whether this call logged in.
    pub async fn ensure_service(&self, credentials: &Credentials) -> Result<bool> {
        if self.restore().await? {
            return Ok(false);
        }
        self.login(credentials, SessionKind::Service).await?;
        Ok(true)
    }
}
