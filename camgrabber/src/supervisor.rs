/*!
Link supervision.

Owns the open transport, reopens it after faults with a fixed backoff, and
gives up after a configured number of consecutive failed opens.
*/

use std::time::Duration;

use shared::LinkError;
use tracing::{info, warn};

use crate::config::{LinkConfig, LinkSession};
use crate::transport::LinkConnector;

/// Holds the current transport and reconnects on demand
pub struct LinkSupervisor<C: LinkConnector> {
    connector: C,
    session: LinkSession,
    backoff: Duration,
    /// Consecutive failed opens before giving up, 0 retries forever
    max_attempts: u32,
    transport: Option<C::Transport>,
    /// Set when a live transport was dropped; the next open waits `backoff` first
    reopen_pending: bool,
    opens: u64,
}

impl<C: LinkConnector> LinkSupervisor<C> {
    pub fn new(connector: C, session: LinkSession, backoff: Duration, max_attempts: u32) -> Self {
        Self {
            connector,
            session,
            backoff,
            max_attempts,
            transport: None,
            reopen_pending: false,
            opens: 0,
        }
    }

    pub fn from_config(connector: C, config: &LinkConfig) -> Self {
        Self::new(
            connector,
            LinkSession::from(config),
            Duration::from_millis(config.reconnect_backoff_ms),
            config.max_reconnect_attempts,
        )
    }

    pub fn session(&self) -> &LinkSession {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Successful opens so far
    pub fn opens(&self) -> u64 {
        self.opens
    }

    /// Current transport, opening one if needed.
    ///
    /// Returns `LinkError::Unavailable` once `max_attempts` consecutive opens
    /// have failed.
    pub async fn acquire(&mut self) -> Result<&mut C::Transport, LinkError> {
        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => self.open_with_retry().await?,
        };
        Ok(self.transport.insert(transport))
    }

    /// Drop the current transport; the next `acquire` reopens it after the backoff
    pub fn invalidate(&mut self) {
        if self.transport.take().is_some() {
            warn!(
                "🔌 Link to {} dropped, reconnecting in {:?}",
                self.session.port, self.backoff
            );
            self.reopen_pending = true;
        }
    }

    async fn open_with_retry(&mut self) -> Result<C::Transport, LinkError> {
        if self.reopen_pending {
            tokio::time::sleep(self.backoff).await;
            self.reopen_pending = false;
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.connector.open(&self.session).await {
                Ok(transport) => {
                    if self.opens > 0 || attempts > 1 {
                        info!("✅ Link to {} restored after {} attempt(s)", self.session.port, attempts);
                    }
                    self.opens += 1;
                    return Ok(transport);
                }
                Err(e) => {
                    warn!("❌ Attempt {} to open {} failed: {}", attempts, self.session.port, e);
                    if self.max_attempts != 0 && attempts >= self.max_attempts {
                        return Err(LinkError::Unavailable {
                            port: self.session.port.clone(),
                            attempts,
                        });
                    }
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}
