// src/ledger/connector.rs

use tracing::{debug, info, warn};

use super::NodeDialer;

pub const DEFAULT_CONNECT_ATTEMPTS: usize = 2;

/// Holds the worker's single node session and re-establishes it from an ordered
/// endpoint list when needed.
pub struct NodeConnector<D: NodeDialer> {
    dialer: D,
    urls: Vec<String>,
    max_attempts: usize,
    active: Option<D::Session>,
}

impl<D: NodeDialer> NodeConnector<D> {
    pub fn new(dialer: D, urls: Vec<String>) -> Self {
        Self {
            dialer,
            urls,
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            active: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns the active session, connecting first if there is none.
    /// `None` means no endpoint could be reached within the attempt budget.
    pub async fn ensure_connected(&mut self) -> Option<&D::Session> {
        if self.active.is_none() {
            self.active = self.connect().await;
        }
        self.active.as_ref()
    }

    /// Tries endpoints in order, one attempt each, up to `max_attempts` in total.
    /// The cause of each failure is only logged.
    pub async fn connect(&self) -> Option<D::Session> {
        for (attempt, url) in self.urls.iter().take(self.max_attempts).enumerate() {
            debug!(attempt = attempt + 1, url = %url, "Connecting to ledger node");

            match self.dialer.dial(url).await {
                Ok(session) => {
                    info!(attempt = attempt + 1, url = %url, "Connected to ledger node");
                    return Some(session);
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to ledger node {} (attempt {}/{}): {}",
                        url,
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                }
            }
        }

        None
    }

    pub fn session(&self) -> Option<&D::Session> {
        self.active.as_ref()
    }

    /// Drops the active session; the next `ensure_connected` dials again.
    pub fn invalidate(&mut self) {
        if self.active.take().is_some() {
            info!("Dropping ledger node session");
        }
    }
}
