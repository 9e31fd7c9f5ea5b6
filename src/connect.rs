use std::sync::Arc;
use std::thread;

use log::{error, info};

use crate::config::{ReconnectPolicy, TlsOptions};
use crate::error::ConnectError;
use crate::transport::{Connector, Link};

/// Owns the outbound-link concern for one session: the endpoint, its TLS
/// settings and the retry budget. Reconnects always go back to the same
/// endpoint with the same settings.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    endpoint: String,
    tls: Option<TlsOptions>,
    policy: ReconnectPolicy,
    label: String,
}

impl ConnectionManager {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        endpoint: String,
        tls: Option<TlsOptions>,
        policy: ReconnectPolicy,
        label: String,
    ) -> Self {
        Self {
            connector,
            endpoint,
            tls,
            policy,
            label,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One connection attempt, no retries.
    pub fn connect(&self) -> Result<Box<dyn Link>, ConnectError> {
        self.connector.open(&self.endpoint, self.tls.as_ref())
    }

    /// Bounded retry: up to `max_attempts` attempts with a blocking sleep
    /// of `delay` after each failure except the last. Returns the fresh
    /// link and the number of attempts it took.
    pub fn reconnect(&self) -> Result<(Box<dyn Link>, u32), ConnectError> {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            match self.connect() {
                Ok(link) => {
                    info!(
                        "<{}> connected to {} (attempt {}/{})",
                        self.label, self.endpoint, attempt, max_attempts
                    );
                    return Ok((link, attempt));
                }
                Err(e) => {
                    let remaining = max_attempts - attempt;
                    error!(
                        "<{}> connection to {} failed: {}. {} attempts remaining",
                        self.label, self.endpoint, e, remaining
                    );
                    if remaining > 0 {
                        thread::sleep(self.policy.delay);
                    }
                }
            }
        }

        Err(ConnectError::Exhausted {
            attempts: max_attempts,
        })
    }
}
