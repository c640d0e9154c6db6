//! Default security provider driven by [`SecurityConfig`]

use async_trait::async_trait;
use netweave_domain::{NetworkError, NetworkResult, Request, SecurityConfig, SecurityLevel};
use parking_lot::RwLock;
use tracing::warn;

use crate::ports::SecurityProvider;

/// Applies the configured [`SecurityLevel`] to outgoing requests.
///
/// - `None`: everything passes
/// - `Standard`: header names and values must not contain control
///   characters (no header injection)
/// - `Strict`: additionally, absolute endpoints and base overrides must use
///   https
///
/// Payloads pass through unencrypted.
#[derive(Debug, Default)]
pub struct PolicySecurityProvider {
    config: RwLock<SecurityConfig>,
}

impl PolicySecurityProvider {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config: RwLock::new(config) }
    }

    pub fn level(&self) -> SecurityLevel {
        self.config.read().level
    }
}

#[async_trait]
impl SecurityProvider for PolicySecurityProvider {
    async fn validate(&self, request: &Request) -> NetworkResult<()> {
        let level = self.level();
        if level == SecurityLevel::None {
            return Ok(());
        }

        for (name, value) in request.headers().iter() {
            if name.is_empty() || name.chars().any(|c| c.is_control() || c == ':') {
                return Err(reject(format!("invalid header name {name:?}")));
            }
            if value.chars().any(|c| c == '\r' || c == '\n' || c == '\0') {
                return Err(reject(format!("control characters in header {name}")));
            }
        }

        if level == SecurityLevel::Strict {
            let targets = request.base_override().into_iter().chain(
                request.is_absolute().then(|| request.endpoint()),
            );
            for target in targets {
                if !target.to_ascii_lowercase().starts_with("https://") {
                    return Err(reject(format!("{target} is not https")));
                }
            }
        }
        Ok(())
    }

    fn configure(&self, config: &SecurityConfig) {
        *self.config.write() = config.clone();
    }
}

fn reject(message: String) -> NetworkError {
    warn!(%message, "request refused by security policy");
    NetworkError::Security(message)
}
