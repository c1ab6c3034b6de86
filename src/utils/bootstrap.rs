//! Bootstrap utilities for signup binaries.
//!
//! Shared process start-up: logging first, then storage.

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LOG_ENV_VAR};
use crate::handlers::SignupService;
use crate::storage::{self, StorageError};

/// Filter used when `SIGNUP_LOG` is unset or unparsable.
const DEFAULT_LOG_FILTER: &str = "info";

/// Initialize tracing with the SIGNUP_LOG environment variable.
///
/// Defaults to "info" level if SIGNUP_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to the configured database and build the signup service.
///
/// Tables are created if absent and verified against their schemas. A
/// mismatch is logged and returned; the process should exit rather than
/// serve requests.
pub async fn open_service(config: &Config) -> Result<SignupService, StorageError> {
    let pool = storage::connect(&config.storage).await?;

    let (limiter, members) = match storage::init_storage(&pool).await {
        Ok(stores) => stores,
        Err(e @ StorageError::SchemaMismatch { .. }) => {
            error!(error = %e, "Refusing to start against an unexpected database");
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    info!(path = %config.storage.path, "Storage ready");
    Ok(SignupService::new(limiter, members, config.limits.clone()))
}
