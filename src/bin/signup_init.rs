//! signup-init: Storage bootstrap
//!
//! Creates the `members` and `rate_limits` tables if they are missing and
//! verifies existing ones against their declared schemas. Run before
//! starting request workers; a non-zero exit means the database is not the
//! one this code expects.
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - SIGNUP_CONFIG: path to a YAML config file (optional)
//! - SIGNUP__STORAGE__PATH: database file (default: signup.db)
//! - SIGNUP_LOG: tracing filter (default: info)

use tracing::info;

use signup_server::config::Config;
use signup_server::utils::bootstrap::{init_tracing, open_service};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    let service = open_service(&config).await?;
    let members = service.members().count().await?;
    let counters = service.limiter().counters().await?;

    info!(
        members,
        counter_rows = counters.len(),
        joins_per_minute = config.limits.joins_per_minute,
        checks_per_minute = config.limits.checks_per_minute,
        "signup-init complete"
    );

    Ok(())
}
