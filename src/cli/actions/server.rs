use crate::api;
use crate::api::handlers::account::state::AppConfig;
use crate::cli::actions::Action;
use anyhow::{Context, Result};
use url::Url;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            trusted_id_servers,
        } => {
            // Fail on a malformed DSN here rather than on first pool use.
            Url::parse(&dsn).context("Invalid database connection string")?;

            let config = AppConfig::new().with_trusted_id_servers(trusted_id_servers);

            api::new(port, dsn, config).await?;
        }
    }

    Ok(())
}
