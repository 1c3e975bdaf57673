use crate::api;
use crate::api::handlers::auth::AuthConfig;
use crate::cli::actions::Action;
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            access_secret,
            refresh_secret,
            base_url,
            cookie_domain,
        } => {
            let mut config = AuthConfig::new(base_url, access_secret, refresh_secret);
            if let Some(domain) = cookie_domain {
                config = config.with_cookie_domain(domain);
            }

            api::new(port, dsn, config).await?;
        }
    }

    Ok(())
}
