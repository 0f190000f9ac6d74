use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use pg_context_gateway::{Gateway, GatewayOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let opts = GatewayOptions::parse();

    tracing::info!("Configuration:");
    tracing::info!("  Database URL: {}", sensitive_url(&opts.database_url));
    tracing::info!("  Schema: {}", opts.schema_name);
    tracing::info!("  JWT secret configured: {}", opts.jwt_secret.is_some());
    tracing::info!("  JWT audiences: {:?}", opts.jwt_audiences);
    tracing::info!("  Default role: {:?}", opts.default_role);
    tracing::info!("  Static settings: {}", opts.pg_settings.len());
    tracing::info!("  Max connections: {}", opts.max_connections);

    let gateway = Gateway::new(opts);
    gateway.run().await?;

    Ok(())
}

fn sensitive_url(url: &str) -> String {
    if let Some(auth_start) = url.find("://") {
        if let Some(auth_end) = url[auth_start + 3..].find('@') {
            let prefix = &url[0..auth_start + 3];
            let suffix = &url[auth_start + 3 + auth_end..];
            return format!("{}***REDACTED***{}", prefix, suffix);
        }
    }
    url.to_string()
}
