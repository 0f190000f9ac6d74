use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(version, about = "GraphQL gateway with request-scoped Postgres contexts")]
pub struct GatewayOptions {
    /// The Postgres connection URL
    #[arg(short = 'd', long, env = "DATABASE_URL")]
    pub database_url: String,

    /// The database schema to expose
    #[arg(short = 's', long = "schema", default_value = "public", env = "GATEWAY_SCHEMA")]
    pub schema_name: String,

    /// Secret used to verify HS256 bearer tokens
    #[arg(long, env = "GATEWAY_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Accepted token audiences (repeatable)
    #[arg(long = "jwt-audience")]
    pub jwt_audiences: Vec<String>,

    /// The claim holding the role to switch to
    #[arg(long, default_value = "role", env = "GATEWAY_JWT_ROLE_CLAIM")]
    pub jwt_role_claim: String,

    /// Role used for requests without a role claim
    #[arg(long, env = "GATEWAY_DEFAULT_ROLE")]
    pub default_role: Option<String>,

    /// Session setting applied to every request, as name=value (repeatable)
    #[arg(long = "pg-setting", value_parser = parse_setting)]
    pub pg_settings: Vec<(String, String)>,

    /// The port to serve the API on
    #[arg(short = 'p', long, default_value = "8080", env = "PORT")]
    pub port: u16,

    /// The maximum number of pooled connections
    #[arg(long, default_value = "10", env = "GATEWAY_MAX_CONNECTIONS")]
    pub max_connections: u32,
}

fn parse_setting(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))
}
