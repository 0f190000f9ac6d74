pub mod context;
pub mod plugin;
pub mod resolvers;
pub mod schema;
pub mod types;

pub use context::{ContextExtras, ContextOptions, PgRequestContext, RequestContext, SettingsSource};
pub use plugin::{ContextLifecycle, ContextPlugin};
pub use resolvers::QueryRoot;
pub use schema::{create_schema, GatewayConfig, GatewaySchema, SchemaNamespace};
pub use types::*;
