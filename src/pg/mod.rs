pub mod postgres;
pub mod provision;
pub mod scope;
pub mod settings;

pub use postgres::{PgClient, PgScope, PgScopeOptions, PgTxGuard};
pub use provision::{provision, Provisioned, ReleaseFuture, ReleaseHandle};
pub use scope::{ConnectionScope, Outcome, ScopeBody, ScopeRequest, ScopedLease};
pub use settings::{request_settings, PgSettings, RoleOptions};
