//! Postgres access: pool lifecycle, the blocking adapter, DDL and the
//! staging-table upsert path.

pub mod blocking;
pub mod connection;
pub mod ddl;
pub mod sql;
pub mod upsert;

pub use blocking::BlockingConnectionManager;
pub use connection::{ConnectionManager, PoolSettings, PoolStats, bind_all};
pub use ddl::create_table_statements;
pub use sql::{quote_ident, quote_qualified};
pub use upsert::{BulkUpsertStore, UpsertOptions};
