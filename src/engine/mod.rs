//! Engine: persistence, authorization and the command-line surface

pub mod arg_parser;
pub mod auth;
pub mod cli;
pub mod db_ops;
pub mod progress;

pub use arg_parser::{Cli, Commands, ConnectionCommand};
pub use auth::{Authorizer, OwnerOnly, RejectAll};
pub use cli::handle_run;
pub use db_ops::{DbPool, IngestWriter, PooledConnection, ScanLease, ingest, open_db};
