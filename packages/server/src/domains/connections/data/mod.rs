mod connection;
mod remote;

pub use remote::{list_remote_schemas, list_remote_tables};
