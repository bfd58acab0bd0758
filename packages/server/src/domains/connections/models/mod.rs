mod connection;

pub use connection::{Connection, ConnectionSettings, ConnectionStatus};
