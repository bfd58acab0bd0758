pub mod data;
pub mod models;

pub use models::{Connection, ConnectionSettings, ConnectionStatus};
