pub mod configs;
pub mod connections;
