pub mod configs;
pub mod connections;
pub mod health;
pub mod jobs;
