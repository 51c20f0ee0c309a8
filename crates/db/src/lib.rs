pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_single, DbPool};
