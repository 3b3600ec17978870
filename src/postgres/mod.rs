pub mod builder;
pub mod connection;
mod types;

pub use builder::PostgresBuilder;
pub use connection::PostgresTarget;
