pub mod builder;
pub mod connection;
mod types;

pub use builder::MySqlBuilder;
pub use connection::MySqlTarget;
