mod connection;
mod provider;
mod query;

pub use connection::*;
pub use provider::*;
pub use query::*;
