mod client;
mod error;

pub use client::SqlClient;
pub use error::{Error, Result, SqlTransportErrorKind};
