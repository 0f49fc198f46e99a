mod config;
mod error;

pub use config::{AccountCredentials, ClientConfig};
pub use error::ClientError;

pub type ClientResult<T> = Result<T, ClientError>;
