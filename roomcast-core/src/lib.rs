pub mod bus;
pub mod config;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod models;
pub mod room;
pub mod test_helpers;
pub mod users;

pub use config::Config;
pub use error::{Error, Result};
