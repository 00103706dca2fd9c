/// Data processor library
///
/// Consumes car requests from the request topic, applies them to storage and
/// publishes one response per request on the response topic.
pub mod config;
pub mod error;
pub mod processor;
pub mod storage;

pub use config::Config;
pub use error::{ProcessorError, RequestError};
pub use processor::{ProcessorSettings, RequestProcessor};
