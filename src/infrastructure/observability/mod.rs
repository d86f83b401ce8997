mod error_sanitizer;
mod init_tracing;
mod tracing_config;

pub use error_sanitizer::sanitize_error;
pub use init_tracing::init_tracing;
pub use tracing_config::TracingConfig;
