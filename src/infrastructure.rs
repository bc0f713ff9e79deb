//! Infrastructure layer: configuration, logging, pacing and the concrete
//! HTTP session backend with its HTML inspector.

pub mod config;
pub mod html_extractor;
pub mod http_session;
pub mod logging;
pub mod pacing;
pub mod parsing_error;

pub use config::{AppConfig, ConfigError};
pub use html_extractor::{PageInspector, PageSelectors};
pub use http_session::{HttpSession, HttpSessionFactory};
pub use logging::{init_logging, init_logging_with_config};
pub use pacing::Pacing;
pub use parsing_error::ParsingError;
