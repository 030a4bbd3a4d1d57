//! Small helpers shared by the collectors, the AI layer and the exporters.
//!
//! - **URL checks**: SSRF guard for operator-supplied source endpoints and
//!   link resolution for scraped pages
//! - **Text**: char-boundary-safe truncation and control-character stripping
//!   for text that arrives from remote feeds

mod text;
mod url_validator;

pub use text::{collapse_whitespace, strip_control_chars, truncate_chars};
pub use url_validator::{is_http_url, resolve_link, validate_url, UrlValidationError};
