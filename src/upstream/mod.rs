//! Upstream fetching: turns a user-supplied URL into a live response

pub mod drive;
pub mod errors;
pub mod resolver;

pub use errors::FetchError;
pub use resolver::SourceResolver;
