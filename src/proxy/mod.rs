//! Fetch-normalize-cache-stream pipeline and its HTTP surface

pub mod disposition;
pub mod error;
pub mod pipeline;
pub mod routes;

pub use pipeline::Pipeline;
pub use routes::build_router;
