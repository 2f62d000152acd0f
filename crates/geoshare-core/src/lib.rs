//! GeoShare Core: domain models, repository traits and the shared
//! error type.
//!
//! Everything here is storage-agnostic. The SurrealDB implementations
//! live in `geoshare-db`; permission resolution, indexing and caching
//! live in `geoshare-access`.

pub mod error;
pub mod models;
pub mod repository;

pub use error::{GeoshareError, GeoshareResult};
