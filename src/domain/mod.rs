//! Domain layer - models, the persistence seam and its Postgres queries

pub mod models;
pub mod queries;
pub mod store;

#[cfg(test)]
pub mod memory;

pub use queries::PgStore;
pub use store::{Store, StoreError};
