//! Persistence layer: entity models, schema bootstrap, and the DAO seam.

pub mod dao;
pub mod models;
pub mod schema;
