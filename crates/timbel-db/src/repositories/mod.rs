//! Store implementations for PostgreSQL.

mod logs;
mod pipeline;

pub use pipeline::PgPipelineStore;
