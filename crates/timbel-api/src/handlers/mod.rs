//! Request handlers organized by resource.

pub mod health;
pub mod logs;
pub mod pipelines;
pub mod reports;
pub mod stages;
