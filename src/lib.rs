//! docforge document tools service
//!
//! Merges, splits and compresses PDFs and converts between images, PDF and
//! Word. Every request runs in its own workspace, which is removed on failure
//! or shortly after the result has been downloaded.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use handlers::create_router;
pub use services::{CleanupScheduler, JobService};
