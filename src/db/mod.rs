pub mod commitments;
pub mod context;
pub mod domains;
pub mod mail;
pub mod models;
pub mod project_service;
pub mod projects;
pub mod services;

pub use context::DbContext;
