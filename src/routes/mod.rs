//! HTTP API routes

pub mod auth;
pub mod batches;
pub mod exports;
pub mod images;
