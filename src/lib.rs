//! Photo Verification System
//!
//! This library provides the core functionality for the photo-verify system,
//! which checks collections of photos against per-item compliance rules
//! using a vision model, with label-based prefiltering and an optional
//! second confirmation pass.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
