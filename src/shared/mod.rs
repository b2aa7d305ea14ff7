//! Shared models used by every pipeline stage.

pub mod models;
