// src/services/mod.rs
//! Business logic and API.

pub mod api_server;
pub mod document_builder;
pub mod issuer;
pub mod state_machine;
