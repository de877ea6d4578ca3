use std::sync::Arc;

pub mod auth;
pub mod categories;
pub mod config;
pub mod constants;
pub mod database;
pub mod expenses;
pub mod extractor;
pub mod formatters;
pub mod link_tokens;
pub mod messaging;
pub mod models;
pub mod stats;
pub mod upload;
pub mod utils;
pub mod whatsapp;

/// Shared handler state. The extraction and messaging backends are injected
/// as capabilities so tests can swap in deterministic fakes.
#[derive(Clone)]
pub struct AppState {
    pub db: database::Db,
    pub config: config::Config,
    pub extractor: Arc<dyn extractor::Extractor>,
    pub messaging: Arc<dyn messaging::MessagingProvider>,
}
