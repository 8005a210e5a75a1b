//! Taskhub server library
//!
//! Exposes the server components for the binary and for integration tests.

pub mod api;
pub mod auth;
pub mod authority;
pub mod blob;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod ws;

use anyhow::Result;
use blob::{DynBlobStore, LocalBlobStore};
use db::DynStore;
use std::sync::Arc;
use ws::{Realtime, RoomHub};

/// Wires services around the given store and blob storage and starts the
/// realtime hub.
pub fn build_state(config: state::Config, store: DynStore, blobs: DynBlobStore) -> Result<state::AppState> {
    let realtime = Realtime::uninitialized();
    realtime.init(Arc::new(RoomHub::new()))?;
    Ok(state::AppState::new(config, store, blobs, realtime))
}

/// Create and configure the server application
pub async fn create_app(config: state::Config) -> Result<(axum::Router, state::AppState)> {
    let store = db::open_store(config.database_url.as_deref(), config.db_max_connections).await?;
    let blobs: DynBlobStore = Arc::new(LocalBlobStore::new(
        &config.upload_dir,
        config.public_base_url.clone(),
    ));
    let app_state = build_state(config, store, blobs)?;
    let router = api::create_router(app_state.clone());
    Ok((router, app_state))
}
