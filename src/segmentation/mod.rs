use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
mod prompt;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::read_router())
        .merge(handlers::write_router())
}
