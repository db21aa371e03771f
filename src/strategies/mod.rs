pub mod dto;
pub mod handlers;
mod prompt;

pub use handlers::router;
