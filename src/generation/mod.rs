pub mod client;
pub mod error;
pub mod gemini;

pub use client::GenerationClient;
pub use error::GenerationError;
pub use gemini::GeminiClient;
