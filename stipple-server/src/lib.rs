//! HTTP service and setup commands for stipple.

pub mod api;
pub mod cli;
mod error;
pub mod publish;
pub mod serve;
mod state;

pub use api::{create_router, generate_image, GenerationResult, PromptRequest, INFERENCE_STEPS};
pub use error::ApiError;
pub use state::AppState;
