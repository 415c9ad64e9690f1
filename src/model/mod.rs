mod causal_lm;
mod loader;
mod pipeline;
mod types;

#[cfg(feature = "tch-backend")]
pub mod tch_backend;

pub use causal_lm::CausalLm;
pub use loader::{resolve_eos_token_id, resolve_model_path};
pub use pipeline::Pipeline;
pub use types::{
    GenerateRequest, GenerateResponse, Generation, GenerationParams, RunRequest, RunResponse,
};
