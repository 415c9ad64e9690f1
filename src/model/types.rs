use serde::{Deserialize, Serialize};

/// Body of `POST /generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f64>,
    pub top_k: Option<usize>,
}

impl GenerateRequest {
    /// Fills the fields the caller left out from `defaults`.
    pub fn params(&self, defaults: &GenerationParams) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_tokens.unwrap_or(defaults.max_new_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_k: self.top_k.or(defaults.top_k),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub completion: String,
}

/// Body of `POST /run`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub output: String,
}

/// Sampling controls handed to a [`CausalLm`](super::CausalLm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Upper bound on tokens appended after the prompt. Zero generates nothing.
    pub max_new_tokens: usize,
    /// Logit divisor before sampling. Values `<= 0` select greedy decoding.
    pub temperature: f64,
    /// Restricts sampling to the `k` most likely tokens when set.
    pub top_k: Option<usize>,
}

impl GenerationParams {
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}

/// Decoded output of one generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
}
