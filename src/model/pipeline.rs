use std::sync::Arc;

use tokenizers::Tokenizer;
use tokio::task;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{CausalLm, Generation, GenerationParams, loader},
};

/// The tokenizer and model pair shared by every request handler.
///
/// Built once at startup and only read afterwards.
#[derive(Clone)]
pub struct Pipeline {
    tokenizer: Arc<Tokenizer>,
    model: Arc<dyn CausalLm>,
}

impl Pipeline {
    pub fn new(tokenizer: Tokenizer, model: Arc<dyn CausalLm>) -> Self {
        Self {
            tokenizer: Arc::new(tokenizer),
            model,
        }
    }

    /// Resolves and loads the configured tokenizer and model.
    pub fn load(config: &AppConfig) -> Result<Self, ServiceError> {
        loader::load(config)
    }

    /// Runs one generation on a blocking worker thread.
    pub async fn generate(
        &self,
        prompt: String,
        params: GenerationParams,
    ) -> Result<Generation, ServiceError> {
        let tokenizer = self.tokenizer.clone();
        let model = self.model.clone();

        task::spawn_blocking(move || {
            generate_blocking(&tokenizer, model.as_ref(), &prompt, &params)
        })
        .await
        .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }
}

fn generate_blocking(
    tokenizer: &Tokenizer,
    model: &dyn CausalLm,
    prompt: &str,
    params: &GenerationParams,
) -> Result<Generation, ServiceError> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
    let input_ids = encoding.get_ids();

    let output_ids = model.generate(input_ids, params)?;
    let generated_tokens = output_ids.len().saturating_sub(input_ids.len());

    let text = tokenizer
        .decode(&output_ids, true)
        .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

    Ok(Generation {
        text,
        prompt_tokens: input_ids.len(),
        generated_tokens,
    })
}
