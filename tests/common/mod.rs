#![allow(dead_code)]

use std::{str::FromStr, sync::Arc};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use parking_lot::Mutex;
use tokenizers::Tokenizer;
use tower::ServiceExt;

use causal_lm_service::{
    AppConfig, CausalLm, GenerationParams, Pipeline, ServiceError, build_router,
};

pub const UNK: u32 = 0;
pub const BOS: u32 = 1;
pub const EOS: u32 = 2;

/// Word-level vocabulary split on whitespace; decoding joins words with spaces.
const TOKENIZER_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 0, "content": "<unk>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 1, "content": "<s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 2, "content": "</s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {
      "<unk>": 0, "<s>": 1, "</s>": 2,
      "hello": 3, "world": 4, "the": 5, "quick": 6, "brown": 7,
      "fox": 8, "jumps": 9, "over": 10, "lazy": 11, "dog": 12,
      "once": 13, "upon": 14, "a": 15, "time": 16
    },
    "unk_token": "<unk>"
  }
}"#;

pub fn test_tokenizer() -> Tokenizer {
    Tokenizer::from_str(TOKENIZER_JSON).expect("fixture tokenizer parses")
}

/// Appends a fixed continuation, truncated to `max_new_tokens`, and records
/// the parameters of every call.
pub struct ScriptedLm {
    continuation: Vec<u32>,
    calls: Mutex<Vec<GenerationParams>>,
}

impl ScriptedLm {
    pub fn new(continuation: Vec<u32>) -> Self {
        Self {
            continuation,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<GenerationParams> {
        self.calls.lock().clone()
    }
}

impl CausalLm for ScriptedLm {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<u32>, ServiceError> {
        self.calls.lock().push(*params);
        let mut output = input_ids.to_vec();
        output.extend(self.continuation.iter().take(params.max_new_tokens));
        Ok(output)
    }
}

/// Continues the prompt by repeating its last token, so each request's output
/// depends only on its own input.
pub struct RepeatLastLm;

impl CausalLm for RepeatLastLm {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<u32>, ServiceError> {
        let mut output = input_ids.to_vec();
        if let Some(&last) = input_ids.last() {
            output.extend(std::iter::repeat(last).take(params.max_new_tokens));
        }
        Ok(output)
    }
}

pub struct FailingLm;

impl CausalLm for FailingLm {
    fn generate(
        &self,
        _input_ids: &[u32],
        _params: &GenerationParams,
    ) -> Result<Vec<u32>, ServiceError> {
        Err(ServiceError::Inference("CUDA out of memory".into()))
    }
}

pub fn router_with(model: Arc<dyn CausalLm>) -> Router {
    let pipeline = Pipeline::new(test_tokenizer(), model);
    build_router(Arc::new(AppConfig::default()), Arc::new(pipeline))
}

pub async fn post_json(router: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}
