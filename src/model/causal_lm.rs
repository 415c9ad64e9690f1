use crate::{error::ServiceError, model::GenerationParams};

/// A loaded causal language model.
///
/// `generate` is a blocking call. It receives the encoded prompt and returns
/// the prompt ids followed by every newly generated id, so decoding the result
/// yields the prompt prefix plus the continuation. Implementations must append
/// at most `params.max_new_tokens` ids.
pub trait CausalLm: Send + Sync {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<u32>, ServiceError>;
}
