use std::path::Path;

use parking_lot::Mutex;
use tch::{CModule, Device, IValue, Kind, TchError, Tensor, no_grad};

use crate::{
    error::ServiceError,
    model::{CausalLm, GenerationParams},
};

/// A causal LM exported with `torch.jit.trace`/`torch.jit.script`.
///
/// The module takes `input_ids` of shape `[1, seq_len]` and returns either the
/// logits `[1, seq_len, vocab]` or a tuple whose first element is the logits.
pub struct TorchScriptLm {
    device: Device,
    eos_token_id: Option<u32>,
    // CModule is not Sync.
    module: Mutex<CModule>,
}

impl TorchScriptLm {
    pub fn load(
        module_path: &Path,
        device: Device,
        eos_token_id: Option<u32>,
    ) -> Result<Self, ServiceError> {
        if !module_path.exists() {
            return Err(ServiceError::MissingArtifact(
                module_path.display().to_string(),
            ));
        }
        let mut module = CModule::load_on_device(module_path, device).map_err(inference)?;
        module.set_eval();

        Ok(Self {
            device,
            eos_token_id,
            module: Mutex::new(module),
        })
    }

    fn last_logits(&self, module: &CModule, context: &[i64]) -> Result<Tensor, ServiceError> {
        let input = Tensor::from_slice(context)
            .f_reshape([1, context.len() as i64])
            .map_err(inference)?
            .to(self.device);

        let output = module
            .forward_is(&[IValue::Tensor(input)])
            .map_err(inference)?;

        let logits = match output {
            IValue::Tensor(t) => t,
            IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                IValue::Tensor(t) => t.shallow_clone(),
                _ => {
                    return Err(ServiceError::Inference(
                        "expected tensor as first tuple element".into(),
                    ));
                }
            },
            _ => {
                return Err(ServiceError::Inference(
                    "unexpected model output format".into(),
                ));
            }
        };

        // [1, seq_len, vocab] -> [vocab]
        logits
            .f_select(1, -1)
            .and_then(|t| t.f_squeeze_dim(0))
            .map_err(inference)
    }
}

impl CausalLm for TorchScriptLm {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<u32>, ServiceError> {
        if params.max_new_tokens == 0 {
            return Ok(input_ids.to_vec());
        }

        no_grad(|| {
            let module = self.module.lock();
            decode(input_ids, params, self.eos_token_id, |context| {
                self.last_logits(&module, context)
            })
        })
    }
}

/// Autoregressive loop: asks `next_logits` for the distribution over the
/// following token, samples it and appends it until the budget is spent or
/// EOS is produced. Returns the prompt ids followed by the generated ids.
fn decode<F>(
    input_ids: &[u32],
    params: &GenerationParams,
    eos_token_id: Option<u32>,
    mut next_logits: F,
) -> Result<Vec<u32>, ServiceError>
where
    F: FnMut(&[i64]) -> Result<Tensor, ServiceError>,
{
    let mut output: Vec<u32> = input_ids.to_vec();
    if params.max_new_tokens == 0 {
        return Ok(output);
    }

    let mut context: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
    if context.is_empty() {
        // The module needs at least one position to attend to.
        context.push(eos_token_id.unwrap_or(0) as i64);
    }

    for _ in 0..params.max_new_tokens {
        let logits = next_logits(&context)?;
        let next = sample(&logits, params)?;

        context.push(next);
        output.push(next as u32);

        if eos_token_id == Some(next as u32) {
            break;
        }
    }

    Ok(output)
}

/// Picks the next token id from a `[vocab]` logits vector.
fn sample(logits: &Tensor, params: &GenerationParams) -> Result<i64, ServiceError> {
    let logits = logits.f_to_kind(Kind::Float).map_err(inference)?;
    if params.is_greedy() {
        return argmax(&logits);
    }

    let scaled = logits.f_div_scalar(params.temperature).map_err(inference)?;
    // Temperatures small enough to overflow the scaled logits degrade to greedy.
    let peak = scaled
        .f_max()
        .and_then(|t| t.f_double_value(&[]))
        .map_err(inference)?;
    if !peak.is_finite() {
        return argmax(&logits);
    }

    let scaled = match params.top_k {
        Some(k) if k > 0 => {
            let vocab = scaled.size().first().copied().unwrap_or(0);
            let k = (k as i64).min(vocab);
            top_k_mask(&scaled, k).map_err(inference)?
        }
        _ => scaled,
    };

    scaled
        .f_softmax(0, Kind::Float)
        .and_then(|probs| probs.f_multinomial(1, true))
        .and_then(|picked| picked.f_int64_value(&[0]))
        .map_err(inference)
}

fn argmax(logits: &Tensor) -> Result<i64, ServiceError> {
    logits
        .f_argmax(0, false)
        .and_then(|t| t.f_int64_value(&[]))
        .map_err(inference)
}

/// Sets every logit below the `k`-th largest to negative infinity.
fn top_k_mask(scaled: &Tensor, k: i64) -> Result<Tensor, TchError> {
    let (values, _) = scaled.f_topk(k, 0, true, true)?;
    let threshold = values.f_double_value(&[k - 1])?;
    let below = scaled.f_lt(threshold)?;
    scaled.f_masked_fill(&below, f64::NEG_INFINITY)
}

fn inference(err: TchError) -> ServiceError {
    ServiceError::Inference(err.to_string())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    const LOGITS: [f32; 5] = [0.1, 2.5, -1.0, 0.7, 1.9];
    const PEAK: i64 = 1;

    fn params(temperature: f64, top_k: Option<usize>, max_new_tokens: usize) -> GenerationParams {
        GenerationParams {
            max_new_tokens,
            temperature,
            top_k,
        }
    }

    /// Logits peaking at `id`.
    fn peaked(id: usize) -> Tensor {
        let mut values = [0.0f32; 5];
        values[id] = 10.0;
        Tensor::from_slice(&values)
    }

    #[test]
    fn greedy_takes_argmax() {
        let logits = Tensor::from_slice(&LOGITS);

        assert_eq!(sample(&logits, &params(0.0, None, 1)).unwrap(), PEAK);
        assert_eq!(sample(&logits, &params(-0.5, Some(3), 1)).unwrap(), PEAK);
    }

    #[test]
    fn top_one_matches_argmax_at_any_temperature() {
        let logits = Tensor::from_slice(&LOGITS);

        for temperature in [0.1, 0.7, 1.0, 5.0] {
            let picked = sample(&logits, &params(temperature, Some(1), 1)).unwrap();
            assert_eq!(picked, PEAK, "temperature {temperature}");
        }
    }

    #[test]
    fn top_k_restricts_candidates() {
        let logits = Tensor::from_slice(&LOGITS);

        for _ in 0..50 {
            let picked = sample(&logits, &params(2.0, Some(2), 1)).unwrap();
            assert!(picked == 1 || picked == 4, "picked {picked}");
        }
    }

    #[test]
    fn top_k_larger_than_vocab_is_clamped() {
        let logits = Tensor::from_slice(&LOGITS);

        let picked = sample(&logits, &params(1.0, Some(1_000), 1)).unwrap();
        assert!((0..LOGITS.len() as i64).contains(&picked));
    }

    #[test]
    fn tiny_temperature_falls_back_to_greedy() {
        let logits = Tensor::from_slice(&LOGITS);

        assert_eq!(sample(&logits, &params(1e-45, None, 1)).unwrap(), PEAK);
    }

    #[test]
    fn zero_budget_returns_prompt_without_forward_pass() {
        let calls = RefCell::new(0);
        let output = decode(&[3, 4], &params(0.0, None, 0), Some(2), |_| {
            *calls.borrow_mut() += 1;
            Ok(peaked(1))
        })
        .unwrap();

        assert_eq!(output, vec![3, 4]);
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn stops_after_eos() {
        let output = decode(&[3], &params(0.0, None, 10), Some(2), |context| {
            // Two regular tokens, then EOS.
            Ok(if context.len() < 3 { peaked(4) } else { peaked(2) })
        })
        .unwrap();

        assert_eq!(output, vec![3, 4, 4, 2]);
    }

    #[test]
    fn respects_token_budget() {
        let output = decode(&[1], &params(0.0, None, 3), None, |_| Ok(peaked(3))).unwrap();

        assert_eq!(output, vec![1, 3, 3, 3]);
    }

    #[test]
    fn empty_prompt_is_seeded_with_eos() {
        let seen = RefCell::new(Vec::new());
        let output = decode(&[], &params(0.0, None, 1), Some(2), |context| {
            seen.borrow_mut().push(context.to_vec());
            Ok(peaked(3))
        })
        .unwrap();

        assert_eq!(seen.borrow()[0], vec![2]);
        assert_eq!(output, vec![3]);
    }

    #[test]
    fn empty_prompt_without_eos_is_seeded_with_zero() {
        let seen = RefCell::new(Vec::new());
        decode(&[], &params(0.0, None, 1), None, |context| {
            seen.borrow_mut().push(context.to_vec());
            Ok(peaked(3))
        })
        .unwrap();

        assert_eq!(seen.borrow()[0], vec![0]);
    }

    #[test]
    fn logits_failure_propagates() {
        let result = decode(&[1], &params(0.0, None, 4), None, |_| {
            Err(ServiceError::Inference("forward failed".into()))
        });

        assert!(matches!(result, Err(ServiceError::Inference(_))));
    }
}
