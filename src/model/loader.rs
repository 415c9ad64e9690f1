use std::{path::PathBuf, sync::Arc};

use tokenizers::{FromPretrainedParameters, Tokenizer};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{CausalLm, Pipeline},
};

/// End-of-sequence spellings tried in order when none is configured.
const EOS_CANDIDATES: &[&str] = &["</s>", "<|endoftext|>", "<eos>", "<|eot_id|>"];

pub(crate) fn load(config: &AppConfig) -> Result<Pipeline, ServiceError> {
    let tokenizer = load_tokenizer(config)?;
    let eos_token_id = resolve_eos_token_id(&tokenizer, config.eos_token.as_deref());
    info!(
        model_id = %config.model_id,
        vocab_size = tokenizer.get_vocab_size(true),
        ?eos_token_id,
        "tokenizer ready"
    );

    let model = load_model(config, eos_token_id)?;
    Ok(Pipeline::new(tokenizer, model))
}

fn load_tokenizer(config: &AppConfig) -> Result<Tokenizer, ServiceError> {
    match config.tokenizer_path.as_deref() {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "loading tokenizer from disk");
            Tokenizer::from_file(path).map_err(|e| ServiceError::Tokenizer(e.to_string()))
        }
        other => {
            if let Some(path) = other {
                warn!(path = %path.display(), "tokenizer file not found, fetching from hub");
            }
            let mut params = FromPretrainedParameters {
                auth_token: config.hf_token.clone(),
                ..Default::default()
            };
            if let Some(revision) = config.revision.clone() {
                params.revision = revision;
            }
            info!(
                model_id = %config.model_id,
                revision = %params.revision,
                "fetching tokenizer"
            );
            Tokenizer::from_pretrained(&config.model_id, Some(params))
                .map_err(|e| ServiceError::Tokenizer(e.to_string()))
        }
    }
}

/// Looks up the end-of-sequence id. An explicitly configured token wins when
/// the vocabulary knows it; otherwise the common spellings are tried.
pub fn resolve_eos_token_id(tokenizer: &Tokenizer, configured: Option<&str>) -> Option<u32> {
    if let Some(token) = configured {
        match tokenizer.token_to_id(token) {
            Some(id) => return Some(id),
            None => warn!(%token, "configured EOS token not in vocabulary"),
        }
    }

    EOS_CANDIDATES
        .iter()
        .find_map(|candidate| tokenizer.token_to_id(candidate))
}

/// Locates the TorchScript module. A `MODEL_PATH` that exists on disk is used
/// as-is; otherwise it names a file inside the `MODEL_ID` repository, which
/// `fetch` downloads (or finds in the hub cache) and returns the local path of.
pub fn resolve_model_path<F>(config: &AppConfig, fetch: F) -> Result<PathBuf, ServiceError>
where
    F: FnOnce(&str) -> Result<PathBuf, ServiceError>,
{
    if config.model_path.exists() {
        return Ok(config.model_path.clone());
    }

    let raw = config.model_path.to_string_lossy().replace('\\', "/");
    let filename = raw.trim_start_matches("./");
    info!(
        model_id = %config.model_id,
        %filename,
        "model file not on disk, resolving from hub"
    );
    fetch(filename)
}

#[cfg(feature = "tch-backend")]
fn fetch_from_hub(config: &AppConfig, filename: &str) -> Result<PathBuf, ServiceError> {
    use hf_hub::{Repo, RepoType, api::sync::ApiBuilder};

    let hub_error = |e: hf_hub::api::sync::ApiError| {
        ServiceError::Hub(format!("{}/{filename}: {e}", config.model_id))
    };

    let api = ApiBuilder::new()
        .with_token(config.hf_token.clone())
        .build()
        .map_err(hub_error)?;
    let repo = match config.revision.clone() {
        Some(revision) => {
            Repo::with_revision(config.model_id.clone(), RepoType::Model, revision)
        }
        None => Repo::model(config.model_id.clone()),
    };

    api.repo(repo).get(filename).map_err(hub_error)
}

#[cfg(feature = "tch-backend")]
fn load_model(
    config: &AppConfig,
    eos_token_id: Option<u32>,
) -> Result<Arc<dyn CausalLm>, ServiceError> {
    use crate::model::tch_backend::TorchScriptLm;

    let model_path =
        resolve_model_path(config, |filename| fetch_from_hub(config, filename))?;
    info!(
        path = %model_path.display(),
        device = ?config.device,
        "loading TorchScript module"
    );
    let model = TorchScriptLm::load(&model_path, config.device, eos_token_id)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "tch-backend"))]
fn load_model(
    _config: &AppConfig,
    _eos_token_id: Option<u32>,
) -> Result<Arc<dyn CausalLm>, ServiceError> {
    Err(ServiceError::BackendUnavailable)
}
