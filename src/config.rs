use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::model::GenerationParams;

pub const DEFAULT_MODEL_ID: &str = "mistralai/Mistral-7B-Instruct-v0.2";
pub const DEFAULT_MAX_NEW_TOKENS: usize = 128;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_id: String,
    pub revision: Option<String>,
    pub hf_token: Option<String>,
    pub model_path: PathBuf,
    pub tokenizer_path: Option<PathBuf>,
    pub eos_token: Option<String>,
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_k: Option<usize>,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: None,
            hf_token: None,
            model_path: PathBuf::from("models/model.ts"),
            tokenizer_path: None,
            eos_token: None,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_k: None,
            #[cfg(feature = "tch-backend")]
            device: Device::Cpu,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset or unparseable
    /// values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_addr = parsed("SERVER_ADDR")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.listen_addr);

        let model_id = parsed("MODEL_ID").unwrap_or(defaults.model_id);
        let revision = parsed("MODEL_REVISION");
        let hf_token = parsed("HF_TOKEN");

        let model_path = parsed("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_path);
        let tokenizer_path = parsed("TOKENIZER_PATH").map(PathBuf::from);
        let eos_token = parsed("EOS_TOKEN");

        let max_new_tokens = parse_or(parsed("MAX_NEW_TOKENS"), defaults.max_new_tokens);
        let temperature = parse_or(parsed("TEMPERATURE"), defaults.temperature);
        let top_k = parsed("TOP_K").and_then(|v| v.parse().ok());

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = parsed("DEVICE").unwrap_or_else(|| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            model_id,
            revision,
            hf_token,
            model_path,
            tokenizer_path,
            eos_token,
            max_new_tokens,
            temperature,
            top_k,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }

    /// Generation parameters applied when a request leaves a field out.
    pub fn default_params(&self) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_k: self.top_k,
        }
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, fallback: T) -> T {
    raw.and_then(|v| v.parse().ok()).unwrap_or(fallback)
}

#[cfg(feature = "tch-backend")]
pub(crate) fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA unavailable, falling back to cpu");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
