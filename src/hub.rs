//! # HuggingFace Hub Access
//!
//! Both speech models are fetched from the HuggingFace Hub at startup and
//! cached on disk by `hf-hub`, so only the first start needs the network.
//!
//! ## Environment:
//! - `HF_TOKEN`: token for gated or private repositories
//! - `HF_HUB_CACHE` / `HF_HOME`: where downloaded files are cached

use anyhow::{anyhow, Result};
use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use std::path::PathBuf;

/// Build an API client from the standard HuggingFace environment variables.
pub fn api() -> Result<Api> {
    let mut builder = ApiBuilder::new().with_progress(false);

    match std::env::var("HF_TOKEN") {
        Ok(token) => {
            tracing::debug!("Using HF token (length: {})", token.len());
            builder = builder.with_token(Some(token));
        }
        Err(_) => {
            tracing::debug!("No HF_TOKEN set, proceeding without authentication");
            builder = builder.with_token(None);
        }
    }

    if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
        tracing::debug!("Using hub cache dir: {}", cache_dir);
        builder = builder.with_cache_dir(cache_dir.into());
    } else if let Ok(hf_home) = std::env::var("HF_HOME") {
        let cache_path = PathBuf::from(hf_home).join("hub");
        tracing::debug!("Using hub cache dir from HF_HOME: {:?}", cache_path);
        builder = builder.with_cache_dir(cache_path);
    }

    match builder.build() {
        Ok(api) => Ok(api),
        Err(e) => {
            tracing::error!("ApiBuilder failed: {}, trying fallback to Api::new()", e);
            Api::new().map_err(|e2| {
                anyhow!(
                    "Could not create a HuggingFace API client. ApiBuilder error: {}. Api::new() error: {}",
                    e,
                    e2
                )
            })
        }
    }
}

/// Download (or find in cache) one file of a repository.
pub async fn fetch(repo: &ApiRepo, repo_name: &str, file: &str) -> Result<PathBuf> {
    match repo.get(file).await {
        Ok(path) => {
            tracing::debug!("{} from {} at {:?}", file, repo_name, path);
            Ok(path)
        }
        Err(e) => Err(anyhow!("Failed to download {} from {}: {}", file, repo_name, e)),
    }
}

/// Fetch the preferred weights file, falling back to the other common format.
///
/// Fine-tuned checkpoints on the Hub are published as either
/// `model.safetensors` or `pytorch_model.bin`, sometimes only one of them.
pub async fn fetch_weights(repo: &ApiRepo, repo_name: &str, preferred: &str) -> Result<PathBuf> {
    match fetch(repo, repo_name, preferred).await {
        Ok(path) => Ok(path),
        Err(first) => {
            let alternative = if preferred.ends_with(".safetensors") {
                "pytorch_model.bin"
            } else {
                "model.safetensors"
            };
            tracing::warn!("{}; trying {}", first, alternative);
            fetch(repo, repo_name, alternative).await
        }
    }
}

/// Open a weights file with the loader matching its format.
pub fn var_builder(
    weights: &std::path::Path,
    dtype: candle_core::DType,
    device: &candle_core::Device,
) -> Result<candle_nn::VarBuilder<'static>> {
    let is_safetensors = weights
        .extension()
        .is_some_and(|ext| ext == "safetensors");

    let vb = if is_safetensors {
        // SAFETY: the file is owned by the hub cache and not modified while mapped.
        unsafe { candle_nn::VarBuilder::from_mmaped_safetensors(&[weights], dtype, device)? }
    } else {
        candle_nn::VarBuilder::from_pth(weights, dtype, device)?
    };
    Ok(vb)
}
