//! Checkpoints.
//!
//! A checkpoint blob holds the named tensors of one network, sorted by name.
//! Networks sharing a var store, like the palette encoder and decoder, are
//! stored in separate blobs keyed by their path prefix.
use crate::error::{check_same_size, Error};
use crate::utils::ensure_dir;
use std::path::{Path, PathBuf};
use tch::{nn, Tensor};

pub const CHECKPOINT_EXTENSION: &str = "ot";

/// `<save_dir>/<loss_combination>/sL1<lambda_sl1>_KL<lambda_kl>`
pub fn checkpoint_dir<P: AsRef<Path>>(
    save_dir: P,
    loss_combination: &str,
    lambda_sl1: f64,
    lambda_kl: f64,
) -> PathBuf {
    save_dir.as_ref().join(loss_combination).join(format!("sL1{lambda_sl1:?}_KL{lambda_kl:?}"))
}

fn prefixed_variables(vs: &nn::VarStore, prefix: &str) -> Vec<(String, Tensor)> {
    let prefix = format!("{prefix}.");
    let mut named: Vec<(String, Tensor)> = vs
        .variables()
        .into_iter()
        .filter_map(|(name, tensor)| name.strip_prefix(&prefix).map(|n| (n.to_string(), tensor)))
        .collect();
    named.sort_by(|(a, _), (b, _)| a.cmp(b));
    named
}

/// Saves the variables under `prefix`, with the prefix stripped from their names.
pub fn save_prefixed<P: AsRef<Path>>(vs: &nn::VarStore, prefix: &str, path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let named = prefixed_variables(vs, prefix);
    if named.is_empty() {
        anyhow::bail!("no variables under {prefix}")
    }
    Tensor::save_multi(named.as_slice(), path)?;
    tracing::debug!(prefix, path = %path.display(), tensors = named.len(), "saved checkpoint blob");
    Ok(())
}

/// Loads a blob written by [`save_prefixed`] back into the variables under `prefix`.
pub fn load_prefixed<P: AsRef<Path>>(vs: &nn::VarStore, prefix: &str, path: P) -> anyhow::Result<()> {
    let loaded = Tensor::load_multi_with_device(path.as_ref(), vs.device())?;
    for (name, mut var) in prefixed_variables(vs, prefix) {
        let (_, src) = loaded
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| Error::MissingParameter(format!("{prefix}.{name}")))?;
        check_same_size("checkpoint parameter", &var, src)?;
        tch::no_grad(|| var.f_copy_(src))?;
    }
    Ok(())
}
