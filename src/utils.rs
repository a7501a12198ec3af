use std::path::Path;
use tch::{nn, Device};

/// Where the tensors of a run live. Built once and handed to every builder so
/// that all the tensors taking part in an operation share the same device.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    device: Device,
}

impl ExecutionContext {
    pub fn new(cpu: bool) -> Self {
        let device = if cpu {
            Device::Cpu
        } else if tch::utils::has_mps() {
            Device::Mps
        } else {
            Device::cuda_if_available()
        };
        Self { device }
    }

    pub fn cpu() -> Self {
        Self { device: Device::Cpu }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn var_store(&self) -> nn::VarStore {
        nn::VarStore::new(self.device)
    }
}

// Weights are drawn from N(0, 0.02), batch-norm scales from N(1, 0.02) and
// every bias starts at zero.
const INIT_STDEV: f64 = 0.02;

pub(crate) fn normal_init() -> nn::Init {
    nn::Init::Randn { mean: 0., stdev: INIT_STDEV }
}

pub(crate) fn conv_config(padding: i64, dilation: i64) -> nn::ConvConfig {
    nn::ConvConfig {
        padding,
        dilation,
        ws_init: normal_init(),
        bs_init: nn::Init::Const(0.),
        ..Default::default()
    }
}

pub(crate) fn linear_config() -> nn::LinearConfig {
    nn::LinearConfig {
        ws_init: normal_init(),
        bs_init: Some(nn::Init::Const(0.)),
        bias: true,
    }
}

pub(crate) fn batch_norm_config() -> nn::BatchNormConfig {
    nn::BatchNormConfig {
        ws_init: nn::Init::Randn { mean: 1., stdev: INIT_STDEV },
        bs_init: nn::Init::Const(0.),
        ..Default::default()
    }
}

/// Number of scalar trainable parameters held by a var store.
pub fn num_params(vs: &nn::VarStore) -> i64 {
    vs.trainable_variables().iter().map(|t| t.numel() as i64).sum()
}

/// Creates the directory unless it already exists.
pub(crate) fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    if !path.is_dir() {
        std::fs::create_dir_all(path).map_err(|e| {
            let context = format!("error creating {:?}", path.to_string_lossy());
            anyhow::Error::new(e).context(context)
        })?;
    }
    Ok(())
}
