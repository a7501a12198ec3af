//! U-Net Building Blocks
//!
//! Every stage of the colorization U-Net is an instance of the same block,
//! parameterized by a [`UNetBlockConfig`]. Depending on the configuration a
//! block upsamples its input and fuses it with a skip connection, runs a
//! few same-resolution convolutions, normalizes, and finally halves the
//! resolution with a learned depthwise convolution.
use crate::error::check_same_size;
use crate::utils::{batch_norm_config, conv_config, normal_init};
use tch::{nn, nn::Module, Tensor};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Identity,
    Relu,
    LeakyRelu(f64),
    Sigmoid,
}

impl Module for Activation {
    fn forward(&self, xs: &Tensor) -> Tensor {
        match self {
            Activation::Identity => xs.shallow_clone(),
            Activation::Relu => xs.relu(),
            Activation::LeakyRelu(slope) => xs.relu() - (-xs).relu() * *slope,
            Activation::Sigmoid => xs.sigmoid(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UNetBlockConfig {
    pub num_convs: i64,
    pub kernel_size: i64,
    pub dilation: i64,
    /// Stride of the resampling step, used by both downsampling and upsampling.
    pub stride: i64,
    pub activation: Activation,
    /// Activation applied after the last convolution, defaults to `activation`.
    pub last_activation: Option<Activation>,
    /// Apply `activation` to the block input before the first convolution.
    pub pre_activation: bool,
    pub batch_norm: bool,
    pub add_downsample: bool,
    /// Channel count of the skip connection, set for upsampling blocks only.
    pub upsample_skip_channels: Option<i64>,
}

impl Default for UNetBlockConfig {
    fn default() -> Self {
        Self {
            num_convs: 1,
            kernel_size: 3,
            dilation: 1,
            stride: 2,
            activation: Activation::Relu,
            last_activation: None,
            pre_activation: false,
            batch_norm: true,
            add_downsample: false,
            upsample_skip_channels: None,
        }
    }
}

#[derive(Debug)]
struct Upsample {
    up: nn::ConvTranspose2D,
    bridge: nn::Conv2D,
}

#[derive(Debug)]
pub struct UNetBlock {
    upsample: Option<Upsample>,
    convs: Vec<nn::Conv2D>,
    batch_norm: Option<nn::BatchNorm>,
    downsample: Option<nn::Conv2D>,
    pub config: UNetBlockConfig,
}

impl UNetBlock {
    pub fn new(vs: nn::Path, in_channels: i64, out_channels: i64, config: UNetBlockConfig) -> Self {
        let padding = config.dilation * (config.kernel_size - 1) / 2;
        let conv_cfg = conv_config(padding, config.dilation);
        let upsample = config.upsample_skip_channels.map(|skip_channels| {
            let up_cfg = nn::ConvTransposeConfig {
                stride: config.stride,
                padding: 1,
                ws_init: normal_init(),
                bs_init: nn::Init::Const(0.),
                ..Default::default()
            };
            let up = nn::conv_transpose2d(&vs / "up", in_channels, out_channels, 4, up_cfg);
            let bridge = nn::conv2d(&vs / "bridge", skip_channels, out_channels, 3, conv_config(1, 1));
            Upsample { up, bridge }
        });
        let vs_convs = &vs / "convs";
        let convs = (0..config.num_convs)
            .map(|i| {
                // After an upsampling step the convolutions already run at the output width.
                let in_channels =
                    if i == 0 && upsample.is_none() { in_channels } else { out_channels };
                nn::conv2d(&vs_convs / i, in_channels, out_channels, config.kernel_size, conv_cfg)
            })
            .collect();
        let batch_norm = if config.batch_norm {
            Some(nn::batch_norm2d(&vs / "batch_norm", out_channels, batch_norm_config()))
        } else {
            None
        };
        let downsample = if config.add_downsample {
            let down_cfg = nn::ConvConfig {
                stride: config.stride,
                groups: out_channels,
                bias: false,
                ws_init: normal_init(),
                ..Default::default()
            };
            Some(nn::conv2d(&vs / "downsample", out_channels, out_channels, 1, down_cfg))
        } else {
            None
        };
        Self { upsample, convs, batch_norm, downsample, config }
    }

    pub fn forward_t(&self, xs: &Tensor, skip: Option<&Tensor>, train: bool) -> anyhow::Result<Tensor> {
        let activation = self.config.activation;
        let mut xs = match (&self.upsample, skip) {
            (Some(upsample), Some(skip)) => {
                let up = xs.apply(&upsample.up);
                let bridge = skip.apply(&upsample.bridge);
                check_same_size("skip connection", &up, &bridge)?;
                activation.forward(&(up + bridge))
            }
            (None, None) if self.config.pre_activation => activation.forward(xs),
            (None, None) => xs.shallow_clone(),
            (Some(_), None) => anyhow::bail!("upsampling block called without a skip connection"),
            (None, Some(_)) => anyhow::bail!("skip connection passed to a non-upsampling block"),
        };
        let last_activation = self.config.last_activation.unwrap_or(activation);
        let n_convs = self.convs.len();
        for (i, conv) in self.convs.iter().enumerate() {
            let act = if i + 1 == n_convs { last_activation } else { activation };
            xs = act.forward(&xs.apply(conv));
        }
        if let Some(batch_norm) = &self.batch_norm {
            xs = xs.apply_t(batch_norm, train)
        }
        match &self.downsample {
            Some(downsample) => Ok(xs.apply(downsample)),
            None => Ok(xs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn block(in_channels: i64, out_channels: i64, config: UNetBlockConfig) -> (nn::VarStore, UNetBlock) {
        let vs = nn::VarStore::new(Device::Cpu);
        let block = UNetBlock::new(vs.root(), in_channels, out_channels, config);
        (vs, block)
    }

    #[test]
    fn spatial_transforms() {
        let xs = Tensor::randn([2, 8, 16, 16], (Kind::Float, Device::Cpu));

        let (_vs, same) = block(8, 12, UNetBlockConfig { num_convs: 2, ..Default::default() });
        assert_eq!(same.forward_t(&xs, None, true).unwrap().size(), [2, 12, 16, 16]);

        let config = UNetBlockConfig { add_downsample: true, ..Default::default() };
        let (_vs, down) = block(8, 12, config);
        assert_eq!(down.forward_t(&xs, None, true).unwrap().size(), [2, 12, 8, 8]);

        let config = UNetBlockConfig { dilation: 2, num_convs: 3, ..Default::default() };
        let (_vs, dilated) = block(8, 8, config);
        assert_eq!(dilated.forward_t(&xs, None, true).unwrap().size(), [2, 8, 16, 16]);

        let config = UNetBlockConfig { upsample_skip_channels: Some(4), ..Default::default() };
        let (_vs, up) = block(8, 6, config);
        let skip = Tensor::randn([2, 4, 32, 32], (Kind::Float, Device::Cpu));
        assert_eq!(up.forward_t(&xs, Some(&skip), true).unwrap().size(), [2, 6, 32, 32]);
    }

    #[test]
    fn skip_mismatch_is_an_error() {
        let config = UNetBlockConfig { upsample_skip_channels: Some(4), ..Default::default() };
        let (_vs, up) = block(8, 6, config);
        let xs = Tensor::randn([2, 8, 16, 16], (Kind::Float, Device::Cpu));
        // A single pixel skip would silently broadcast if the sizes were not checked.
        let skip = Tensor::randn([2, 4, 1, 1], (Kind::Float, Device::Cpu));
        assert!(up.forward_t(&xs, Some(&skip), true).is_err());
        assert!(up.forward_t(&xs, None, true).is_err());
    }

    #[test]
    fn downsample_is_depthwise_without_bias() {
        let config = UNetBlockConfig { add_downsample: true, ..Default::default() };
        let (vs, _down) = block(3, 5, config);
        let variables = vs.variables();
        assert_eq!(variables["downsample.weight"].size(), [5, 1, 1, 1]);
        assert!(!variables.contains_key("downsample.bias"));
    }

    #[test]
    fn leaky_relu_slope() {
        let xs = Tensor::from_slice(&[-1f32, 0., 2.]);
        let ys = Activation::LeakyRelu(0.02).forward(&xs);
        assert!(ys.allclose(&Tensor::from_slice(&[-0.02f32, 0., 2.]), 1e-6, 1e-6, false));
    }
}
