//! Colorization U-Net
//!
//! The generator takes a luminance image and a side signal summarizing the
//! target palette and predicts the two chrominance channels of every pixel.
//! The contracting path keeps a second branch at each of the three shallow
//! depths as a skip connection, the bottleneck mixes in the side signal and
//! runs two dilated blocks, and the expanding path fuses every upsampled
//! stage with its skip connection.
use crate::error::{check_same_size, Error};
use crate::models::conv_block::{Activation, UNetBlock, UNetBlockConfig};
use crate::models::global_net::{GlobalFeatureInjector, InjectionPoint};
use tch::{nn, Tensor};

/// A validated image resolution, the injectors tile at 1/8 of it and the
/// discriminator head needs it to be divisible by 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize(i64);

impl ImageSize {
    pub const SUPPORTED: [i64; 4] = [64, 128, 256, 512];

    pub fn new(size: i64) -> Result<Self, Error> {
        if Self::SUPPORTED.contains(&size) {
            Ok(Self(size))
        } else {
            Err(Error::UnsupportedImageSize(size))
        }
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UNetConfig {
    pub image_size: i64,
    pub multi_injection: bool,
    pub add_luminance_channel: bool,
}

impl Default for UNetConfig {
    fn default() -> Self {
        Self { image_size: 256, multi_injection: false, add_luminance_channel: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Input,
    Down1,
    Skip1,
    Down2,
    Skip2,
    Down3,
    Skip3,
    Middle,
    Dilated1,
    Dilated2,
    BottleneckOut,
    Up3,
    Up2,
    Up1,
    Prediction,
}

struct StageSpec {
    stage: Stage,
    name: &'static str,
    in_channels: i64,
    out_channels: i64,
    config: UNetBlockConfig,
}

fn stage(
    stage: Stage,
    name: &'static str,
    in_channels: i64,
    out_channels: i64,
    config: UNetBlockConfig,
) -> StageSpec {
    StageSpec { stage, name, in_channels, out_channels, config }
}

fn schedule() -> Vec<StageSpec> {
    let block = |num_convs, add_downsample| UNetBlockConfig {
        num_convs,
        add_downsample,
        ..Default::default()
    };
    let first = |add_downsample| UNetBlockConfig {
        pre_activation: true,
        ..block(1, add_downsample)
    };
    let up = |num_convs, skip_channels| UNetBlockConfig {
        upsample_skip_channels: Some(skip_channels),
        ..block(num_convs, false)
    };
    vec![
        stage(Stage::Input, "input", 1, 64, UNetBlockConfig {
            activation: Activation::Identity,
            batch_norm: false,
            ..block(1, false)
        }),
        stage(Stage::Down1, "down1", 64, 64, first(true)),
        stage(Stage::Skip1, "skip1", 64, 64, first(false)),
        stage(Stage::Down2, "down2", 64, 128, block(2, true)),
        stage(Stage::Skip2, "skip2", 64, 128, block(2, false)),
        stage(Stage::Down3, "down3", 128, 256, block(3, true)),
        stage(Stage::Skip3, "skip3", 128, 256, block(3, false)),
        stage(Stage::Middle, "middle", 256, 512, block(3, false)),
        stage(Stage::Dilated1, "dilated1", 512, 512, UNetBlockConfig { dilation: 2, ..block(3, false) }),
        stage(Stage::Dilated2, "dilated2", 512, 512, UNetBlockConfig { dilation: 2, ..block(3, false) }),
        stage(Stage::BottleneckOut, "bottleneck_out", 512, 512, block(3, false)),
        stage(Stage::Up3, "up3", 512, 256, up(2, 256)),
        stage(Stage::Up2, "up2", 256, 128, up(1, 128)),
        stage(Stage::Up1, "up1", 128, 128, UNetBlockConfig {
            last_activation: Some(Activation::LeakyRelu(0.02)),
            batch_norm: false,
            ..up(1, 64)
        }),
        stage(Stage::Prediction, "prediction", 128, 2, UNetBlockConfig {
            kernel_size: 1,
            activation: Activation::Sigmoid,
            batch_norm: false,
            ..block(1, false)
        }),
    ]
}

#[derive(Debug)]
struct ExpandInjectors {
    expand1: GlobalFeatureInjector,
    expand2: GlobalFeatureInjector,
}

#[derive(Debug)]
pub struct Generator {
    blocks: Vec<(Stage, UNetBlock)>,
    bottleneck_injector: GlobalFeatureInjector,
    expand_injectors: Option<ExpandInjectors>,
    image_size: ImageSize,
    pub config: UNetConfig,
}

impl Generator {
    pub fn new(vs: nn::Path, config: UNetConfig) -> Result<Self, Error> {
        let image_size = ImageSize::new(config.image_size)?;
        let injector = |name: &str, point| {
            GlobalFeatureInjector::new(
                &vs / name,
                image_size.get(),
                config.add_luminance_channel,
                point,
            )
        };
        let bottleneck_injector = injector("global_bottleneck", InjectionPoint::Bottleneck);
        let expand_injectors = if config.multi_injection {
            Some(ExpandInjectors {
                expand1: injector("global_expand1", InjectionPoint::Expand1),
                expand2: injector("global_expand2", InjectionPoint::Expand2),
            })
        } else {
            None
        };
        let blocks = schedule()
            .into_iter()
            .map(|s| (s.stage, UNetBlock::new(&vs / s.name, s.in_channels, s.out_channels, s.config)))
            .collect();
        Ok(Self { blocks, bottleneck_injector, expand_injectors, image_size, config })
    }

    fn block(&self, stage: Stage) -> &UNetBlock {
        // The schedule lists every stage exactly once, in declaration order.
        &self.blocks[stage as usize].1
    }

    fn run(&self, stage: Stage, xs: &Tensor, train: bool) -> anyhow::Result<Tensor> {
        self.block(stage).forward_t(xs, None, train)
    }

    fn inject(xs: Tensor, injector: &GlobalFeatureInjector, side_signal: &Tensor) -> anyhow::Result<Tensor> {
        let global = injector.forward(side_signal)?;
        check_same_size("global feature injection", &xs, &global)?;
        Ok(xs + global)
    }

    /// Predicts `(batch, 2, size, size)` chrominance values in `[0, 1]` from a
    /// `(batch, 1, size, size)` luminance image.
    pub fn forward_t(&self, image: &Tensor, side_signal: &Tensor, train: bool) -> anyhow::Result<Tensor> {
        let size = self.image_size.get();
        let (_bsize, channels, height, width) = image.size4()?;
        if (channels, height, width) != (1, size, size) {
            return Err(Error::ShapeMismatch {
                context: "generator input",
                lhs: image.size(),
                rhs: vec![-1, 1, size, size],
            }
            .into());
        }

        let input = self.run(Stage::Input, image, train)?;
        let down1 = self.run(Stage::Down1, &input, train)?;
        let skip1 = self.run(Stage::Skip1, &input, train)?;
        let down2 = self.run(Stage::Down2, &down1, train)?;
        let skip2 = self.run(Stage::Skip2, &down1, train)?;
        let down3 = self.run(Stage::Down3, &down2, train)?;
        let skip3 = self.run(Stage::Skip3, &down2, train)?;

        let xs = self.run(Stage::Middle, &down3, train)?;
        let xs = Self::inject(xs, &self.bottleneck_injector, side_signal)?;
        let xs = self.run(Stage::Dilated1, &xs, train)?;
        let xs = self.run(Stage::Dilated2, &xs, train)?;
        let xs = self.run(Stage::BottleneckOut, &xs, train)?;

        let mut xs = self.block(Stage::Up3).forward_t(&xs, Some(&skip3), train)?;
        if let Some(injectors) = &self.expand_injectors {
            xs = Self::inject(xs, &injectors.expand1, side_signal)?;
        }
        let mut xs = self.block(Stage::Up2).forward_t(&xs, Some(&skip2), train)?;
        if let Some(injectors) = &self.expand_injectors {
            xs = Self::inject(xs, &injectors.expand2, side_signal)?;
        }
        let xs = self.block(Stage::Up1).forward_t(&xs, Some(&skip1), train)?;
        self.run(Stage::Prediction, &xs, train)
    }
}
