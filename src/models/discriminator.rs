//! PatchGAN discriminator for colorized images.
//!
//! The image channels are concatenated with the palette tiled over the whole
//! image, squeezed through strided convolutions and finally projected to a
//! single realism probability per sample.
use crate::error::Error;
use crate::models::unet::ImageSize;
use crate::utils::{batch_norm_config, linear_config, normal_init};
use tch::{nn, Tensor};

#[derive(Debug, Clone, Copy)]
pub struct DiscriminatorConfig {
    pub conv_dim: i64,
    pub repeat_num: i64,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self { conv_dim: 64, repeat_num: 5 }
    }
}

/// Image channels plus palette channels seen by the discriminator: the two
/// chrominance channels with a 5x2 palette, or Lab with a 5x3 palette.
pub fn input_channels(add_luminance_channel: bool) -> (i64, i64) {
    if add_luminance_channel {
        (3, 15)
    } else {
        (2, 10)
    }
}

/// Tiles a `(batch, n)` palette over the image and concatenates it to the
/// `(batch, c, h, w)` image channels.
pub fn condition(image: &Tensor, palette: &Tensor) -> anyhow::Result<Tensor> {
    let (bsize, _channels, h, w) = image.size4()?;
    let (palette_bsize, palette_len) = palette.size2()?;
    if bsize != palette_bsize {
        return Err(Error::ShapeMismatch {
            context: "palette conditioning",
            lhs: image.size(),
            rhs: palette.size(),
        }
        .into());
    }
    let tiled = palette.reshape([bsize, palette_len, 1, 1]).expand([bsize, palette_len, h, w], false);
    Ok(Tensor::cat(&[image, &tiled], 1))
}

#[derive(Debug)]
pub struct Discriminator {
    convs: Vec<nn::Conv2D>,
    conv1: nn::Conv2D,
    batch_norm: nn::BatchNorm,
    fc: nn::Linear,
    in_channels: i64,
    image_size: ImageSize,
}

impl Discriminator {
    pub fn new(
        vs: nn::Path,
        image_size: i64,
        add_luminance_channel: bool,
        config: DiscriminatorConfig,
    ) -> Result<Self, Error> {
        let image_size = ImageSize::new(image_size)?;
        // Every strided conv halves the resolution, the head needs at least one pixel left.
        let max_depth = image_size.get().trailing_zeros() as i64;
        if config.repeat_num < 1 || config.repeat_num > max_depth {
            return Err(Error::UnsupportedDepth {
                image_size: image_size.get(),
                repeat_num: config.repeat_num,
            });
        }
        let (image_channels, palette_channels) = input_channels(add_luminance_channel);
        let in_channels = image_channels + palette_channels;
        let conv_cfg = nn::ConvConfig {
            stride: 2,
            padding: 1,
            ws_init: normal_init(),
            bs_init: nn::Init::Const(0.),
            ..Default::default()
        };
        let vs_main = &vs / "main";
        let mut curr_dim = in_channels;
        let convs = (0..config.repeat_num)
            .map(|i| {
                let out_dim = config.conv_dim << i;
                let conv = nn::conv2d(&vs_main / i, curr_dim, out_dim, 4, conv_cfg);
                curr_dim = out_dim;
                conv
            })
            .collect();
        let conv1_cfg =
            nn::ConvConfig { padding: 1, bias: false, ws_init: normal_init(), ..Default::default() };
        let conv1 = nn::conv2d(&vs / "conv1", curr_dim, curr_dim, 3, conv1_cfg);
        let k_size = image_size.get() >> config.repeat_num;
        let features = k_size * k_size * curr_dim;
        let batch_norm = nn::batch_norm1d(&vs / "fc_norm", features, batch_norm_config());
        let fc = nn::linear(&vs / "fc", features, 1, linear_config());
        Ok(Self { convs, conv1, batch_norm, fc, in_channels, image_size })
    }

    /// Returns one probability per sample for a conditioned
    /// `(batch, in_channels, size, size)` input.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> anyhow::Result<Tensor> {
        let size = self.image_size.get();
        let (bsize, channels, height, width) = xs.size4()?;
        if (channels, height, width) != (self.in_channels, size, size) {
            return Err(Error::ShapeMismatch {
                context: "discriminator input",
                lhs: xs.size(),
                rhs: vec![bsize, self.in_channels, size, size],
            }
            .into());
        }
        let mut xs = xs.shallow_clone();
        for conv in self.convs.iter() {
            xs = xs.apply(conv).leaky_relu()
        }
        let xs = xs.apply(&self.conv1).view([bsize, -1]);
        Ok(xs.apply_t(&self.batch_norm, train).apply(&self.fc).sigmoid().view([bsize]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn scores_are_probabilities() {
        for add_luminance_channel in [false, true] {
            let vs = nn::VarStore::new(Device::Cpu);
            let d = Discriminator::new(vs.root(), 64, add_luminance_channel, Default::default())
                .unwrap();
            let (image_channels, palette_channels) = input_channels(add_luminance_channel);
            let image = Tensor::rand([3, image_channels, 64, 64], (Kind::Float, Device::Cpu));
            let palette = Tensor::rand([3, palette_channels], (Kind::Float, Device::Cpu));
            let xs = condition(&image, &palette).unwrap();
            assert_eq!(xs.size(), [3, image_channels + palette_channels, 64, 64]);
            let scores = d.forward_t(&xs, true).unwrap();
            assert_eq!(scores.size(), [3]);
            assert!(scores.min().double_value(&[]) >= 0.);
            assert!(scores.max().double_value(&[]) <= 1.);
        }
    }

    #[test]
    fn head_width_follows_depth() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = DiscriminatorConfig { conv_dim: 8, repeat_num: 3 };
        let _d = Discriminator::new(vs.root(), 64, false, config).unwrap();
        // 64 / 2^3 = 8 pixels wide, 8 << 2 = 32 channels.
        assert_eq!(vs.variables()["fc.weight"].size(), [1, 8 * 8 * 32]);
        assert_eq!(vs.variables()["main.0.weight"].size(), [8, 12, 4, 4]);
    }

    #[test]
    fn depth_must_fit_the_image() {
        let vs = nn::VarStore::new(Device::Cpu);
        for repeat_num in [0, 7, 9] {
            let config = DiscriminatorConfig { conv_dim: 8, repeat_num };
            assert!(matches!(
                Discriminator::new(vs.root() / repeat_num, 64, false, config),
                Err(Error::UnsupportedDepth { image_size: 64, .. })
            ));
        }
        // Down to a single pixel is still fine.
        let config = DiscriminatorConfig { conv_dim: 4, repeat_num: 6 };
        let d = Discriminator::new(vs.root() / "deepest", 64, false, config).unwrap();
        let xs = Tensor::rand([2, 12, 64, 64], (Kind::Float, Device::Cpu));
        assert_eq!(d.forward_t(&xs, true).unwrap().size(), [2]);
    }

    #[test]
    fn conditioning_is_tiled() {
        let image = Tensor::zeros([2, 2, 4, 4], (Kind::Float, Device::Cpu));
        let palette = Tensor::arange(20, (Kind::Float, Device::Cpu)).view([2, 10]);
        let xs = condition(&image, &palette).unwrap();
        let pixel = xs.select(3, 3).select(2, 1).narrow(1, 2, 10);
        assert!(pixel.equal(&palette));
        assert!(condition(&image, &palette.narrow(0, 0, 1)).is_err());
        // A column slice of a wider palette is not contiguous.
        let wide = Tensor::arange(30, (Kind::Float, Device::Cpu)).view([2, 15]);
        let sliced = wide.narrow(1, 5, 10);
        let xs = condition(&image, &sliced).unwrap();
        assert!(xs.select(3, 0).select(2, 0).narrow(1, 2, 10).equal(&sliced));
    }

    #[test]
    fn rejects_unconditioned_input() {
        let vs = nn::VarStore::new(Device::Cpu);
        let d = Discriminator::new(vs.root(), 64, false, Default::default()).unwrap();
        let xs = Tensor::rand([2, 2, 64, 64], (Kind::Float, Device::Cpu));
        assert!(d.forward_t(&xs, false).is_err());
    }
}
