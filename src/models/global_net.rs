//! Global feature injection.
//!
//! The side signal is a per-sample vector summarizing the target colours. It
//! goes through a cascade of 1x1 convolutions and the resulting single pixel
//! is tiled over the whole resolution of the decoder stage it is added to.
use crate::error::Error;
use crate::utils::conv_config;
use tch::{nn, Tensor};

const STAGE_CHANNELS: [i64; 4] = [128, 256, 512, 512];

/// The number of values in the side signal of each sample.
pub fn side_signal_channels(add_luminance_channel: bool) -> i64 {
    if add_luminance_channel {
        16
    } else {
        11
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionPoint {
    /// Added to the deepest contracting feature, at 1/8 of the image size.
    Bottleneck,
    /// Added after the first expansion stage, at 1/4 of the image size.
    Expand1,
    /// Added after the second expansion stage, at 1/2 of the image size.
    Expand2,
}

impl InjectionPoint {
    fn num_stages(&self) -> usize {
        match self {
            InjectionPoint::Bottleneck => 4,
            InjectionPoint::Expand1 => 2,
            InjectionPoint::Expand2 => 1,
        }
    }

    pub fn downscale(&self) -> i64 {
        match self {
            InjectionPoint::Bottleneck => 8,
            InjectionPoint::Expand1 => 4,
            InjectionPoint::Expand2 => 2,
        }
    }
}

#[derive(Debug)]
pub struct GlobalFeatureInjector {
    stages: Vec<nn::Conv2D>,
    side_channels: i64,
    resolution: i64,
}

impl GlobalFeatureInjector {
    pub fn new(
        vs: nn::Path,
        image_size: i64,
        add_luminance_channel: bool,
        point: InjectionPoint,
    ) -> Self {
        let side_channels = side_signal_channels(add_luminance_channel);
        let mut in_channels = side_channels;
        let stages = STAGE_CHANNELS[..point.num_stages()]
            .iter()
            .enumerate()
            .map(|(i, &out_channels)| {
                let conv = nn::conv2d(&vs / i, in_channels, out_channels, 1, conv_config(0, 1));
                in_channels = out_channels;
                conv
            })
            .collect();
        Self { stages, side_channels, resolution: image_size / point.downscale() }
    }

    /// Maps a `(batch, side_channels)` or `(batch, side_channels, 1, 1)` side
    /// signal to a `(batch, channels, resolution, resolution)` feature map.
    pub fn forward(&self, side_signal: &Tensor) -> Result<Tensor, Error> {
        let xs = match side_signal.dim() {
            2 => side_signal.unsqueeze(-1).unsqueeze(-1),
            _ => side_signal.shallow_clone(),
        };
        let size = xs.size();
        if size.len() != 4 || size[2] != 1 || size[3] != 1 {
            return Err(Error::ShapeMismatch {
                context: "side signal",
                lhs: size,
                rhs: vec![-1, self.side_channels, 1, 1],
            });
        }
        if size[1] != self.side_channels {
            return Err(Error::SideSignalLength { expected: self.side_channels, got: size[1] });
        }
        let mut xs = xs;
        for stage in self.stages.iter() {
            xs = xs.apply(stage).relu()
        }
        Ok(xs.repeat([1, 1, self.resolution, self.resolution]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn bottleneck_is_512_wide_for_every_image_size() {
        for image_size in [64, 128, 256, 512] {
            let vs = nn::VarStore::new(Device::Cpu);
            let net =
                GlobalFeatureInjector::new(vs.root(), image_size, false, InjectionPoint::Bottleneck);
            let side = Tensor::rand([3, 11], (Kind::Float, Device::Cpu));
            let ys = net.forward(&side).unwrap();
            assert_eq!(ys.size(), [3, 512, image_size / 8, image_size / 8]);
        }
    }

    #[test]
    fn tiling_is_uniform() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = GlobalFeatureInjector::new(vs.root(), 64, true, InjectionPoint::Bottleneck);
        let side = Tensor::rand([2, 16, 1, 1], (Kind::Float, Device::Cpu));
        let ys = net.forward(&side).unwrap();
        let corner = ys.narrow(2, 0, 1).narrow(3, 0, 1);
        assert!(ys.allclose(&corner.expand_as(&ys), 0., 0., false));
    }

    #[test]
    fn stage_widths() {
        let vs = nn::VarStore::new(Device::Cpu);
        let side = Tensor::rand([1, 11], (Kind::Float, Device::Cpu));
        for (point, channels) in [
            (InjectionPoint::Bottleneck, 512),
            (InjectionPoint::Expand1, 256),
            (InjectionPoint::Expand2, 128),
        ] {
            let net = GlobalFeatureInjector::new(vs.root() / format!("{point:?}"), 128, false, point);
            let ys = net.forward(&side).unwrap();
            assert_eq!(ys.size(), [1, channels, 128 / point.downscale(), 128 / point.downscale()]);
        }
    }

    #[test]
    fn wrong_side_signal_length() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = GlobalFeatureInjector::new(vs.root(), 64, false, InjectionPoint::Expand2);
        let side = Tensor::rand([2, 16], (Kind::Float, Device::Cpu));
        assert!(matches!(
            net.forward(&side),
            Err(Error::SideSignalLength { expected: 11, got: 16 })
        ));
    }
}
