//! Loss terms of the adversarial objectives.
use crate::error::Error;
use tch::{Reduction, Tensor};

/// Mean binary cross-entropy of probabilities against a constant target.
pub fn bce(scores: &Tensor, target: f64) -> Tensor {
    let labels = scores.full_like(target);
    scores.binary_cross_entropy::<Tensor>(&labels, None, Reduction::Mean)
}

/// `BCE(real, 1) + BCE(fake, 0)`.
pub fn discriminator_loss(real_scores: &Tensor, fake_scores: &Tensor) -> Tensor {
    bce(real_scores, 1.) + bce(fake_scores, 0.)
}

/// Adversarial part of the generator loss, the fake scores against real labels.
pub fn generator_adversarial_loss(fake_scores: &Tensor) -> Tensor {
    bce(fake_scores, 1.)
}

pub fn smooth_l1(prediction: &Tensor, target: &Tensor) -> Tensor {
    prediction.smooth_l1_loss(target, Reduction::Mean, 1.0)
}

/// KL divergence between `N(mu, exp(logvar))` and the standard normal,
/// averaged over every element: `-0.5 * mean(1 + logvar - mu^2 - exp(logvar))`.
pub fn kl_loss(mu: &Tensor, logvar: &Tensor) -> Tensor {
    let element = mu.pow_tensor_scalar(2) + logvar.exp() - 1. - logvar;
    element.mean(tch::Kind::Float) * 0.5
}

/// Reads a scalar loss back, failing on NaN or infinite values.
pub(crate) fn checked_value(
    name: &'static str,
    loss: &Tensor,
    epoch: usize,
    step: usize,
) -> Result<f64, Error> {
    let value = loss.double_value(&[]);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::NonFiniteLoss { name, value, epoch, step })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn discriminator_loss_value() {
        let real = Tensor::from_slice(&[0.9f32]);
        let fake = Tensor::from_slice(&[0.1f32]);
        let loss = discriminator_loss(&real, &fake).double_value(&[]);
        assert!((loss - 0.2107).abs() < 1e-3, "{loss}");
        assert!((loss - 2. * -(0.9f64.ln())).abs() < 1e-5);
    }

    #[test]
    fn kl_is_zero_for_the_prior() {
        let zeros = Tensor::zeros([4, 6], (Kind::Float, Device::Cpu));
        assert_eq!(kl_loss(&zeros, &zeros).double_value(&[]), 0.);
    }

    #[test]
    fn kl_is_non_negative() {
        for seed in 0..8 {
            tch::manual_seed(seed);
            let mu = Tensor::randn([16, 10], (Kind::Float, Device::Cpu)) * 3.;
            let logvar = Tensor::randn([16, 10], (Kind::Float, Device::Cpu)) * 3.;
            assert!(kl_loss(&mu, &logvar).double_value(&[]) >= 0.);
        }
        // A single element off the prior is enough for a positive value.
        let mu = Tensor::from_slice(&[0f32, 1.]);
        let logvar = Tensor::from_slice(&[0f32, 0.]);
        assert!((kl_loss(&mu, &logvar).double_value(&[]) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn smooth_l1_regimes() {
        let target = Tensor::zeros([2], (Kind::Float, Device::Cpu));
        let prediction = Tensor::from_slice(&[0.5f32, 3.]);
        // 0.5 * 0.5^2 and 3 - 0.5, averaged.
        let loss = smooth_l1(&prediction, &target).double_value(&[]);
        assert!((loss - (0.125 + 2.5) / 2.).abs() < 1e-6);
    }

    #[test]
    fn non_finite_losses_are_errors() {
        let loss = Tensor::from_slice(&[f32::NAN]).sum(Kind::Float);
        assert!(matches!(
            checked_value("g", &loss, 3, 7),
            Err(Error::NonFiniteLoss { name: "g", epoch: 3, step: 7, .. })
        ));
        let loss = Tensor::from_slice(&[1.5f32]).sum(Kind::Float);
        assert_eq!(checked_value("d", &loss, 1, 1).unwrap(), 1.5);
    }
}
