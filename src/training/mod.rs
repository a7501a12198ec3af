//! # Adversarial training
//!
//! Both systems alternate a discriminator update and a generator update on
//! every batch. The generator loss reuses the discriminator scores computed
//! for the discriminator loss: the two gradients are taken from that single
//! forward pass, the discriminator step is applied first, then the generator
//! step.
use crate::error::Error;
use tch::{nn, Kind, Tensor};

pub mod checkpoint;
pub mod data;
pub mod losses;
pub mod pal2color;
pub mod progress;
pub mod text2pal;

/// Loss values of one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    pub d_loss: f64,
    pub g_loss: f64,
}

/// Mean losses over an epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub steps: usize,
    pub d_loss: f64,
    pub g_loss: f64,
}

impl EpochSummary {
    fn new(epoch: usize) -> Self {
        Self { epoch, steps: 0, d_loss: 0., g_loss: 0. }
    }

    fn add(&mut self, losses: StepLosses) {
        self.steps += 1;
        self.d_loss += losses.d_loss;
        self.g_loss += losses.g_loss;
    }

    fn finish(mut self) -> Self {
        if self.steps > 0 {
            self.d_loss /= self.steps as f64;
            self.g_loss /= self.steps as f64;
        }
        self
    }
}

fn trainable_variables(vs: &nn::VarStore) -> Vec<(String, Tensor)> {
    let mut vars: Vec<(String, Tensor)> =
        vs.variables().into_iter().filter(|(_, t)| t.requires_grad()).collect();
    vars.sort_by(|(a, _), (b, _)| a.cmp(b));
    vars
}

fn gradients(
    loss: &Tensor,
    vars: &[(String, Tensor)],
    keep_graph: bool,
) -> Result<Vec<Tensor>, Error> {
    let inputs: Vec<&Tensor> = vars.iter().map(|(_, t)| t).collect();
    let grads = Tensor::run_backward(&[loss], inputs.as_slice(), keep_graph, false);
    for ((name, _), grad) in vars.iter().zip(grads.iter()) {
        if !grad.defined() {
            return Err(Error::MissingGradient(name.clone()));
        }
    }
    Ok(grads)
}

/// Runs an optimizer step with the given gradients in place of the accumulated ones.
fn step_with(
    optimizer: &mut nn::Optimizer,
    vars: &[(String, Tensor)],
    grads: &[Tensor],
) {
    optimizer.zero_grad();
    // d/dv sum(v * g) = g, so this backward pass leaves exactly g in every grad slot.
    let parts: Vec<Tensor> = vars
        .iter()
        .zip(grads.iter())
        .map(|((_, var), grad)| (var * grad).sum(Kind::Float))
        .collect();
    Tensor::stack(&parts, 0).sum(Kind::Float).backward();
    optimizer.step();
}

/// Updates the discriminator with `d_loss` then the generator with `g_loss`,
/// both losses coming from the same forward pass.
pub(crate) fn alternate_updates(
    discriminator: (&mut nn::Optimizer, &nn::VarStore, &Tensor),
    generator: (&mut nn::Optimizer, &nn::VarStore, &Tensor),
) -> Result<(), Error> {
    let (optimizer_d, vs_d, d_loss) = discriminator;
    let (optimizer_g, vs_g, g_loss) = generator;
    let vars_d = trainable_variables(vs_d);
    let vars_g = trainable_variables(vs_g);
    let grads_d = gradients(d_loss, &vars_d, true)?;
    let grads_g = gradients(g_loss, &vars_g, false)?;
    step_with(optimizer_d, &vars_d, &grads_d);
    step_with(optimizer_g, &vars_g, &grads_g);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::OptimizerConfig, Device};

    #[test]
    fn updates_use_the_shared_forward_pass() {
        let vs_d = nn::VarStore::new(Device::Cpu);
        let vs_g = nn::VarStore::new(Device::Cpu);
        let w_d = vs_d.root().ones("w", &[1]);
        let w_g = vs_g.root().ones("w", &[1]);
        let mut opt_d = nn::Sgd::default().build(&vs_d, 0.1).unwrap();
        let mut opt_g = nn::Sgd::default().build(&vs_g, 0.1).unwrap();

        // One shared score, used by both losses.
        let score = &w_d * &w_g * 2.;
        let d_loss = &score * 3.;
        let g_loss = &score * 5.;
        alternate_updates((&mut opt_d, &vs_d, &d_loss), (&mut opt_g, &vs_g, &g_loss)).unwrap();

        // d d_loss / d w_d = 6 and d g_loss / d w_g = 10, both at the pre-step weights.
        let w_d = w_d.double_value(&[0]);
        let w_g = w_g.double_value(&[0]);
        assert!((w_d - 0.4).abs() < 1e-6, "{w_d}");
        assert!((w_g - 0.).abs() < 1e-6, "{w_g}");
    }

    #[test]
    fn epoch_summary_means() {
        let mut summary = EpochSummary::new(2);
        summary.add(StepLosses { d_loss: 1., g_loss: 4. });
        summary.add(StepLosses { d_loss: 3., g_loss: 2. });
        let summary = summary.finish();
        assert_eq!(summary, EpochSummary { epoch: 2, steps: 2, d_loss: 2., g_loss: 3. });
    }
}
