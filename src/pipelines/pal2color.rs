use crate::models::discriminator::{Discriminator, DiscriminatorConfig};
use crate::models::unet::{Generator, UNetConfig};
use crate::utils::{num_params, ExecutionContext};
use tch::{nn, nn::OptimizerConfig};

#[derive(Debug, Clone, Copy)]
pub struct Pal2ColorConfig {
    pub batch_size: i64,
    pub image_size: i64,
    /// Epoch from which dropout would be disabled. Kept for configuration
    /// compatibility, the networks have no dropout layer.
    pub dropout_epoch: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub multi_injection: bool,
    pub add_luminance_channel: bool,
    pub discriminator: DiscriminatorConfig,
}

impl Default for Pal2ColorConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            image_size: 256,
            dropout_epoch: 0,
            learning_rate: 2e-4,
            weight_decay: 1e-7,
            multi_injection: false,
            add_luminance_channel: false,
            discriminator: Default::default(),
        }
    }
}

impl Pal2ColorConfig {
    pub fn unet(&self) -> UNetConfig {
        UNetConfig {
            image_size: self.image_size,
            multi_injection: self.multi_injection,
            add_luminance_channel: self.add_luminance_channel,
        }
    }
}

pub struct Pal2ColorModels {
    pub generator_vs: nn::VarStore,
    pub discriminator_vs: nn::VarStore,
    pub generator: Generator,
    pub discriminator: Discriminator,
    pub optimizer_g: nn::Optimizer,
    pub optimizer_d: nn::Optimizer,
    pub config: Pal2ColorConfig,
}

impl std::fmt::Debug for Pal2ColorModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pal2ColorModels")
            .field("generator", &self.generator)
            .field("discriminator", &self.discriminator)
            .field("config", &self.config)
            .finish()
    }
}

pub fn init_models(ctx: &ExecutionContext, config: Pal2ColorConfig) -> anyhow::Result<Pal2ColorModels> {
    let generator_vs = ctx.var_store();
    let generator = Generator::new(generator_vs.root(), config.unet())?;
    let discriminator_vs = ctx.var_store();
    let discriminator = Discriminator::new(
        discriminator_vs.root(),
        config.image_size,
        config.add_luminance_channel,
        config.discriminator,
    )?;
    tracing::info!(params = num_params(&generator_vs), "built colorization generator");
    tracing::info!(params = num_params(&discriminator_vs), "built colorization discriminator");

    let adam = nn::Adam { wd: config.weight_decay, ..Default::default() };
    let optimizer_g = adam.build(&generator_vs, config.learning_rate)?;
    let optimizer_d = adam.build(&discriminator_vs, config.learning_rate)?;
    Ok(Pal2ColorModels {
        generator_vs,
        discriminator_vs,
        generator,
        discriminator,
        optimizer_g,
        optimizer_d,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_sizes() {
        let config = Pal2ColorConfig { image_size: 100, ..Default::default() };
        let err = init_models(&ExecutionContext::cpu(), config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::Error>(),
            Some(crate::error::Error::UnsupportedImageSize(100))
        ));
    }
}
