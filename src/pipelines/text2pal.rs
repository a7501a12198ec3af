use crate::models::text2pal::{
    PaletteDecoderConfig, PaletteDiscriminator, Text2Palette, TextEncoderConfig,
};
use crate::utils::{num_params, ExecutionContext};
use tch::{nn, nn::OptimizerConfig, Tensor};

pub use crate::models::text2pal::{DECODER_PREFIX, ENCODER_PREFIX};

#[derive(Debug, Clone, Copy)]
pub struct Text2PalConfig {
    pub encoder: TextEncoderConfig,
    pub decoder: PaletteDecoderConfig,
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    /// Weight decay of the generator optimizer.
    pub weight_decay: f64,
}

impl Default for Text2PalConfig {
    fn default() -> Self {
        Self {
            encoder: Default::default(),
            decoder: Default::default(),
            learning_rate: 5e-4,
            beta1: 0.5,
            beta2: 0.99,
            weight_decay: 5e-5,
        }
    }
}

/// The palette generator and discriminator, each with its own var store and
/// optimizer so that no parameter is updated by both.
pub struct Text2PalModels {
    pub generator_vs: nn::VarStore,
    pub discriminator_vs: nn::VarStore,
    pub generator: Text2Palette,
    pub discriminator: PaletteDiscriminator,
    pub optimizer_g: nn::Optimizer,
    pub optimizer_d: nn::Optimizer,
    pub config: Text2PalConfig,
}

impl std::fmt::Debug for Text2PalModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Text2PalModels")
            .field("generator", &self.generator)
            .field("discriminator", &self.discriminator)
            .field("config", &self.config)
            .finish()
    }
}

pub fn init_models(ctx: &ExecutionContext, config: Text2PalConfig) -> anyhow::Result<Text2PalModels> {
    let generator_vs = ctx.var_store();
    let generator = Text2Palette::new(&generator_vs.root(), config.encoder, config.decoder)?;
    let discriminator_vs = ctx.var_store();
    let discriminator = PaletteDiscriminator::new(discriminator_vs.root(), config.decoder.hidden_size);
    tracing::info!(params = num_params(&generator_vs), "built palette generator");
    tracing::info!(params = num_params(&discriminator_vs), "built palette discriminator");

    let adam_g = nn::Adam { wd: config.weight_decay, ..Default::default() };
    let optimizer_g = adam_g.build(&generator_vs, config.learning_rate)?;
    let adam_d = nn::Adam { beta1: config.beta1, beta2: config.beta2, ..Default::default() };
    let optimizer_d = adam_d.build(&discriminator_vs, config.learning_rate)?;
    Ok(Text2PalModels {
        generator_vs,
        discriminator_vs,
        generator,
        discriminator,
        optimizer_g,
        optimizer_d,
        config,
    })
}

impl Text2PalModels {
    /// Generates `(batch, 15)` palettes in evaluation mode.
    pub fn sample_palettes(&self, embeddings: &Tensor, mask: &Tensor, lengths: &Tensor) -> Tensor {
        tch::no_grad(|| self.generator.generate(embeddings, mask, lengths, false).palettes)
    }
}
