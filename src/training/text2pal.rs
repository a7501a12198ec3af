//! Adversarial co-training of the text to palette generator.
use crate::pipelines::text2pal::{Text2PalModels, DECODER_PREFIX, ENCODER_PREFIX};
use crate::training::checkpoint::{checkpoint_dir, load_prefixed, save_prefixed, CHECKPOINT_EXTENSION};
use crate::training::data::TextPaletteBatch;
use crate::training::losses::{
    checked_value, discriminator_loss, generator_adversarial_loss, kl_loss, smooth_l1,
};
use crate::training::progress::StatusLine;
use crate::training::{alternate_updates, EpochSummary, StepLosses};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub lambda_sl1: f64,
    pub lambda_kl: f64,
    pub log_interval: usize,
    pub save_dir: PathBuf,
    /// Names the loss terms in use, checkpoints are grouped under it.
    pub loss_combination: String,
    pub checkpoint_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            lambda_sl1: 100.,
            lambda_kl: 0.5,
            log_interval: 1,
            save_dir: PathBuf::from("models"),
            loss_combination: "Compound".to_string(),
            checkpoint_every: 10,
        }
    }
}

impl TrainConfig {
    pub fn checkpoint_dir(&self) -> PathBuf {
        checkpoint_dir(&self.save_dir, &self.loss_combination, self.lambda_sl1, self.lambda_kl)
    }
}

/// Loss terms of one step, the generator loss being their weighted sum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Text2PalLosses {
    pub d_loss: f64,
    pub g_loss: f64,
    pub g_adversarial: f64,
    pub g_smooth_l1: f64,
    pub g_kl: f64,
}

pub struct TrainGan {
    models: Text2PalModels,
    config: TrainConfig,
    status: StatusLine,
}

impl TrainGan {
    /// Reports progress on stdout every `config.log_interval` steps.
    pub fn new(models: Text2PalModels, config: TrainConfig) -> Self {
        let status = StatusLine::stdout(config.log_interval);
        Self { models, config, status }
    }

    pub fn with_status(mut self, status: StatusLine) -> Self {
        self.status = status;
        self
    }

    pub fn models(&self) -> &Text2PalModels {
        &self.models
    }

    pub fn into_models(self) -> Text2PalModels {
        self.models
    }

    /// One generator forward pass followed by a discriminator update and a
    /// generator update.
    pub fn train_step(
        &mut self,
        batch: &TextPaletteBatch,
        epoch: usize,
        step: usize,
    ) -> anyhow::Result<Text2PalLosses> {
        let device = self.models.generator_vs.device();
        let batch = batch.to_device(device);
        let models = &mut self.models;

        let generated =
            models.generator.generate(&batch.embeddings, &batch.mask, &batch.lengths, true);

        let real = models.discriminator.forward(&batch.palettes, &generated.text_summary);
        let fake = models.discriminator.forward(&generated.palettes, &generated.text_summary);
        let d_loss = discriminator_loss(&real, &fake);

        // The generator is judged on the very scores the discriminator was trained on.
        let g_adversarial = generator_adversarial_loss(&fake);
        let g_smooth_l1 = smooth_l1(&generated.palettes, &batch.palettes) * self.config.lambda_sl1;
        let g_kl = kl_loss(&generated.mu, &generated.logvar) * self.config.lambda_kl;
        let g_loss = &g_adversarial + &g_smooth_l1 + &g_kl;

        let losses = Text2PalLosses {
            d_loss: checked_value("discriminator", &d_loss, epoch, step)?,
            g_loss: checked_value("generator", &g_loss, epoch, step)?,
            g_adversarial: g_adversarial.double_value(&[]),
            g_smooth_l1: g_smooth_l1.double_value(&[]),
            g_kl: g_kl.double_value(&[]),
        };
        alternate_updates(
            (&mut models.optimizer_d, &models.discriminator_vs, &d_loss),
            (&mut models.optimizer_g, &models.generator_vs, &g_loss),
        )?;
        tracing::debug!(epoch, step, ?losses, "text2pal step");
        Ok(losses)
    }

    pub fn train(&mut self, batches: &[TextPaletteBatch]) -> anyhow::Result<Vec<EpochSummary>> {
        let mut summaries = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let mut summary = EpochSummary::new(epoch);
            for (index, batch) in batches.iter().enumerate() {
                let step = index + 1;
                let losses = self.train_step(batch, epoch, step)?;
                summary.add(StepLosses { d_loss: losses.d_loss, g_loss: losses.g_loss });
                self.status.update(epoch, step, losses.d_loss, losses.g_loss)?;
            }
            self.status.finish()?;
            let summary = summary.finish();
            tracing::info!(epoch, d_loss = summary.d_loss, g_loss = summary.g_loss, "epoch done");
            summaries.push(summary);

            if self.config.checkpoint_every > 0 && epoch % self.config.checkpoint_every == 0 {
                self.save_checkpoint()?;
            }
        }
        Ok(summaries)
    }

    /// Writes the encoder and decoder parameters to the checkpoint directory.
    pub fn save_checkpoint(&self) -> anyhow::Result<PathBuf> {
        let dir = self.config.checkpoint_dir();
        save_generator(&self.models, &dir)?;
        tracing::info!(dir = %dir.display(), "saved text2pal checkpoint");
        Ok(dir)
    }
}

fn blob_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{prefix}.{CHECKPOINT_EXTENSION}"))
}

pub fn save_generator(models: &Text2PalModels, dir: &Path) -> anyhow::Result<()> {
    save_prefixed(&models.generator_vs, ENCODER_PREFIX, blob_path(dir, ENCODER_PREFIX))?;
    save_prefixed(&models.generator_vs, DECODER_PREFIX, blob_path(dir, DECODER_PREFIX))
}

pub fn load_generator(models: &Text2PalModels, dir: &Path) -> anyhow::Result<()> {
    load_prefixed(&models.generator_vs, ENCODER_PREFIX, blob_path(dir, ENCODER_PREFIX))?;
    load_prefixed(&models.generator_vs, DECODER_PREFIX, blob_path(dir, DECODER_PREFIX))
}
