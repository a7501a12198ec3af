//! Adversarial co-training of the colorization U-Net and its discriminator.
use crate::models::discriminator::condition;
use crate::pipelines::pal2color::Pal2ColorModels;
use crate::training::checkpoint::CHECKPOINT_EXTENSION;
use crate::training::data::ColorizationBatch;
use crate::training::losses::{
    checked_value, discriminator_loss, generator_adversarial_loss, smooth_l1,
};
use crate::training::progress::StatusLine;
use crate::training::{alternate_updates, EpochSummary, StepLosses};
use crate::utils::ensure_dir;
use std::path::{Path, PathBuf};
use tch::Tensor;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub lambda_sl1: f64,
    pub log_interval: usize,
    pub save_dir: PathBuf,
    pub checkpoint_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            lambda_sl1: 100.,
            log_interval: 1,
            save_dir: PathBuf::from("models"),
            checkpoint_every: 10,
        }
    }
}

pub struct TrainGan {
    models: Pal2ColorModels,
    config: TrainConfig,
    status: StatusLine,
}

impl TrainGan {
    /// Reports progress on stdout every `config.log_interval` steps.
    pub fn new(models: Pal2ColorModels, config: TrainConfig) -> Self {
        let status = StatusLine::stdout(config.log_interval);
        Self { models, config, status }
    }

    pub fn with_status(mut self, status: StatusLine) -> Self {
        self.status = status;
        self
    }

    pub fn models(&self) -> &Pal2ColorModels {
        &self.models
    }

    pub fn into_models(self) -> Pal2ColorModels {
        self.models
    }

    /// Image channels shown to the discriminator, luminance first when the
    /// networks work in full Lab.
    fn discriminator_input(&self, luminance: &Tensor, chrominance: &Tensor, palette: &Tensor) -> anyhow::Result<Tensor> {
        if self.models.config.add_luminance_channel {
            condition(&Tensor::cat(&[luminance, chrominance], 1), palette)
        } else {
            condition(chrominance, palette)
        }
    }

    pub fn train_step(
        &mut self,
        batch: &ColorizationBatch,
        epoch: usize,
        step: usize,
    ) -> anyhow::Result<StepLosses> {
        let batch = batch.to_device(self.models.generator_vs.device());
        let fake_ab = self.models.generator.forward_t(&batch.luminance, &batch.side_signal, true)?;

        let real_input = self.discriminator_input(&batch.luminance, &batch.chrominance, &batch.palette)?;
        let fake_input = self.discriminator_input(&batch.luminance, &fake_ab, &batch.palette)?;
        let models = &mut self.models;
        let real = models.discriminator.forward_t(&real_input, true)?;
        let fake = models.discriminator.forward_t(&fake_input, true)?;
        let d_loss = discriminator_loss(&real, &fake);

        let g_loss = generator_adversarial_loss(&fake)
            + smooth_l1(&fake_ab, &batch.chrominance) * self.config.lambda_sl1;

        let losses = StepLosses {
            d_loss: checked_value("discriminator", &d_loss, epoch, step)?,
            g_loss: checked_value("generator", &g_loss, epoch, step)?,
        };
        alternate_updates(
            (&mut models.optimizer_d, &models.discriminator_vs, &d_loss),
            (&mut models.optimizer_g, &models.generator_vs, &g_loss),
        )?;
        tracing::debug!(epoch, step, d_loss = losses.d_loss, g_loss = losses.g_loss, "pal2color step");
        Ok(losses)
    }

    pub fn train(&mut self, batches: &[ColorizationBatch]) -> anyhow::Result<Vec<EpochSummary>> {
        let mut summaries = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let mut summary = EpochSummary::new(epoch);
            for (index, batch) in batches.iter().enumerate() {
                let step = index + 1;
                let losses = self.train_step(batch, epoch, step)?;
                summary.add(losses);
                self.status.update(epoch, step, losses.d_loss, losses.g_loss)?;
            }
            self.status.finish()?;
            let summary = summary.finish();
            tracing::info!(epoch, d_loss = summary.d_loss, g_loss = summary.g_loss, "epoch done");
            summaries.push(summary);

            if self.config.checkpoint_every > 0 && epoch % self.config.checkpoint_every == 0 {
                save_models(&self.models, &self.config.save_dir, epoch)?;
            }
        }
        Ok(summaries)
    }
}

pub fn checkpoint_paths(dir: &Path, epoch: usize) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("G{epoch}.{CHECKPOINT_EXTENSION}")),
        dir.join(format!("D{epoch}.{CHECKPOINT_EXTENSION}")),
    )
}

/// Saves both var stores as `G<epoch>.ot` and `D<epoch>.ot` under `dir`.
pub fn save_models(models: &Pal2ColorModels, dir: &Path, epoch: usize) -> anyhow::Result<()> {
    ensure_dir(dir)?;
    let (generator_path, discriminator_path) = checkpoint_paths(dir, epoch);
    models.generator_vs.save(&generator_path)?;
    models.discriminator_vs.save(&discriminator_path)?;
    tracing::info!(dir = %dir.display(), epoch, "saved pal2color checkpoint");
    Ok(())
}

pub fn load_models(models: &mut Pal2ColorModels, dir: &Path, epoch: usize) -> anyhow::Result<()> {
    let (generator_path, discriminator_path) = checkpoint_paths(dir, epoch);
    models.generator_vs.load(generator_path)?;
    models.discriminator_vs.load(discriminator_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::discriminator::DiscriminatorConfig;
    use crate::models::global_net::side_signal_channels;
    use crate::pipelines::pal2color::{init_models, Pal2ColorConfig};
    use crate::utils::ExecutionContext;
    use tch::{Device, Kind};

    fn config(add_luminance_channel: bool) -> Pal2ColorConfig {
        Pal2ColorConfig {
            batch_size: 2,
            image_size: 64,
            add_luminance_channel,
            discriminator: DiscriminatorConfig { conv_dim: 8, repeat_num: 5 },
            ..Default::default()
        }
    }

    fn batch(add_luminance_channel: bool) -> ColorizationBatch {
        let opts = (Kind::Float, Device::Cpu);
        let palette_len = if add_luminance_channel { 15 } else { 10 };
        ColorizationBatch::new(
            Tensor::rand([2, 1, 64, 64], opts),
            Tensor::rand([2, 2, 64, 64], opts),
            Tensor::rand([2, side_signal_channels(add_luminance_channel)], opts),
            Tensor::rand([2, palette_len], opts),
        )
        .unwrap()
    }

    #[test]
    fn step_updates_both_networks() {
        for add_luminance_channel in [false, true] {
            tch::manual_seed(0);
            let models = init_models(&ExecutionContext::cpu(), config(add_luminance_channel)).unwrap();
            let g_before: Vec<Tensor> =
                models.generator_vs.trainable_variables().iter().map(|t| t.detach().copy()).collect();
            let d_before: Vec<Tensor> =
                models.discriminator_vs.trainable_variables().iter().map(|t| t.detach().copy()).collect();
            let mut trainer = TrainGan::new(models, TrainConfig::default()).with_status(StatusLine::sink());

            let losses = trainer.train_step(&batch(add_luminance_channel), 1, 1).unwrap();
            assert!(losses.d_loss.is_finite() && losses.d_loss > 0.);
            assert!(losses.g_loss.is_finite() && losses.g_loss > 0.);
            let g_after = trainer.models().generator_vs.trainable_variables();
            let d_after = trainer.models().discriminator_vs.trainable_variables();
            assert!(g_before.iter().zip(g_after.iter()).any(|(a, b)| !a.equal(b)));
            assert!(d_before.iter().zip(d_after.iter()).any(|(a, b)| !a.equal(b)));
        }
    }

    #[test]
    fn train_saves_both_networks() {
        tch::manual_seed(1);
        let dir = std::env::temp_dir().join(format!("palette-gan-{}-pal2color", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let models = init_models(&ExecutionContext::cpu(), config(false)).unwrap();
        let train_config =
            TrainConfig { epochs: 1, save_dir: dir.clone(), checkpoint_every: 1, ..Default::default() };
        let mut trainer = TrainGan::new(models, train_config).with_status(StatusLine::sink());
        let summaries = trainer.train(&[batch(false)]).unwrap();
        assert_eq!(summaries.len(), 1);

        let mut restored = init_models(&ExecutionContext::cpu(), config(false)).unwrap();
        load_models(&mut restored, &dir, 1).unwrap();
        let trained = trainer.into_models();
        let trained_vars = trained.generator_vs.variables();
        for (name, var) in restored.generator_vs.variables() {
            assert!(var.equal(&trained_vars[&name]), "{name}");
        }
        std::fs::remove_dir_all(dir).unwrap();
    }
}
