// Adversarial training of the text to palette generator.
//
// No dataset loader is bundled: the batches are synthetic, random word
// embeddings with random amounts of trailing padding paired with random
// palettes. Swap `synthetic_batches` for real embedded captions to train a
// usable model.
//
//   cargo run --release --features clap,tracing-subscriber --example train-text2pal -- --epochs 20
use clap::Parser;
use palette_gan::{
    models::text2pal::{PaletteDecoderConfig, TextEncoderConfig, PALETTE_LEN},
    pipelines::text2pal::{init_models, Text2PalConfig},
    training::{data::TextPaletteBatch, text2pal},
    utils::ExecutionContext,
};
use tch::{Kind, Tensor};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// When set, use the CPU even if some CUDA devices are available.
    #[arg(long)]
    cpu: bool,

    #[arg(long, default_value_t = 20)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: i64,

    /// Number of synthetic batches per epoch.
    #[arg(long, default_value_t = 8)]
    n_batches: usize,

    /// Padded caption length, in words.
    #[arg(long, default_value_t = 12)]
    max_len: i64,

    #[arg(long, default_value_t = 150)]
    hidden_size: i64,

    #[arg(long, default_value_t = 5e-4)]
    lr: f64,

    #[arg(long, default_value_t = 100.)]
    lambda_sl1: f64,

    #[arg(long, default_value_t = 0.5)]
    lambda_kl: f64,

    #[arg(long, default_value_t = 1)]
    log_interval: usize,

    #[arg(long, default_value_t = 10)]
    checkpoint_every: usize,

    #[arg(long, default_value = "models")]
    save_dir: String,

    #[arg(long, default_value = "adv_sl1_kl")]
    loss_combination: String,

    #[arg(long, default_value_t = 42)]
    seed: i64,
}

fn setup_tracing() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn synthetic_batches(args: &Args, embed_dim: i64) -> anyhow::Result<Vec<TextPaletteBatch>> {
    let opts = (Kind::Float, tch::Device::Cpu);
    let int_opts = (Kind::Int64, tch::Device::Cpu);
    (0..args.n_batches)
        .map(|_| {
            let embeddings = Tensor::randn([args.batch_size, args.max_len, embed_dim], opts);
            // Every caption keeps at least one word.
            let lengths = Tensor::randint_low(1, args.max_len + 1, [args.batch_size, 1, 1], int_opts);
            let positions = Tensor::arange(args.max_len, int_opts).view([1, -1, 1]);
            let embeddings = embeddings * positions.lt_tensor(&lengths).to_kind(Kind::Float);
            let palettes = Tensor::rand([args.batch_size, PALETTE_LEN], opts);
            TextPaletteBatch::new(embeddings, palettes)
        })
        .collect()
}

fn run(args: Args) -> anyhow::Result<()> {
    tch::manual_seed(args.seed);
    let ctx = ExecutionContext::new(args.cpu);
    tracing::info!(device = ?ctx.device(), "starting text2pal training");

    let config = Text2PalConfig {
        encoder: TextEncoderConfig { hidden_size: args.hidden_size, ..Default::default() },
        decoder: PaletteDecoderConfig { hidden_size: args.hidden_size },
        learning_rate: args.lr,
        ..Default::default()
    };
    let batches = synthetic_batches(&args, config.encoder.embed_dim)?;
    let models = init_models(&ctx, config)?;
    let train_config = text2pal::TrainConfig {
        epochs: args.epochs,
        lambda_sl1: args.lambda_sl1,
        lambda_kl: args.lambda_kl,
        log_interval: args.log_interval,
        save_dir: args.save_dir.into(),
        loss_combination: args.loss_combination,
        checkpoint_every: args.checkpoint_every,
    };
    let mut trainer = text2pal::TrainGan::new(models, train_config);
    let summaries = trainer.train(&batches)?;
    if let Some(last) = summaries.last() {
        tracing::info!(d_loss = last.d_loss, g_loss = last.g_loss, "training done");
    }
    let dir = trainer.save_checkpoint()?;
    tracing::info!(dir = %dir.display(), "final checkpoint");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    setup_tracing()?;
    let args = Args::parse();
    run(args)
}
