// Adversarial training of the palette conditioned colorization networks.
//
// The batches are synthetic: random luminance and chrominance planes, a
// random side signal and a random palette. Replace `synthetic_batches` with
// Lab images and their extracted palettes for real training.
//
//   cargo run --release --features clap,tracing-subscriber --example train-pal2color -- --image-size 64
use clap::Parser;
use palette_gan::{
    models::{discriminator::input_channels, global_net::side_signal_channels},
    pipelines::pal2color::{init_models, Pal2ColorConfig},
    training::{data::ColorizationBatch, pal2color},
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

    #[arg(long, default_value_t = 5)]
    epochs: usize,

    #[arg(long, default_value_t = 4)]
    batch_size: i64,

    /// Number of synthetic batches per epoch.
    #[arg(long, default_value_t = 4)]
    n_batches: usize,

    /// One of 64, 128, 256 or 512.
    #[arg(long, default_value_t = 64)]
    image_size: i64,

    #[arg(long, default_value_t = 2e-4)]
    lr: f64,

    #[arg(long, default_value_t = 1e-7)]
    weight_decay: f64,

    #[arg(long, default_value_t = 100.)]
    lambda_sl1: f64,

    /// Also inject the side signal in the first two expansion stages.
    #[arg(long)]
    multi_injection: bool,

    /// Work in full Lab: longer side signal and palette, luminance shown to
    /// the discriminator.
    #[arg(long)]
    add_l: bool,

    #[arg(long, default_value_t = 1)]
    log_interval: usize,

    #[arg(long, default_value_t = 5)]
    checkpoint_every: usize,

    #[arg(long, default_value = "models/pal2color")]
    save_dir: String,

    #[arg(long, default_value_t = 42)]
    seed: i64,
}

fn setup_tracing() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn synthetic_batches(args: &Args) -> anyhow::Result<Vec<ColorizationBatch>> {
    let opts = (Kind::Float, tch::Device::Cpu);
    let (bsize, size) = (args.batch_size, args.image_size);
    let (_, palette_len) = input_channels(args.add_l);
    (0..args.n_batches)
        .map(|_| {
            ColorizationBatch::new(
                Tensor::rand([bsize, 1, size, size], opts),
                Tensor::rand([bsize, 2, size, size], opts),
                Tensor::rand([bsize, side_signal_channels(args.add_l)], opts),
                Tensor::rand([bsize, palette_len], opts),
            )
        })
        .collect()
}

fn run(args: Args) -> anyhow::Result<()> {
    tch::manual_seed(args.seed);
    let ctx = ExecutionContext::new(args.cpu);
    tracing::info!(device = ?ctx.device(), image_size = args.image_size, "starting pal2color training");

    let config = Pal2ColorConfig {
        batch_size: args.batch_size,
        image_size: args.image_size,
        learning_rate: args.lr,
        weight_decay: args.weight_decay,
        multi_injection: args.multi_injection,
        add_luminance_channel: args.add_l,
        ..Default::default()
    };
    let batches = synthetic_batches(&args)?;
    let models = init_models(&ctx, config)?;
    let train_config = pal2color::TrainConfig {
        epochs: args.epochs,
        lambda_sl1: args.lambda_sl1,
        log_interval: args.log_interval,
        save_dir: args.save_dir.into(),
        checkpoint_every: args.checkpoint_every,
    };
    let mut trainer = pal2color::TrainGan::new(models, train_config);
    let summaries = trainer.train(&batches)?;
    if let Some(last) = summaries.last() {
        tracing::info!(d_loss = last.d_loss, g_loss = last.g_loss, "training done");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    setup_tracing()?;
    let args = Args::parse();
    run(args)
}
