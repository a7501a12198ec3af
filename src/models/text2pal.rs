//! Text to palette generation.
//!
//! A recurrent encoder summarizes padded word embeddings. Its final state goes
//! through conditioning augmentation (a Gaussian with learned mean and
//! log-variance) to seed an attention decoder that emits one RGB colour per
//! step. A small discriminator scores palettes against the mean encoder
//! output of their text.
use crate::models::conv_block::Activation;
use crate::utils::linear_config;
use tch::{nn, nn::Module, nn::RNN, Kind, Tensor};

/// Number of colours in a palette.
pub const PALETTE_COLORS: i64 = 5;
/// Number of scalars in a palette, three per colour.
pub const PALETTE_LEN: i64 = 3 * PALETTE_COLORS;

/// Var store paths of the two halves of the palette generator.
pub const ENCODER_PREFIX: &str = "encoder";
pub const DECODER_PREFIX: &str = "decoder";

/// Value of the start token fed to the first decoding step.
const START_TOKEN: f64 = 0.;

#[derive(Debug, Clone, Copy)]
pub struct TextEncoderConfig {
    pub embed_dim: i64,
    pub hidden_size: i64,
}

impl Default for TextEncoderConfig {
    fn default() -> Self {
        Self { embed_dim: 300, hidden_size: 150 }
    }
}

#[derive(Debug)]
pub struct EncoderOutput {
    /// Per token outputs, `(seq_len, batch, hidden)`.
    pub outputs: Tensor,
    /// Initial decoder state sampled around `mu`, `(1, batch, hidden)`.
    pub hidden: Tensor,
    pub mu: Tensor,
    pub logvar: Tensor,
}

#[derive(Debug)]
pub struct TextEncoder {
    gru: nn::GRU,
    ca: nn::Linear,
    hidden_size: i64,
}

impl TextEncoder {
    pub fn new(vs: nn::Path, config: TextEncoderConfig) -> Self {
        let gru = nn::gru(&vs / "gru", config.embed_dim, config.hidden_size, Default::default());
        let ca = nn::linear(&vs / "ca", config.hidden_size, 2 * config.hidden_size, linear_config());
        Self { gru, ca, hidden_size: config.hidden_size }
    }

    pub fn hidden_size(&self) -> i64 {
        self.hidden_size
    }

    pub fn init_hidden(&self, batch_size: i64) -> Tensor {
        self.gru.zero_state(batch_size).0
    }

    /// Encodes `(batch, seq_len, embed_dim)` embeddings. The decoder state is
    /// `mu + eps * exp(logvar / 2)` when training and `mu` otherwise.
    pub fn forward_t(&self, embeddings: &Tensor, hidden: &Tensor, train: bool) -> EncoderOutput {
        let (outputs, nn::GRUState(last)) =
            self.gru.seq_init(embeddings, &nn::GRUState(hidden.shallow_clone()));
        let ca = last.select(0, -1).apply(&self.ca).relu();
        let mu = ca.narrow(1, 0, self.hidden_size);
        let logvar = ca.narrow(1, self.hidden_size, self.hidden_size);
        let c = if train {
            let std = (&logvar * 0.5).exp();
            &mu + std.randn_like() * std
        } else {
            mu.shallow_clone()
        };
        EncoderOutput { outputs: outputs.transpose(0, 1), hidden: c.unsqueeze(0), mu, logvar }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PaletteDecoderConfig {
    pub hidden_size: i64,
}

impl Default for PaletteDecoderConfig {
    fn default() -> Self {
        Self { hidden_size: 150 }
    }
}

#[derive(Debug)]
pub struct DecoderStep {
    /// The colour emitted by this step, `(batch, 3)`.
    pub color: Tensor,
    pub context: Tensor,
    pub hidden: Tensor,
    /// Attention weights over the input tokens, `(batch, seq_len)`.
    pub attention: Tensor,
}

#[derive(Debug)]
pub struct PaletteDecoder {
    gru: nn::GRU,
    attn: nn::Linear,
    out: nn::Linear,
}

impl PaletteDecoder {
    pub fn new(vs: nn::Path, config: PaletteDecoderConfig) -> Self {
        let hidden_size = config.hidden_size;
        let gru = nn::gru(&vs / "gru", 3 + hidden_size, hidden_size, Default::default());
        let attn = nn::linear(&vs / "attn", hidden_size, hidden_size, linear_config());
        let out = nn::linear(&vs / "out", 2 * hidden_size, 3, linear_config());
        Self { gru, attn, out }
    }

    /// One decoding step. `mask` is a `(batch, seq_len)` boolean tensor that is
    /// true on the non-padding tokens, attention never looks at the others.
    pub fn step(
        &self,
        color: &Tensor,
        context: &Tensor,
        hidden: &Tensor,
        encoder_outputs: &Tensor,
        mask: &Tensor,
    ) -> DecoderStep {
        let input = Tensor::cat(&[color, context], 1);
        let nn::GRUState(hidden) = self.gru.step(&input, &nn::GRUState(hidden.shallow_clone()));
        let h = hidden.select(0, -1);
        let encoder_outputs = encoder_outputs.transpose(0, 1);
        let energies = encoder_outputs.bmm(&h.apply(&self.attn).unsqueeze(-1)).squeeze_dim(-1);
        let attention = energies
            .masked_fill(&mask.logical_not(), f64::NEG_INFINITY)
            .softmax(-1, Kind::Float);
        let context = attention.unsqueeze(1).bmm(&encoder_outputs).squeeze_dim(1);
        let color = Tensor::cat(&[&h, &context], 1).apply(&self.out).sigmoid();
        DecoderStep { color, context, hidden, attention }
    }
}

#[derive(Debug)]
pub struct GeneratedPalettes {
    /// `(batch, 15)`, colour `i` lives in columns `3i..3i+3`.
    pub palettes: Tensor,
    /// The colour emitted by every decoding step, in order.
    pub steps: Vec<Tensor>,
    pub mu: Tensor,
    pub logvar: Tensor,
    /// Mean encoder output over the non-padding tokens, `(batch, hidden)`.
    pub text_summary: Tensor,
}

/// The palette generator: the text encoder followed by the attention decoder.
#[derive(Debug)]
pub struct Text2Palette {
    pub encoder: TextEncoder,
    pub decoder: PaletteDecoder,
}

impl Text2Palette {
    pub fn new(
        vs: &nn::Path,
        encoder: TextEncoderConfig,
        decoder: PaletteDecoderConfig,
    ) -> anyhow::Result<Self> {
        if encoder.hidden_size != decoder.hidden_size {
            anyhow::bail!(
                "encoder hidden size {} differs from decoder hidden size {}",
                encoder.hidden_size,
                decoder.hidden_size
            )
        }
        let encoder = TextEncoder::new(vs / ENCODER_PREFIX, encoder);
        let decoder = PaletteDecoder::new(vs / DECODER_PREFIX, decoder);
        Ok(Self { encoder, decoder })
    }

    /// Runs the encoder then the decoder for one step per colour, each step
    /// consuming the previous colour (a start token for the first one).
    /// `lengths` holds the number of non-padding tokens of each sample.
    pub fn generate(
        &self,
        embeddings: &Tensor,
        mask: &Tensor,
        lengths: &Tensor,
        train: bool,
    ) -> GeneratedPalettes {
        let batch_size = embeddings.size()[0];
        let hidden_size = self.encoder.hidden_size();
        let options = (Kind::Float, embeddings.device());

        let encoder_hidden = self.encoder.init_hidden(batch_size);
        let EncoderOutput { outputs, hidden, mu, logvar } =
            self.encoder.forward_t(embeddings, &encoder_hidden, train);

        let mut color = Tensor::full([batch_size, 3], START_TOKEN, options);
        let mut context = Tensor::zeros([batch_size, hidden_size], options);
        let mut hidden = hidden;
        let mut steps = Vec::with_capacity(PALETTE_COLORS as usize);
        for _ in 0..PALETTE_COLORS {
            let step = self.decoder.step(&color, &context, &hidden, &outputs, mask);
            color = step.color;
            context = step.context;
            hidden = step.hidden;
            steps.push(color.shallow_clone());
        }
        let palettes = Tensor::cat(&steps, 1);

        let valid = mask.transpose(0, 1).unsqueeze(-1).to_kind(Kind::Float);
        let text_summary = (outputs * valid).sum_dim_intlist([0].as_slice(), false, Kind::Float)
            / lengths.to_kind(Kind::Float).unsqueeze(1);
        GeneratedPalettes { palettes, steps, mu, logvar, text_summary }
    }
}

#[derive(Debug)]
pub struct PaletteDiscriminator {
    fc1: nn::Linear,
    fc2: nn::Linear,
    activation: Activation,
}

impl PaletteDiscriminator {
    pub fn new(vs: nn::Path, hidden_size: i64) -> Self {
        let fc1 = nn::linear(&vs / "fc1", PALETTE_LEN + hidden_size, hidden_size, linear_config());
        let fc2 = nn::linear(&vs / "fc2", hidden_size, 1, linear_config());
        Self { fc1, fc2, activation: Activation::LeakyRelu(0.2) }
    }

    /// Realism probability of each `(batch, 15)` palette given its text summary.
    pub fn forward(&self, palettes: &Tensor, text_summary: &Tensor) -> Tensor {
        let xs = Tensor::cat(&[palettes, text_summary], 1).apply(&self.fc1);
        self.activation.forward(&xs).apply(&self.fc2).sigmoid().squeeze_dim(-1)
    }
}
