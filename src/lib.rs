//! # Palette conditioned colorization
//!
//! Adversarial networks for palette driven image colorization using Torch via
//! [tch-rs](https://github.com/LaurentMazare/tch-rs).
//!
//! This library includes:
//! - A U-Net colorization generator whose bottleneck, and optionally its
//!   expanding path, receives a global color side-signal.
//! - A PatchGAN discriminator conditioned on the target palette.
//! - A text to palette generator: GRU encoder with conditioning augmentation
//!   and an attention decoder emitting five colors.
//! - The alternating discriminator/generator training loops of both systems.

pub mod error;
pub mod models;
pub mod pipelines;
pub mod training;
pub mod utils;

pub use error::Error;
