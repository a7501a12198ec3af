//! # Models
//!
//! Networks of the colorization GAN and of the text to palette GAN.

pub mod conv_block;
pub mod discriminator;
pub mod global_net;
pub mod text2pal;
pub mod unet;
