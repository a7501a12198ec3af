//! # Pipelines
//!
//! Builders turning a hyperparameter record into networks and optimizers.

pub mod pal2color;
pub mod text2pal;
