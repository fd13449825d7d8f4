//! Joiner network of a pruned RNN-T (transducer) model on top of candle.
//!
//! The [`Joiner`] projects encoder and decoder frames into a shared joint
//! space, adds them, applies `tanh` and maps the result to vocabulary logits.

pub mod common;
pub mod config;
pub mod error;
pub mod loader;
pub mod transducer;

pub use error::{Error, Result};
pub use transducer::{Joiner, JoinerConfig, Projection, ScaledLinear, ScaledLinearConfig};
