mod config;
mod joiner;
mod scaling;

pub use config::JoinerConfig;
pub use joiner::Joiner;
pub use scaling::{Projection, ScaledLinear, ScaledLinearConfig};
