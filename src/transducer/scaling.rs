use candle::{Module, Result, Tensor};
use candle_nn::{Init, Linear, VarBuilder};
use tracing::debug;

use crate::error::Error;

/// An affine map `[..., in_features] -> [..., out_features]` that the joiner
/// composes. `forward` accepts inputs of rank 2 to 4.
pub trait Projection: Module + Send + Sync {
    fn load(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self>
    where
        Self: Sized;

    fn in_features(&self) -> usize;
    fn out_features(&self) -> usize;
}

impl Projection for Linear {
    fn load(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        candle_nn::linear(in_features, out_features, vb)
    }

    fn in_features(&self) -> usize {
        self.weight().dims()[1]
    }

    fn out_features(&self) -> usize {
        self.weight().dims()[0]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaledLinearConfig {
    pub initial_scale: f64,
    pub initial_speed: f64,
}

impl Default for ScaledLinearConfig {
    fn default() -> Self {
        Self {
            initial_scale: 1.0,
            initial_speed: 1.0,
        }
    }
}

impl ScaledLinearConfig {
    pub fn validate(&self) -> std::result::Result<(), Error> {
        for (name, value) in [
            ("initial_scale", self.initial_scale),
            ("initial_speed", self.initial_speed),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidScaling { name, value });
            }
        }
        Ok(())
    }
}

/// Linear layer whose weight and bias carry a learned log-space scale.
///
/// The effective parameters are `weight * exp(weight_scale)` and
/// `bias * exp(bias_scale)`. A fresh layer draws its raw weight with a small
/// fixed std and compensates through `weight_scale`, so the effective weight
/// starts out with std `initial_scale / sqrt(fan_in)`.
#[derive(Clone, Debug)]
pub struct ScaledLinear {
    weight: Tensor,
    bias: Tensor,
    weight_scale: Tensor,
    bias_scale: Tensor,
}

impl ScaledLinear {
    pub fn new(
        in_features: usize,
        out_features: usize,
        cfg: ScaledLinearConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        cfg.validate().map_err(candle::Error::wrap)?;

        let std = 0.1 / cfg.initial_speed;
        let bound = 3f64.sqrt() * std;
        let fan_in = in_features as f64;
        let log_scale = cfg.initial_scale.ln();

        let weight = vb.get_with_hints(
            (out_features, in_features),
            "weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let bias = vb.get_with_hints(out_features, "bias", Init::Const(0.0))?;
        let weight_scale = vb.get_with_hints(
            (),
            "weight_scale",
            Init::Const(log_scale + (fan_in.powf(-0.5) / std).ln()),
        )?;
        let bias_scale = vb.get_with_hints((), "bias_scale", Init::Const(log_scale))?;

        debug!(in_features, out_features, prefix = %vb.prefix(), "scaled linear");

        Ok(Self {
            weight,
            bias,
            weight_scale,
            bias_scale,
        })
    }

    pub fn weight(&self) -> Result<Tensor> {
        self.weight.broadcast_mul(&self.weight_scale.exp()?)
    }

    pub fn bias(&self) -> Result<Tensor> {
        self.bias.broadcast_mul(&self.bias_scale.exp()?)
    }

    /// Bakes the scales into a plain [`Linear`] for inference.
    pub fn fold(&self) -> Result<Linear> {
        Ok(Linear::new(self.weight()?, Some(self.bias()?)))
    }
}

impl Module for ScaledLinear {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.fold()?.forward(x)
    }
}

impl Projection for ScaledLinear {
    fn load(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        Self::new(in_features, out_features, ScaledLinearConfig::default(), vb)
    }

    fn in_features(&self) -> usize {
        self.weight.dims()[1]
    }

    fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }
}
