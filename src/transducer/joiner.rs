use candle::Tensor;
use candle_nn::{Linear, VarBuilder};
use tracing::debug;

use crate::{
    error::{Error, Result},
    transducer::{
        config::JoinerConfig,
        scaling::{Projection, ScaledLinear},
    },
};

/// Combines encoder and decoder frames into vocabulary logits.
///
/// Both inputs are `(N, T, s_range, C)`. Each stream goes through its own
/// projection into the joint space, the sum passes through `tanh`, and
/// `output_linear` maps it to `(N, T, s_range, vocab_size)`.
#[derive(Clone, Debug)]
pub struct Joiner<P: Projection = ScaledLinear> {
    config: JoinerConfig,
    encoder_proj: P,
    decoder_proj: P,
    output_linear: P,
}

impl<P: Projection> Joiner<P> {
    pub fn new(config: &JoinerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let encoder_proj = P::load(config.encoder_dim, config.joiner_dim, vb.pp("encoder_proj"))?;
        let decoder_proj = P::load(config.decoder_dim, config.joiner_dim, vb.pp("decoder_proj"))?;
        let output_linear = P::load(config.joiner_dim, config.vocab_size, vb.pp("output_linear"))?;

        debug!(?config, "joiner");

        Ok(Self {
            config: *config,
            encoder_proj,
            decoder_proj,
            output_linear,
        })
    }

    pub fn config(&self) -> &JoinerConfig {
        &self.config
    }

    pub fn forward(&self, encoder_out: &Tensor, decoder_out: &Tensor) -> Result<Tensor> {
        check_pair(encoder_out, decoder_out)?;
        check_width("encoder_out", encoder_out, self.encoder_proj.in_features())?;
        check_width("decoder_out", decoder_out, self.decoder_proj.in_features())?;

        let x = self.encoder_proj.forward(encoder_out)?;
        let y = self.decoder_proj.forward(decoder_out)?;
        self.join(&x, &y)
    }

    /// Runs only the output half of [`Joiner::forward`] on inputs already
    /// passed through [`Joiner::project_encoder`] and [`Joiner::project_decoder`].
    pub fn forward_projected(
        &self,
        projected_encoder: &Tensor,
        projected_decoder: &Tensor,
    ) -> Result<Tensor> {
        check_pair(projected_encoder, projected_decoder)?;
        check_width("projected_encoder", projected_encoder, self.config.joiner_dim)?;
        check_width("projected_decoder", projected_decoder, self.config.joiner_dim)?;

        self.join(projected_encoder, projected_decoder)
    }

    pub fn project_encoder(&self, encoder_out: &Tensor) -> Result<Tensor> {
        check_width("encoder_out", encoder_out, self.encoder_proj.in_features())?;
        Ok(self.encoder_proj.forward(encoder_out)?)
    }

    pub fn project_decoder(&self, decoder_out: &Tensor) -> Result<Tensor> {
        check_width("decoder_out", decoder_out, self.decoder_proj.in_features())?;
        Ok(self.decoder_proj.forward(decoder_out)?)
    }

    fn join(&self, x: &Tensor, y: &Tensor) -> Result<Tensor> {
        let x = (x + y)?;
        let x = x.tanh()?;
        let x = self.output_linear.forward(&x)?;

        Ok(x)
    }
}

impl Joiner<ScaledLinear> {
    pub fn fold(&self) -> Result<Joiner<Linear>> {
        Ok(Joiner {
            config: self.config,
            encoder_proj: self.encoder_proj.fold()?,
            decoder_proj: self.decoder_proj.fold()?,
            output_linear: self.output_linear.fold()?,
        })
    }
}

fn check_pair(encoder: &Tensor, decoder: &Tensor) -> Result<()> {
    if encoder.rank() != 4 || decoder.rank() != 4 {
        return Err(Error::Rank {
            encoder: encoder.dims().to_vec(),
            decoder: decoder.dims().to_vec(),
        });
    }
    if encoder.dims()[..3] != decoder.dims()[..3] {
        return Err(Error::ShapeMismatch {
            encoder: encoder.dims().to_vec(),
            decoder: decoder.dims().to_vec(),
        });
    }
    Ok(())
}

fn check_width(input: &'static str, x: &Tensor, expected: usize) -> Result<()> {
    match x.dims() {
        [_, .., actual] if x.rank() <= 4 && *actual == expected => Ok(()),
        [_, .., actual] if x.rank() <= 4 => Err(Error::FeatureWidth {
            input,
            expected,
            actual: *actual,
        }),
        dims => Err(Error::InputRank {
            input,
            dims: dims.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use candle::{DType, Device, Tensor};
    use candle_nn::VarBuilder;

    use super::*;

    fn zero_joiner() -> Joiner {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        Joiner::new(&JoinerConfig::new(4, 4, 3, 5), vb).unwrap()
    }

    #[test]
    fn zero_weights_give_zero_logits() -> Result<()> {
        let joiner = zero_joiner();
        let x = Tensor::zeros((1, 1, 1, 4), DType::F32, &Device::Cpu)?;
        let logits = joiner.forward(&x, &x)?;

        assert_eq!(logits.dims(), &[1, 1, 1, 5]);
        assert_eq!(logits.flatten_all()?.to_vec1::<f32>()?, vec![0.0; 5]);
        Ok(())
    }

    #[test]
    fn leading_dims_must_agree() -> Result<()> {
        let joiner = zero_joiner();
        let x = Tensor::zeros((2, 3, 4, 4), DType::F32, &Device::Cpu)?;
        let y = Tensor::zeros((2, 3, 5, 4), DType::F32, &Device::Cpu)?;

        let err = joiner.forward(&x, &y).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(err.is_precondition());
        Ok(())
    }

    #[test]
    fn projecting_wrong_width_fails() -> Result<()> {
        let joiner = zero_joiner();
        let x = Tensor::zeros((1, 7, 6), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            joiner.project_encoder(&x),
            Err(Error::FeatureWidth {
                input: "encoder_out",
                expected: 4,
                actual: 6
            })
        ));
        Ok(())
    }

    #[test]
    fn projecting_single_vector_is_a_precondition_error() -> Result<()> {
        let joiner = zero_joiner();
        let x = Tensor::zeros(4, DType::F32, &Device::Cpu)?;

        let err = joiner.project_encoder(&x).unwrap_err();
        assert!(matches!(err, Error::InputRank { input: "encoder_out", .. }));
        assert!(err.is_precondition());

        let x = Tensor::zeros((2, 4), DType::F32, &Device::Cpu)?;
        assert_eq!(joiner.project_decoder(&x)?.dims(), &[2, 3]);
        Ok(())
    }

    #[test]
    fn invalid_config_fails_before_loading() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let err = Joiner::<ScaledLinear>::new(&JoinerConfig::new(0, 4, 3, 5), vb).unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { name: "encoder_dim", .. }));
        assert!(!err.is_precondition());
    }
}
