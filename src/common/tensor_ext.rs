use candle::{DType, Result, Tensor, shape::Dim};

pub trait TensorExt {
    fn float(&self) -> Result<Tensor>;
    fn scalar_mul(&self, value: f64) -> Result<Tensor>;
    fn softmax<D: Dim>(&self, dim: D) -> Result<Tensor>;
    fn max_abs_diff(&self, other: &Tensor) -> Result<f32>;
}

impl TensorExt for Tensor {
    fn float(&self) -> Result<Tensor> {
        self.to_dtype(DType::F32)
    }

    fn scalar_mul(&self, value: f64) -> Result<Tensor> {
        self * value
    }

    fn softmax<D: Dim>(&self, dim: D) -> Result<Tensor> {
        candle_nn::ops::softmax(self, dim)
    }

    fn max_abs_diff(&self, other: &Tensor) -> Result<f32> {
        self.float()?
            .sub(&other.float()?)?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use candle::{Device, Tensor};

    use super::TensorExt;

    #[test]
    fn max_abs_diff_picks_largest_gap() -> candle::Result<()> {
        let a = Tensor::new(&[[1.0f32, 2.0], [3.0, 4.0]], &Device::Cpu)?;
        let b = Tensor::new(&[[1.0f32, 2.5], [1.0, 4.0]], &Device::Cpu)?;
        assert_eq!(a.max_abs_diff(&b)?, 2.0);
        Ok(())
    }

    #[test]
    fn scalar_mul_scales_every_element() -> candle::Result<()> {
        let a = Tensor::new(&[1.0f32, -2.0], &Device::Cpu)?;
        assert_eq!(a.scalar_mul(3.0)?.to_vec1::<f32>()?, vec![3.0, -6.0]);
        Ok(())
    }
}
