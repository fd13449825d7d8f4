use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinerConfig {
    pub encoder_dim: usize,
    pub decoder_dim: usize,
    pub joiner_dim: usize,
    pub vocab_size: usize,
}

impl Default for JoinerConfig {
    fn default() -> Self {
        Self {
            encoder_dim: 512,
            decoder_dim: 512,
            joiner_dim: 512,
            vocab_size: 500,
        }
    }
}

impl JoinerConfig {
    pub fn new(
        encoder_dim: usize,
        decoder_dim: usize,
        joiner_dim: usize,
        vocab_size: usize,
    ) -> Self {
        Self {
            encoder_dim,
            decoder_dim,
            joiner_dim,
            vocab_size,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = std::fs::read_to_string(path)?;
        let config: JoinerConfig = serde_json::from_str(&config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), Error> {
        for (name, value) in [
            ("encoder_dim", self.encoder_dim),
            ("decoder_dim", self.decoder_dim),
            ("joiner_dim", self.joiner_dim),
            ("vocab_size", self.vocab_size),
        ] {
            if value == 0 {
                return Err(Error::InvalidDimension { name, value });
            }
        }
        Ok(())
    }

    /// Learned parameter count. Scaled layers add two scalars each.
    pub fn num_parameters(&self, scaled: bool) -> usize {
        let affine = |i: usize, o: usize| i * o + o + if scaled { 2 } else { 0 };
        affine(self.encoder_dim, self.joiner_dim)
            + affine(self.decoder_dim, self.joiner_dim)
            + affine(self.joiner_dim, self.vocab_size)
    }
}
