use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{name} must be positive, got {value}")]
    InvalidDimension { name: &'static str, value: usize },

    #[error("{name} must be finite and positive, got {value}")]
    InvalidScaling { name: &'static str, value: f64 },

    #[error("expected 4-d encoder and decoder outputs, got {encoder:?} and {decoder:?}")]
    Rank {
        encoder: Vec<usize>,
        decoder: Vec<usize>,
    },

    #[error("encoder shape {encoder:?} does not match decoder shape {decoder:?}")]
    ShapeMismatch {
        encoder: Vec<usize>,
        decoder: Vec<usize>,
    },

    #[error("{input} must have rank 2 to 4, got {dims:?}")]
    InputRank { input: &'static str, dims: Vec<usize> },

    #[error("{input} expects last dimension {expected}, got {actual}")]
    FeatureWidth {
        input: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Candle(#[from] candle::Error),
}

impl Error {
    /// True for errors raised by the input checks of a forward call.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Rank { .. }
                | Self::ShapeMismatch { .. }
                | Self::InputRank { .. }
                | Self::FeatureWidth { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
