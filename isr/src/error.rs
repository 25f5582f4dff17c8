use thiserror::Error;

use crate::pipeline::IsrStage;

/// Errors produced by the instrument signature removal core.
#[derive(Error, Debug)]
pub enum IsrError {
    /// A statistic was requested over an empty or fully masked pixel set.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// An overscan fit family name was not recognized.
    #[error("unknown overscan fit type: {0}")]
    UnknownFitType(String),

    /// A flat scaling mode name was not recognized.
    #[error("unknown scaling mode: {0}")]
    UnknownScalingMode(String),

    /// Two planes that must share a pixel grid do not.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Description of the expected grid.
        expected: String,
        /// Description of the grid that was supplied.
        actual: String,
    },

    /// Unparsable section string or an empty/inverted box.
    #[error("malformed region: {0}")]
    MalformedRegion(String),

    /// A correction that exists in name only.
    #[error("{0} is not implemented")]
    UnsupportedOperation(String),

    /// A numeric parameter is outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// All 32 mask bits are already assigned.
    #[error("no free mask bit for plane {0}")]
    MaskPlanesExhausted(String),

    /// A required metadata keyword is absent.
    #[error("missing metadata keyword {0}")]
    MissingMetadata(String),

    /// A correction stage was requested out of order.
    #[error("cannot enter stage {requested:?} from stage {current:?}")]
    StageOrder {
        /// Stage the amplifier is currently in.
        current: IsrStage,
        /// Stage that was requested.
        requested: IsrStage,
    },

    /// Failure inside one correction stage of one amplifier.
    #[error("amplifier {amp}, stage {stage:?}: {source}")]
    Stage {
        /// Amplifier name.
        amp: String,
        /// Stage that failed.
        stage: IsrStage,
        /// Underlying failure.
        #[source]
        source: Box<IsrError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IsrError {
    /// The underlying error, looking through any stage wrappers.
    pub fn innermost(&self) -> &IsrError {
        match self {
            IsrError::Stage { source, .. } => source.innermost(),
            other => other,
        }
    }

    pub(crate) fn dimension_mismatch(
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        IsrError::DimensionMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IsrError>;
