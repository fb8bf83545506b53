use thiserror::Error;

/**
    Non-success result of a queue suspension point.

    Together with `Ok` this forms the tri-state every blocking call returns.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,

    #[error("queue was aborted")]
    Aborted,
}

/**
    Result of driving a codec collaborator.
*/
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input not consumed or no output ready yet; retry after the other side moves.
    #[error("codec needs another call before it can progress")]
    Again,

    /// The codec was drained and will produce no more output.
    #[error("codec drained")]
    Eof,

    #[error(transparent)]
    Failed(#[from] playback_types::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("playback was aborted")]
    Aborted,

    #[error("end of stream")]
    Eof,

    #[error(transparent)]
    Media(#[from] playback_types::Error),

    #[error("codec failure: {0}")]
    Codec(CodecError),

    #[error("invalid audio device parameters: {0}")]
    InvalidAudioParams(String),

    #[error("unknown option: {0}")]
    UnknownOption(String),

    #[error("invalid value {value:?} for option {key}")]
    InvalidOption { key: String, value: String },

    #[error("invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl From<CodecError> for EngineError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Eof => Self::Eof,
            other => Self::Codec(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_eof_maps_to_engine_eof() {
        assert!(matches!(EngineError::from(CodecError::Eof), EngineError::Eof));
        assert!(matches!(
            EngineError::from(CodecError::Again),
            EngineError::Codec(CodecError::Again)
        ));
    }

    #[test]
    fn option_error_display() {
        let e = EngineError::InvalidOption {
            key: "sync".into(),
            value: "wall".into(),
        };
        assert_eq!(e.to_string(), "invalid value \"wall\" for option sync");
    }
}
