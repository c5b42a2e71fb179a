/// Result alias that carries the custom [`VisualiserError`] type.
pub type Result<T> = std::result::Result<T, VisualiserError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VisualiserError {
    /// Free-form failure with a readable message.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The external decoder binary could not be launched.
    #[error("decoder `{program}` is unavailable: {source}")]
    DecoderUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// No usable capture device, or the device refused the stream.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Configuration values that parse but make no sense.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// A frame reached the normalizer with the wrong number of samples.
    #[error("frame holds {actual} samples, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl VisualiserError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// True for failures raised while acquiring the audio source.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DecoderUnavailable { .. } | Self::DeviceUnavailable(_)
        )
    }
}

impl From<&str> for VisualiserError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VisualiserError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
