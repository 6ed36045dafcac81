use thiserror::Error;

/// Failures raised by the audio side of a session: devices and codec.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Microphone or speaker could not be opened (missing device, permission denied,
    /// unsupported rate).
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A wire blob that is not valid transport encoding.
    #[error("malformed audio payload: {0}")]
    MalformedPayload(String),
    /// Raw bytes that cannot be read as 16-bit PCM with the requested layout.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
    /// Device read/write failed after recovery attempts.
    #[error("audio device I/O error: {0}")]
    Io(String),
}

impl AudioError {
    /// Per-segment failures are dropped and the session keeps going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AudioError::MalformedPayload(_) | AudioError::UnsupportedFormat(_)
        )
    }
}

impl From<alsa::Error> for AudioError {
    fn from(e: alsa::Error) -> Self {
        AudioError::Io(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no API credential configured")]
    MissingCredential,
    #[error("a session is already connecting or connected")]
    AlreadyActive,
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("channel error: {0}")]
    Channel(String),
}

impl SessionError {
    /// Short text shown to the learner next to the Error state.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::MissingCredential => "API Key is missing.".to_string(),
            SessionError::AlreadyActive => "A session is already running.".to_string(),
            SessionError::Audio(AudioError::DeviceUnavailable(_)) => {
                "Microphone or speaker is unavailable.".to_string()
            }
            SessionError::Audio(e) => format!("Audio error: {}", e),
            SessionError::Channel(msg) if msg.is_empty() => "Connection error occurred.".to_string(),
            SessionError::Channel(msg) => format!("Connection error occurred: {}", msg),
        }
    }
}
