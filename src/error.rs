use serde::Deserialize;
use thiserror::Error;

pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Rejections produced locally, before anything touches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select a file smaller than {}", human_size(.max))]
    FileTooLarge { size: u64, max: u64 },
    #[error("Please select an audio file (got {0})")]
    UnsupportedType(String),
    #[error("Please select an audio file shorter than {max_secs} seconds")]
    TooLong { duration_ms: u64, max_secs: u64 },
    #[error("Could not verify audio duration: {0}")]
    ProbeFailed(String),
    #[error("Please provide a title and select a file")]
    MissingTitleOrFile,
    #[error("Title must be {max} characters or less")]
    TitleTooLong { len: usize, max: usize },
    #[error("Username is required")]
    UsernameRequired,
    #[error("Username must be at least {0} characters")]
    UsernameTooShort(usize),
    #[error("Email is required")]
    EmailRequired,
    #[error("Password is required")]
    PasswordRequired,
    #[error("Password must be at least {0} characters")]
    PasswordTooShort(usize),
}

impl ValidationError {
    /// Short headline used when the error is shown as a notification.
    pub fn title(&self) -> &'static str {
        match self {
            ValidationError::FileTooLarge { .. } => "File too large",
            ValidationError::UnsupportedType(_) => "Invalid file type",
            ValidationError::TooLong { .. } => "Audio too long",
            ValidationError::ProbeFailed(_) => "Error checking audio",
            _ => "Error",
        }
    }
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unsupported audio format: {0}")]
    Unsupported(String),
    #[error("no playable audio track")]
    NoTrack,
    #[error("failed to decode audio: {0}")]
    Decode(String),
    #[error("audio device error: {0}")]
    Device(String),
}

impl From<symphonia::core::errors::Error> for AudioError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error as SymphoniaError;
        match e {
            SymphoniaError::Unsupported(what) => AudioError::Unsupported(what.to_string()),
            other => AudioError::Decode(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Server {
        status: u16,
        message: String,
        code: Option<String>,
    },
    #[error("storage transfer failed with status {status}")]
    Storage { status: u16 },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("another request is already in progress")]
    Busy,
    #[error("the session is still being restored")]
    SessionLoading,
    #[error("request cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(e.to_string())
    }
}

/// Error body shapes the API is known to send.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<ErrorField>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Text(String),
    Detail {
        message: Option<String>,
        code: Option<String>,
    },
}

impl ClientError {
    /// Map a non-2xx response to an error, preferring the server's own message
    /// except on 403.
    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let (detail_message, detail_code) = match parsed.error {
            Some(ErrorField::Text(text)) => (Some(text), None),
            Some(ErrorField::Detail { message, code }) => (message, code),
            None => (None, None),
        };
        let message = parsed
            .message
            .or(detail_message)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_message(status).to_string());
        let code = parsed.code.or(detail_code);

        match status {
            401 => ClientError::Unauthorized(message),
            // Always the fixed permission text, whatever the body says.
            403 => ClientError::Forbidden(default_message(403).to_string()),
            404 => ClientError::NotFound(message),
            _ => ClientError::Server {
                status,
                message,
                code,
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Unauthorized(_) => Some(401),
            ClientError::Forbidden(_) => Some(403),
            ClientError::NotFound(_) => Some(404),
            ClientError::Server { status, .. } | ClientError::Storage { status } => Some(*status),
            ClientError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for errors that mean the credential itself was refused.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_) | ClientError::Forbidden(_))
    }
}

fn default_message(status: u16) -> &'static str {
    match status {
        401 => "Session expired. Please log in again.",
        403 => "You do not have permission to perform this action.",
        404 => "The requested resource was not found.",
        500 => "An unexpected server error occurred. Please try again later.",
        _ => GENERIC_ERROR_MESSAGE,
    }
}

fn human_size(bytes: &u64) -> String {
    const MB: u64 = 1024 * 1024;
    let bytes = *bytes;
    if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= 1024 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{bytes} bytes")
    }
}
