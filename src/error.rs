use std::{fmt, path::PathBuf, time::Duration};

use thiserror::Error;

/// A non-success response from the control plane, kept verbatim so the operator
/// can see what the server actually said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub status: u16,
    pub body: String,
}

impl ApiFailure {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The human readable messages carried by the response.
    ///
    /// Validation failures come back as `{"errors": {"<field>": [{"message": ".."}]}}`;
    /// anything else is reported as the raw body, or the bare status if the body is empty.
    pub fn messages(&self) -> Vec<String> {
        let field_messages = serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|value| value.get("errors").and_then(|e| e.as_object()).cloned())
            .map(|errors| {
                errors
                    .values()
                    .filter_map(|list| list.as_array())
                    .flatten()
                    .filter_map(|error| error.get("message").and_then(|m| m.as_str()))
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if !field_messages.is_empty() {
            field_messages
        } else if !self.body.trim().is_empty() {
            vec![self.body.trim().to_owned()]
        } else {
            vec![format!("HTTP status {}", self.status)]
        }
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.messages().join("; "))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("This server is not registered. Use the 'register' command to link it to your team.")]
    NotRegistered,
    #[error("The config file is missing the authentication token. You may need to re-register the server.")]
    MissingAuthToken,
    #[error("This server is already registered. If you've unregistered it from your team dashboard, you can delete {}", .0.display())]
    AlreadyRegistered(PathBuf),
    #[error("Invalid config file {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    #[error("The server rejected this server's credentials: {0}")]
    Authentication(ApiFailure),
    #[error("Registration failed: {0}")]
    Registration(ApiFailure),
    #[error("Certificate request rejected: {0}")]
    PkiRequest(ApiFailure),
    #[error("Server error {status}: {0}", status = .0.status)]
    Api(ApiFailure),

    #[error("Error reading private key at {}: {reason}", .path.display())]
    KeyParse { path: PathBuf, reason: String },
    #[error("{} is not a path to a writable file: {source}", .path.display())]
    KeyWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("The private key cannot sign a certificate request: {0}")]
    KeyMismatch(String),

    #[error("Gave up waiting for certificate approval after {0:?}")]
    PollTimeout(Duration),
    #[error("Unexpected response from the server: {0}")]
    UnexpectedResponse(String),
    #[error("{command} exited with status {status}")]
    Hook { command: String, status: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether running the same command again, unchanged, could succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_timeout() || e.is_connect(),
            Error::Api(failure) => failure.status >= 500,
            Error::PollTimeout(_) => true,
            _ => false,
        }
    }

    /// The lines to show the operator for this error.
    pub fn report(&self) -> Vec<String> {
        match self {
            Error::Authentication(failure)
            | Error::Registration(failure)
            | Error::PkiRequest(failure)
            | Error::Api(failure) => failure
                .messages()
                .into_iter()
                .map(|message| format!("Error: {}", message))
                .collect(),
            other => vec![other.to_string()],
        }
    }
}
