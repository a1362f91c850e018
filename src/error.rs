use std::fmt;

/// Error type produced by connection backends.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A credential field, named the way it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    ServerHostname,
    HttpPath,
    AccessToken,
    ClientId,
    ClientSecret,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::ServerHostname => "server_hostname",
            Field::HttpPath => "http_path",
            Field::AccessToken => "access_token",
            Field::ClientId => "client_id",
            Field::ClientSecret => "client_secret",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required construction input was not supplied.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A credential field could not be produced.
    #[error("credential field {field} could not be resolved")]
    Resolution { field: Field },

    /// The secret store has no readable secret under this name.
    #[error("secret {name:?} not found or not accessible")]
    SecretNotFound {
        name: String,
        #[source]
        source: BackendError,
    },

    /// The token endpoint answered with a non-success status.
    #[error("token exchange failed ({status}): {body}")]
    AuthExchange {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The token endpoint answered 2xx without a usable `access_token`.
    #[error("token endpoint response is malformed: {reason}")]
    MalformedTokenResponse { reason: String },

    /// The backend refused or failed to open a connection.
    #[error("failed to connect to {hostname}")]
    Connection {
        hostname: String,
        #[source]
        source: BackendError,
    },

    /// The secret store answered with an error other than not found or denied.
    #[error("secret store request for {name:?} failed")]
    SecretStore {
        name: String,
        #[source]
        source: crate::credentials::SecretLookupError,
    },

    /// An HTTP request could not be sent or its body could not be read.
    #[error("{context}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The secret store's identity provider could not issue a token.
    #[error("identity provider failed: {message}")]
    Identity { message: String },

    /// The backend failed to run a statement.
    #[error("query failed")]
    Query(#[source] BackendError),

    /// The backend failed to release a connection.
    #[error("failed to close connection")]
    Close(#[source] BackendError),
}

impl Error {
    pub(crate) fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Transport {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn identity(message: impl Into<String>) -> Self {
        Error::Identity {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
