//! Agent error taxonomy
//!
//! Every failure the registration cycle can hit is one of these variants.
//! Transport failures carry a [`TransportKind`] so the retry driver can tell a
//! peer reset apart from a refused or timed-out connection.

use std::fmt;
use std::io;

use thiserror::Error;

pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// Classification of a failed exchange at the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Peer closed or reset the connection mid-exchange.
    Reset,
    /// Nothing is listening at the target address.
    Refused,
    /// Connect or request deadline elapsed.
    Timeout,
    Other,
}

impl TransportKind {
    /// Classify a reqwest failure by walking its source chain.
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportKind::Timeout;
        }
        Self::from_chain(err)
    }

    /// Classify a bollard failure that never got a docker response.
    pub fn classify_docker(err: &bollard::errors::Error) -> Self {
        use bollard::errors::Error as DockerError;

        match err {
            DockerError::RequestTimeoutError => TransportKind::Timeout,
            DockerError::HyperResponseError { err } => Self::from_chain(err),
            DockerError::IOError { err } => Self::from_io_kind(err.kind()),
            _ => TransportKind::Other,
        }
    }

    fn from_chain(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut cause = Some(err);
        while let Some(current) = cause {
            if let Some(io_err) = current.downcast_ref::<io::Error>() {
                match Self::from_io_kind(io_err.kind()) {
                    TransportKind::Other => {}
                    kind => return kind,
                }
            }
            if let Some(hyper_err) = current.downcast_ref::<hyper::Error>() {
                // hyper reports a peer that hung up before answering this way
                if hyper_err.is_incomplete_message() {
                    return TransportKind::Reset;
                }
                if hyper_err.is_timeout() {
                    return TransportKind::Timeout;
                }
            }
            cause = current.source();
        }

        TransportKind::Other
    }

    fn from_io_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportKind::Reset,
            io::ErrorKind::ConnectionRefused => TransportKind::Refused,
            io::ErrorKind::TimedOut => TransportKind::Timeout,
            _ => TransportKind::Other,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Reset => write!(f, "connection reset"),
            TransportKind::Refused => write!(f, "connection refused"),
            TransportKind::Timeout => write!(f, "timeout"),
            TransportKind::Other => write!(f, "transport error"),
        }
    }
}

/// Shape of the last request sent to a peer, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: &'static str,
    pub path: String,
    pub data: Option<String>,
    pub target: String,
}

impl RequestInfo {
    pub fn get(target: &str, path: &str) -> Self {
        Self {
            method: "GET",
            path: path.to_string(),
            data: None,
            target: target.to_string(),
        }
    }

    pub fn post(target: &str, path: &str) -> Self {
        Self {
            method: "POST",
            path: path.to_string(),
            data: None,
            target: target.to_string(),
        }
    }

    /// Full URL of the request, as it would appear in a browser.
    pub fn url(&self) -> String {
        format!("http://{}{}", self.target, self.path)
    }
}

impl fmt::Display for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{method: {}, path: {}", self.method, self.path)?;
        if let Some(data) = &self.data {
            write!(f, ", data: {}", data)?;
        }
        write!(f, ", target: {}}}", self.target)
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    /// Connection could not be opened, or broke mid-exchange
    #[error("{kind} on {request}: {source}")]
    Transport {
        kind: TransportKind,
        request: RequestInfo,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Peer answered with a non-success status
    #[error("Invalid response: {status} {reason} from {request}\n\n{body}")]
    Protocol {
        status: u16,
        reason: String,
        request: RequestInfo,
        body: String,
    },

    /// Manager rejected the node secret
    #[error(
        "Server {} requires authorization, specify correct 'secret'.\n\n{body}",
        .request.url()
    )]
    Unauthorized { request: RequestInfo, body: String },

    /// Peer answered with a body that could not be decoded
    #[error("Malformed response from {request}: {reason}")]
    Decode { request: RequestInfo, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("System metrics unavailable: {0}")]
    Sampling(String),

    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl AgentError {
    pub fn transport(source: reqwest::Error, request: RequestInfo) -> Self {
        AgentError::Transport {
            kind: TransportKind::classify(&source),
            request,
            source: Box::new(source),
        }
    }

    /// Map a bollard failure onto the taxonomy, keeping the request context.
    pub fn docker(err: bollard::errors::Error, request: RequestInfo) -> Self {
        use bollard::errors::Error as DockerError;

        match err {
            DockerError::DockerResponseServerError {
                status_code,
                message,
            } => AgentError::Protocol {
                status: status_code,
                reason: reqwest::StatusCode::from_u16(status_code)
                    .ok()
                    .and_then(|status| status.canonical_reason())
                    .unwrap_or_default()
                    .to_string(),
                request,
                body: message,
            },
            DockerError::JsonDataError { message, .. } => AgentError::Decode {
                request,
                reason: message,
            },
            DockerError::JsonSerdeError { err } => AgentError::Decode {
                request,
                reason: err.to_string(),
            },
            err => AgentError::Transport {
                kind: TransportKind::classify_docker(&err),
                request,
                source: Box::new(err),
            },
        }
    }

    /// Transport classification, if this is a transport failure.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        match self {
            AgentError::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when the peer reset the connection; the only failure retried immediately.
    pub fn is_reset(&self) -> bool {
        self.transport_kind() == Some(TransportKind::Reset)
    }
}
