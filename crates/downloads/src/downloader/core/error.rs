//! Error types for the download manager with context and recovery information

use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;

use super::{DownloadId, DownloadStatus};

/// Failure reported by an [`HttpTransport`](super::HttpTransport) before or while
/// a response body is read
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed")]
    Request(#[from] reqwest::Error),

    #[error("connection I/O failed")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Comprehensive error types for the download manager
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Connection or read failure reported by the transport
    #[error("transport failure for '{uri}'")]
    Transport {
        uri: String,
        #[source]
        source: TransportError,
    },

    /// A status code the transfer cannot continue with
    #[error("unexpected HTTP status {status} from '{uri}'")]
    UnexpectedStatus { uri: String, status: u16 },

    /// A redirect carrying zero or several Location headers
    #[error("malformed redirect from '{uri}': expected one Location header, found {location_count}")]
    MalformedRedirect { uri: String, location_count: usize },

    #[error("redirect limit ({limit}) exceeded while resolving '{uri}'")]
    RedirectLimitExceeded { uri: String, limit: usize },

    /// 401 persisting after the one credentialed retry
    #[error("authentication rejected by '{uri}'")]
    Authentication { uri: String },

    /// The body did not match the announced length
    #[error("received {actual} bytes from '{uri}' but {expected} were announced")]
    UnexpectedLength {
        uri: String,
        expected: u64,
        actual: u64,
    },

    /// Metadata record could not be written, renamed or removed
    #[error("download record failed while {operation} '{path}'")]
    Persistence {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    /// Payload file operation failed
    #[error("file operation failed while {operation} '{path}'")]
    FileSystem {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    /// A persisted record that cannot be decoded
    #[error("corrupt download record '{path}': {reason}")]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("invalid URL '{url}': {suggestion}")]
    InvalidUrl {
        url: String,
        suggestion: String,
        #[source]
        source: url::ParseError,
    },

    #[error("download {id} is {status} and has no payload to take")]
    NotTakeable { id: DownloadId, status: DownloadStatus },

    #[error("unknown download {id}")]
    UnknownDownload { id: DownloadId },

    #[error("invalid configuration: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Types of file operations for error context
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Delete,
    Move,
    Metadata,
    CreateDir,
    Sync,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Create => write!(f, "creating"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Move => write!(f, "moving"),
            FileOperation::Metadata => write!(f, "reading metadata of"),
            FileOperation::CreateDir => write!(f, "creating directory"),
            FileOperation::Sync => write!(f, "syncing"),
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

impl DownloadError {
    pub(crate) fn file_system<P: Into<PathBuf>>(
        path: P,
        operation: FileOperation,
        source: std::io::Error,
    ) -> Self {
        DownloadError::FileSystem {
            path: path.into(),
            operation,
            source,
        }
    }

    pub(crate) fn persistence<P: Into<PathBuf>>(
        path: P,
        operation: FileOperation,
        source: std::io::Error,
    ) -> Self {
        DownloadError::Persistence {
            path: path.into(),
            operation,
            source,
        }
    }

    pub(crate) fn transport<S: Into<String>>(uri: S, source: TransportError) -> Self {
        DownloadError::Transport {
            uri: uri.into(),
            source,
        }
    }

    /// Build an `InvalidUrl` error with a hint matching the parse failure
    pub(crate) fn invalid_url<S: Into<String>>(url: S, error: url::ParseError) -> Self {
        let suggestion = match error {
            url::ParseError::EmptyHost => "URL must have a valid hostname",
            url::ParseError::InvalidPort => "Port number must be between 1 and 65535",
            url::ParseError::InvalidIpv4Address => "Invalid IPv4 address format",
            url::ParseError::InvalidIpv6Address => "Invalid IPv6 address format",
            url::ParseError::RelativeUrlWithoutBase => {
                "URL must be absolute (include http:// or https://)"
            }
            _ => "Check URL format and try again",
        }
        .to_string();

        DownloadError::InvalidUrl {
            url: url.into(),
            suggestion,
            source: error,
        }
    }

    /// Get error category for snapshots, metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            DownloadError::Transport { .. } => "transport",
            DownloadError::UnexpectedStatus { .. } => "unexpected_status",
            DownloadError::MalformedRedirect { .. } => "malformed_redirect",
            DownloadError::RedirectLimitExceeded { .. } => "redirect_limit",
            DownloadError::Authentication { .. } => "authentication",
            DownloadError::UnexpectedLength { .. } => "unexpected_length",
            DownloadError::Persistence { .. } => "persistence",
            DownloadError::FileSystem { .. } => "file_system",
            DownloadError::CorruptRecord { .. } => "corrupt_record",
            DownloadError::InvalidUrl { .. } => "invalid_url",
            DownloadError::NotTakeable { .. } => "not_takeable",
            DownloadError::UnknownDownload { .. } => "unknown_download",
            DownloadError::Configuration { .. } => "configuration",
        }
    }

    /// Whether the error comes from the remote side rather than from this machine
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            DownloadError::UnexpectedStatus { .. }
                | DownloadError::MalformedRedirect { .. }
                | DownloadError::RedirectLimitExceeded { .. }
                | DownloadError::UnexpectedLength { .. }
        )
    }

    /// Get severity level for error prioritization
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DownloadError::Transport { .. } => ErrorSeverity::Medium,
            DownloadError::UnexpectedStatus { .. } => ErrorSeverity::Medium,
            DownloadError::MalformedRedirect { .. } => ErrorSeverity::Medium,
            DownloadError::RedirectLimitExceeded { .. } => ErrorSeverity::Medium,
            DownloadError::Authentication { .. } => ErrorSeverity::High,
            DownloadError::UnexpectedLength { .. } => ErrorSeverity::Medium,
            DownloadError::Persistence { .. } => ErrorSeverity::Critical,
            DownloadError::FileSystem { .. } => ErrorSeverity::High,
            DownloadError::CorruptRecord { .. } => ErrorSeverity::Low,
            DownloadError::InvalidUrl { .. } => ErrorSeverity::High,
            DownloadError::NotTakeable { .. } => ErrorSeverity::Low,
            DownloadError::UnknownDownload { .. } => ErrorSeverity::Low,
            DownloadError::Configuration { .. } => ErrorSeverity::High,
        }
    }

    /// Get user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            DownloadError::Transport { .. } => {
                Some("Check your internet connection, then resume or re-enqueue the download")
            }
            DownloadError::Authentication { .. } => Some("Check the library card credentials"),
            DownloadError::RedirectLimitExceeded { .. } => {
                Some("The server redirects in a loop; try a different URL")
            }
            DownloadError::InvalidUrl { suggestion, .. } => Some(suggestion),
            DownloadError::Persistence { .. } | DownloadError::FileSystem { .. } => {
                Some("Check free space and permissions of the storage directory")
            }
            _ => None,
        }
    }

    /// Message including every cause in the source chain
    pub fn full_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }

    /// Create a detailed error report for debugging
    pub fn detailed_report(&self) -> String {
        let mut report = format!("Error: {}\n", self);
        report.push_str(&format!("Category: {}\n", self.category()));
        report.push_str(&format!("Severity: {:?}\n", self.severity()));

        if let Some(suggestion) = self.suggestion() {
            report.push_str(&format!("Suggestion: {}\n", suggestion));
        }

        if let Some(source) = self.source() {
            report.push_str(&format!("Root cause: {}\n", source));
        }

        report
    }
}

/// Error severity levels for prioritization
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}
