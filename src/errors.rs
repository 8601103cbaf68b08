// Copyright (c) the neo4j-client contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io;

use thiserror::Error as ThisError;

use crate::value::Value;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong when talking to the database.
///
/// Error messages are not part of the API and may change at any time; the
/// only string that can somewhat reliably be matched on is
/// [`ServerError::code()`], which is produced by the server.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// The connection could not be established, broke mid-conversation, or
    /// routing information could not be obtained.
    ///
    /// `during_commit` is set when the connection was lost after a COMMIT
    /// was already on the wire. The client then cannot know whether the
    /// transaction went through, so such an error is never retried
    /// automatically.
    #[error("{}", fmt_connection(.message, .source, .during_commit))]
    #[non_exhaustive]
    Connection {
        message: String,
        source: Option<io::Error>,
        during_commit: bool,
    },

    /// The caller handed the client something it cannot work with: an
    /// unsupported URI scheme, a broken TLS setup, a value the protocol
    /// cannot express, a backwards seek, and the like.
    #[error("invalid configuration: {message}")]
    #[non_exhaustive]
    Config { message: String },

    /// The server answered a request with a FAILURE message.
    #[error("{0}")]
    Server(Box<ServerError>),

    /// No connection could be acquired within the configured
    /// acquisition timeout.
    #[error("{message}")]
    #[non_exhaustive]
    AcquireTimeout { message: String },

    /// The wire conversation left the rails: an unexpected message, a
    /// malformed frame, a response that does not match any request. Always
    /// fatal for the connection it happened on.
    #[error("protocol violation: {message}")]
    #[non_exhaustive]
    Protocol { message: String },
}

fn fmt_connection(message: &str, source: &Option<io::Error>, during_commit: &bool) -> String {
    let mut out = format!("connection failed: {message}");
    if let Some(source) = source {
        out.push_str(&format!(" ({source})"));
    }
    if *during_commit {
        out.push_str(" [during commit]");
    }
    out
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
            during_commit: false,
        }
    }

    pub(crate) fn io(context: &str, source: io::Error) -> Self {
        Self::Connection {
            message: String::from(context),
            source: Some(source),
            during_commit: false,
        }
    }

    pub(crate) fn acquire_timeout(waiting_for: &str) -> Self {
        Self::AcquireTimeout {
            message: format!("could not acquire a connection in time while {waiting_for}"),
        }
    }

    /// Whether a managed transaction is allowed to run the work again after
    /// seeing this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { during_commit, .. } => !during_commit,
            Self::Server(error) => error.is_retryable(),
            // a saturated pool may well clear up a moment later
            Self::AcquireTimeout { .. } => true,
            Self::Config { .. } | Self::Protocol { .. } => false,
        }
    }

    pub(crate) fn during_commit(mut self) -> Self {
        if let Self::Connection { during_commit, .. } = &mut self {
            *during_commit = true;
        }
        self
    }

    /// Errors that must abort a routing table fetch instead of moving on to
    /// the next candidate router.
    pub(crate) fn fatal_for_discovery(&self) -> bool {
        match self {
            Self::Config { .. } => true,
            Self::Server(error) => error.fatal_for_discovery(),
            _ => false,
        }
    }
}

const FALLBACK_CODE: &str = "Neo.DatabaseError.General.UnknownError";
const FALLBACK_MESSAGE: &str = "An unknown error occurred.";

/// A FAILURE sent by the server, as `(code, message)`.
///
/// Codes have the shape `Neo.<classification>.<category>.<title>`, e.g.
/// `Neo.ClientError.Security.Unauthorized`.
#[derive(Debug, Clone)]
pub struct ServerError {
    code: String,
    message: String,
}

impl ServerError {
    pub(crate) fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: remap_legacy_code(code.into()),
            message: message.into(),
        }
    }

    pub(crate) fn from_bolt_meta(mut meta: HashMap<String, Value>) -> Self {
        let code = match meta.remove("code") {
            Some(Value::String(code)) => code,
            _ => String::from(FALLBACK_CODE),
        };
        let message = match meta.remove("message") {
            Some(Value::String(message)) => message,
            _ => String::from(FALLBACK_MESSAGE),
        };
        Self::new(code, message)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn code_part(&self, index: usize) -> &str {
        self.code.splitn(4, '.').nth(index).unwrap_or("")
    }

    /// `ClientError`, `TransientError`, `DatabaseError`, ...
    pub fn classification(&self) -> &str {
        self.code_part(1)
    }

    /// `Security`, `Cluster`, `Transaction`, ...
    pub fn category(&self) -> &str {
        self.code_part(2)
    }

    pub fn title(&self) -> &str {
        self.code_part(3)
    }

    pub(crate) fn is_retryable(&self) -> bool {
        self.classification() == "TransientError"
            || WRITER_LOST_CODES.contains(&self.code())
            || self.code() == "Neo.ClientError.Security.AuthorizationExpired"
    }

    /// The address this error came from no longer serves the database at
    /// all; it must be dropped from the routing table.
    pub(crate) fn marks_server_unavailable(&self) -> bool {
        self.code() == "Neo.TransientError.General.DatabaseUnavailable"
    }

    /// The address this error came from stopped being a writer (e.g., a
    /// leader switch); the routing table's writer entry is stale.
    pub(crate) fn invalidates_writer(&self) -> bool {
        WRITER_LOST_CODES.contains(&self.code())
    }

    pub(crate) fn fatal_for_discovery(&self) -> bool {
        if HOPELESS_DISCOVERY_CODES.contains(&self.code()) {
            return true;
        }
        // security errors won't improve by asking another router, except for
        // the one a re-authentication can clear
        self.code().starts_with("Neo.ClientError.Security.")
            && self.code() != "Neo.ClientError.Security.AuthorizationExpired"
    }
}

// after these, the request was wrong and no other cluster member will judge
// it differently
const HOPELESS_DISCOVERY_CODES: [&str; 6] = [
    "Neo.ClientError.Database.DatabaseNotFound",
    "Neo.ClientError.Transaction.InvalidBookmark",
    "Neo.ClientError.Transaction.InvalidBookmarkMixture",
    "Neo.ClientError.Statement.TypeError",
    "Neo.ClientError.Statement.ArgumentError",
    "Neo.ClientError.Request.Invalid",
];

// the server that sent one of these is (no longer) the leader
const WRITER_LOST_CODES: [&str; 2] = [
    "Neo.ClientError.Cluster.NotALeader",
    "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase",
];

// Servers up to 4.4 report these as transient although retrying them is
// pointless; 5.x reclassified them as client errors and so does this client.
fn remap_legacy_code(code: String) -> String {
    match code.as_str() {
        "Neo.TransientError.Transaction.Terminated" => {
            String::from("Neo.ClientError.Transaction.Terminated")
        }
        "Neo.TransientError.Transaction.LockClientStopped" => {
            String::from("Neo.ClientError.Transaction.LockClientStopped")
        }
        _ => code,
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error {}: {}", self.code, self.message)
    }
}

impl From<ServerError> for Error {
    fn from(error: ServerError) -> Self {
        Error::Server(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Neo.TransientError.Transaction.DeadlockDetected", true)]
    #[case("Neo.TransientError.General.DatabaseUnavailable", true)]
    #[case("Neo.ClientError.Cluster.NotALeader", true)]
    #[case("Neo.ClientError.General.ForbiddenOnReadOnlyDatabase", true)]
    #[case("Neo.ClientError.Security.AuthorizationExpired", true)]
    #[case("Neo.ClientError.Statement.SyntaxError", false)]
    #[case("Neo.ClientError.Schema.ConstraintValidationFailed", false)]
    #[case("Neo.ClientError.Security.Unauthorized", false)]
    #[case("Neo.ClientError.Database.DatabaseNotFound", false)]
    #[case("Neo.DatabaseError.General.UnknownError", false)]
    fn server_error_retryability(#[case] code: &str, #[case] retryable: bool) {
        let error = ServerError::new(code, "boom");
        assert_eq!(error.is_retryable(), retryable);
    }

    #[rstest]
    #[case(
        "Neo.TransientError.Transaction.Terminated",
        "Neo.ClientError.Transaction.Terminated"
    )]
    #[case(
        "Neo.TransientError.Transaction.LockClientStopped",
        "Neo.ClientError.Transaction.LockClientStopped"
    )]
    fn legacy_codes_are_remapped(#[case] wire: &str, #[case] mapped: &str) {
        let error = ServerError::new(wire, "boom");
        assert_eq!(error.code(), mapped);
        assert!(!error.is_retryable());
    }

    #[test]
    fn code_is_split_into_parts() {
        let error = ServerError::new("Neo.ClientError.Security.Unauthorized", "nope");
        assert_eq!(error.classification(), "ClientError");
        assert_eq!(error.category(), "Security");
        assert_eq!(error.title(), "Unauthorized");
    }

    #[test]
    fn connection_loss_during_commit_is_not_retried() {
        let error = Error::connection("socket went away");
        assert!(error.is_retryable());
        assert!(!error.during_commit().is_retryable());
    }

    #[test]
    fn missing_failure_meta_falls_back() {
        let error = ServerError::from_bolt_meta(HashMap::new());
        assert_eq!(error.code(), FALLBACK_CODE);
        assert_eq!(error.message(), FALLBACK_MESSAGE);
    }
}
