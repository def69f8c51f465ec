//! Error taxonomy and the annotated [`ErrorReport`] delivered to `on_error`.

use std::fmt;

use crate::record::Record;

/// Every failure the connection engine can surface.
///
/// Backend drivers may fail arbitrarily; driver-level errors flow in
/// through the transparent [`Error::Other`] variant (via `anyhow`), while
/// the engine itself only produces the typed variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key does not resolve to a known model/collection, or the backend
    /// returned nothing for it.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A record failed schema validation.
    #[error("record does not match model: {0}")]
    InvalidModel(String),

    /// A record has the wrong shape.
    #[error("malformed record: {0}")]
    InvalidRecord(String),

    /// An operation was attempted on a closed backend that could not be
    /// opened.
    #[error("connection is not open")]
    ConnectionNotOpen,

    /// `open()` exceeded the configured deadline.
    #[error("timed out opening the connection")]
    OpeningTimeout,

    /// `read()` exceeded the configured deadline.
    #[error("timed out reading from the connection")]
    ReadingTimeout,

    /// `write()` exceeded the configured deadline.
    #[error("timed out writing to the connection")]
    WritingTimeout,

    /// A date string could not be parsed by the date-to-timestamp helper.
    #[error("unparseable date: {0}")]
    InvalidDate(String),

    /// A local-storage variant failed to load, read, or persist.
    #[error("local storage failure: {0}")]
    Storage(String),

    /// Any other backend/driver failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Short classifier name for the error, used as the report title.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidKey(_) => "InvalidKey",
            Error::InvalidModel(_) => "InvalidModel",
            Error::InvalidRecord(_) => "InvalidRecord",
            Error::ConnectionNotOpen => "ConnectionNotOpen",
            Error::OpeningTimeout => "ConnectionOpeningTimeout",
            Error::ReadingTimeout => "ConnectionReadingTimeout",
            Error::WritingTimeout => "ConnectionWritingTimeout",
            Error::InvalidDate(_) => "InvalidDate",
            Error::Storage(_) => "LocalStorage",
            Error::Other(_) => "Error",
        }
    }
}

/// An [`Error`] annotated with the context of the operation that failed.
///
/// Delivered exactly once per failed safe operation through the
/// `on_error` callback. Annotations are all optional; whichever are known
/// at the failure site get filled in.
#[derive(Debug)]
pub struct ErrorReport {
    error: Error,
    client_id: Option<String>,
    key: Option<String>,
    data: Option<Vec<Record>>,
    args: Option<String>,
}

impl ErrorReport {
    /// Wraps an error with no annotations.
    #[must_use]
    pub fn new(error: Error) -> Self {
        Self {
            error,
            client_id: None,
            key: None,
            data: None,
            args: None,
        }
    }

    /// Annotates the report with the owning connection's client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        if !client_id.is_empty() {
            self.client_id = Some(client_id);
        }
        self
    }

    /// Annotates the report with the key the operation addressed.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Annotates the report with the records involved in the operation.
    #[must_use]
    pub fn with_data(mut self, data: Vec<Record>) -> Self {
        self.data = Some(data);
        self
    }

    /// Annotates the report with the operation's arguments, pre-formatted.
    #[must_use]
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    /// The wrapped error.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Consumes the report, returning the wrapped error (the "re-raise"
    /// operation).
    #[must_use]
    pub fn into_error(self) -> Error {
        self.error
    }

    /// Short title: the error kind plus its message.
    #[must_use]
    pub fn title(&self) -> String {
        format!("{}: {}", self.error.kind(), self.error)
    }

    /// Full message: the title followed by one line per annotation.
    #[must_use]
    pub fn message(&self) -> String {
        let mut out = self.title();
        if let Some(client_id) = &self.client_id {
            out.push_str(&format!("\nClient: {client_id}"));
        }
        if let Some(key) = &self.key {
            out.push_str(&format!("\nKey: {key}"));
        }
        if let Some(data) = &self.data {
            out.push_str(&format!("\nData: {} record(s)", data.len()));
        }
        if let Some(args) = &self.args {
            out.push_str(&format!("\nArgs: {args}"));
        }
        out
    }

    /// The error's source chain, outermost first.
    ///
    /// This is the closest analog of a traceback: each entry is one layer
    /// of the underlying failure.
    #[must_use]
    pub fn chain(&self) -> Vec<String> {
        let mut out = vec![self.error.to_string()];
        let mut source = std::error::Error::source(&self.error);
        while let Some(err) = source {
            out.push(err.to_string());
            source = err.source();
        }
        out
    }

    /// The key annotation, when present.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The records annotation, when present.
    #[must_use]
    pub fn data(&self) -> Option<&[Record]> {
        self.data.as_deref()
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}
