use crate::SpatialReference;
use thiserror::Error;

/// Error enum for crate-specific errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A layer's field was requested, but the layer doesn't declare it.
    #[error("field does not exist: {0}")]
    FieldDoesNotExist(String),

    /// [geojson::Error]
    #[error(transparent)]
    Geojson(#[from] Box<geojson::Error>),

    /// Chunks of one result were returned with different spatial references.
    #[error("inconsistent spatial reference: expected={expected:?}, actual={actual:?}")]
    InconsistentSpatialReference {
        /// The reference of the first chunk.
        expected: Option<SpatialReference>,

        /// The reference of the offending chunk.
        actual: Option<SpatialReference>,
    },

    /// A layer url doesn't end with a layer id.
    #[error("invalid layer url (it must end with the numeric layer id): {0}")]
    InvalidLayerUrl(String),

    /// The max record count must be a positive integer.
    #[error("invalid max record count: {0}")]
    InvalidMaxRecordCount(i64),

    /// These out fields can't be used for this query.
    #[error("invalid out fields for this query: {0}")]
    InvalidOutFields(String),

    /// A JSON value had an unexpected shape.
    #[error("invalid value for \"{key}\": {value}")]
    InvalidValue {
        /// The key that held the value.
        key: String,

        /// The value.
        value: serde_json::Value,
    },

    /// A key that the server should have returned is missing.
    #[error("no \"{0}\" key in the JSON response")]
    MissingKey(&'static str),

    /// The layer isn't a feature layer.
    #[error("not a feature layer: type={0:?}")]
    NotAFeatureLayer(Option<String>),

    /// Zero, or more than one, metadata keys matched a pattern.
    #[error("expected exactly one key matching {pattern}, found {matches:?}")]
    NotFoundField {
        /// The pattern the keys were matched against.
        pattern: &'static str,

        /// The keys that matched.
        matches: Vec<String>,
    },

    /// [reqwest::Error]
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// [serde_json::Error]
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// The server answered with an error object.
    #[error("server error (code={code}): {message}")]
    Server {
        /// The error code reported by the server.
        code: i64,

        /// The message reported by the server.
        message: String,
    },

    /// [tokio::task::JoinError]
    #[error(transparent)]
    TokioJoin(#[from] tokio::task::JoinError),

    /// Unsupported output format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// [url::ParseError]
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
}

/// The broad category of an [Error].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or inconsistent data that no request could fix.
    Configuration,

    /// A metadata key or layer field couldn't be resolved.
    NotFoundField,

    /// The request failed, or the response wasn't what we expected.
    DataAccess,
}

impl Error {
    /// Returns the kind of this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use restfeature::{Error, ErrorKind};
    ///
    /// assert_eq!(Error::InvalidMaxRecordCount(0).kind(), ErrorKind::Configuration);
    /// assert_eq!(Error::MissingKey("count").kind(), ErrorKind::DataAccess);
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InconsistentSpatialReference { .. }
            | Error::InvalidLayerUrl(_)
            | Error::InvalidMaxRecordCount(_)
            | Error::InvalidOutFields(_)
            | Error::NotAFeatureLayer(_)
            | Error::UnsupportedFormat(_) => ErrorKind::Configuration,
            Error::FieldDoesNotExist(_) | Error::NotFoundField { .. } => ErrorKind::NotFoundField,
            Error::Geojson(_)
            | Error::InvalidValue { .. }
            | Error::MissingKey(_)
            | Error::Reqwest(_)
            | Error::SerdeJson(_)
            | Error::Server { .. }
            | Error::TokioJoin(_)
            | Error::UrlParse(_) => ErrorKind::DataAccess,
        }
    }
}

impl From<geojson::Error> for Error {
    fn from(err: geojson::Error) -> Self {
        Error::Geojson(Box::new(err))
    }
}
