use bytes::Bytes;

/// A single field of a multipart form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    /// A plain text field
    Text {
        /// Field name
        name: String,
        /// Field value
        value: String,
    },
    /// A file field
    File {
        /// Field name
        name: String,
        /// File name reported to the server
        file_name: String,
        /// File contents
        data: Bytes,
        /// MIME type, if known
        content_type: Option<String>,
    },
}

/// An encoded request body.
///
/// Unlike a streaming body this can be cloned, so the same body can be
/// sent again when a request gets retried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// Raw bytes, with the content type carried in the request headers
    Bytes(Bytes),
    /// A multipart form; the transport picks the boundary
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Returns `true` if there is nothing to send
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Multipart(parts) => parts.is_empty(),
        }
    }
}
