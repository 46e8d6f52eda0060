use bytes::Bytes;
use http::{HeaderMap, Method};
use serde_json::Value;
use typed_builder::TypedBuilder;

use crate::ratelimit::AuthPrefix;

/// A file attached to a multipart request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    /// File name reported to the server
    pub name: String,
    /// Raw file contents
    pub data: Bytes,
    /// MIME type of the file, guessed by the server if absent
    pub content_type: Option<String>,
    /// Form field name; defaults to `files[<index>]`
    pub key: Option<String>,
}

impl RawFile {
    /// Create a file attachment from a name and its contents
    #[must_use]
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            content_type: None,
            key: None,
        }
    }
}

/// A logical API request, before it is resolved into a transport request.
///
/// `route` is the path below the API base and version, e.g.
/// `/channels/123456789012345678/messages`.
///
/// ```
/// use http::Method;
/// use rest_ratelimit::ApiRequest;
/// use serde_json::json;
///
/// let request = ApiRequest::builder()
///     .method(Method::POST)
///     .route("/channels/123456789012345678/messages")
///     .json(json!({ "content": "hello" }))
///     .reason("greeting")
///     .build();
/// assert!(request.auth);
/// ```
#[derive(TypedBuilder, Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method
    #[builder(setter(into))]
    pub method: Method,

    /// Route below the API base, starting with `/`
    #[builder(setter(into))]
    pub route: String,

    /// Query string pairs, appended in order
    #[builder(default, setter(into))]
    pub query: Vec<(String, String)>,

    /// JSON payload
    #[builder(default, setter(strip_option))]
    pub json: Option<Value>,

    /// Files to upload as multipart form data
    #[builder(default, setter(into))]
    pub files: Vec<RawFile>,

    /// Flatten the JSON payload into form fields instead of a
    /// `payload_json` field when uploading files
    #[builder(default)]
    pub append_to_form: bool,

    /// A pre-encoded body that is sent as-is, bypassing the encoder
    #[builder(default, setter(strip_option, into))]
    pub raw_body: Option<Bytes>,

    /// Whether the request needs the configured credential
    #[builder(default = true)]
    pub auth: bool,

    /// Override for the configured authorization scheme
    #[builder(default, setter(strip_option))]
    pub auth_prefix: Option<AuthPrefix>,

    /// Audit log reason
    #[builder(default, setter(strip_option, into))]
    pub reason: Option<String>,

    /// Additional headers for this request only
    #[builder(default)]
    pub headers: HeaderMap,

    /// Whether to insert the API version segment into the URL
    #[builder(default = true)]
    pub versioned: bool,
}
