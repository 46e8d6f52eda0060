use bytes::Bytes;
use http::{HeaderMap, StatusCode, header};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A decoded response body
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseBody {
    /// The response had no content
    #[default]
    Empty,
    /// An `application/json` body
    Json(Value),
    /// Any other body, left untouched
    Raw(Bytes),
}

impl ResponseBody {
    /// Decode a body based on the response `Content-Type`
    ///
    /// # Errors
    ///
    /// Returns an error if the response claims to be JSON but cannot be parsed
    pub fn decode(headers: &HeaderMap, body: Bytes) -> Result<Self, serde_json::Error> {
        if body.is_empty() {
            return Ok(Self::Empty);
        }
        let is_json = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));
        if is_json {
            serde_json::from_slice(&body).map(Self::Json)
        } else {
            Ok(Self::Raw(body))
        }
    }

    /// Get the JSON value, if this is a JSON body
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// A successful API response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Status code
    pub status: StatusCode,
    /// Raw response headers
    pub headers: HeaderMap,
    /// Decoded body
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Deserialize the JSON body into `T`
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not JSON or does not match `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.body {
            ResponseBody::Json(value) => T::deserialize(value),
            ResponseBody::Raw(bytes) => serde_json::from_slice(bytes),
            ResponseBody::Empty => serde_json::from_slice(b"null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers
    }

    #[test]
    fn test_decode_json() {
        let body = ResponseBody::decode(&json_headers(), Bytes::from(r#"{"id":"1"}"#)).unwrap();
        assert_eq!(body, ResponseBody::Json(json!({ "id": "1" })));
    }

    #[test]
    fn test_decode_raw_and_empty() {
        let body = ResponseBody::decode(&HeaderMap::new(), Bytes::from("GIF89a")).unwrap();
        assert_eq!(body, ResponseBody::Raw(Bytes::from("GIF89a")));

        let body = ResponseBody::decode(&json_headers(), Bytes::new()).unwrap();
        assert_eq!(body, ResponseBody::Empty);
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(ResponseBody::decode(&json_headers(), Bytes::from("{nope")).is_err());
    }
}
