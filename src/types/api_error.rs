use http::{Method, StatusCode};
use serde_json::Value;
use std::fmt;

use crate::types::ResponseBody;

/// A client error (4xx other than 429) returned by the API
#[derive(Debug, Clone)]
pub struct ApiError {
    /// Status code of the response
    pub status: StatusCode,
    /// Method of the rejected request
    pub method: Method,
    /// Route of the rejected request
    pub route: String,
    /// API specific error code, if the body carried one
    pub code: Option<u64>,
    /// Human readable error message, if the body carried one
    pub message: Option<String>,
    /// The decoded error body
    pub body: ResponseBody,
}

impl ApiError {
    pub(crate) fn new(
        status: StatusCode,
        method: Method,
        route: String,
        body: ResponseBody,
    ) -> Self {
        let json = body.as_json();
        let code = json.and_then(|v| v.get("code")).and_then(Value::as_u64);
        let message = json
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(String::from);
        Self {
            status,
            method,
            route,
            code,
            message,
            body,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} returned {}", self.method, self.route, self.status)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(code) = self.code {
            write!(f, " (code {code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_from_json_body() {
        let body = ResponseBody::Json(json!({ "code": 10008, "message": "Unknown Message" }));
        let error = ApiError::new(
            StatusCode::NOT_FOUND,
            Method::DELETE,
            "/channels/:id/messages/:id".into(),
            body,
        );
        assert_eq!(error.code, Some(10008));
        assert_eq!(error.message.as_deref(), Some("Unknown Message"));
        assert_eq!(
            error.to_string(),
            "DELETE /channels/:id/messages/:id returned 404 Not Found: Unknown Message (code 10008)"
        );
    }

    #[test]
    fn test_api_error_without_details() {
        let error = ApiError::new(
            StatusCode::FORBIDDEN,
            Method::GET,
            "/guilds/:id".into(),
            ResponseBody::Empty,
        );
        assert_eq!(error.code, None);
        assert_eq!(error.to_string(), "GET /guilds/:id returned 403 Forbidden");
    }
}
