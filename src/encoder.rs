use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use std::fmt::Debug;

use crate::types::{FormPart, RawFile, RequestBody};
use crate::{ErrorKind, Result};

/// Turns a JSON payload and file attachments into a request body
pub trait BodyEncoder: Send + Sync + Debug {
    /// Encode the payload.
    ///
    /// Returns the body and the content headers that describe it.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized
    fn encode(
        &self,
        json: Option<&Value>,
        files: &[RawFile],
        append_to_form: bool,
    ) -> Result<(RequestBody, HeaderMap)>;
}

/// The default encoder.
///
/// Without files the payload is sent as `application/json`. With files the
/// request becomes `multipart/form-data`: each file is sent as
/// `files[<index>]` (unless it has its own key), and the payload is either
/// attached as a `payload_json` field or, with `append_to_form`, flattened
/// into one form field per top-level key.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormEncoder;

impl BodyEncoder for FormEncoder {
    fn encode(
        &self,
        json: Option<&Value>,
        files: &[RawFile],
        append_to_form: bool,
    ) -> Result<(RequestBody, HeaderMap)> {
        let mut headers = HeaderMap::new();

        if files.is_empty() {
            let Some(json) = json else {
                return Ok((RequestBody::Empty, headers));
            };
            let body = serde_json::to_vec(json).map_err(ErrorKind::EncodeBody)?;
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            return Ok((RequestBody::Bytes(body.into()), headers));
        }

        let mut parts: Vec<FormPart> = files
            .iter()
            .enumerate()
            .map(|(index, file)| FormPart::File {
                name: file.key.clone().unwrap_or_else(|| format!("files[{index}]")),
                file_name: file.name.clone(),
                data: file.data.clone(),
                content_type: file.content_type.clone(),
            })
            .collect();

        match json {
            Some(Value::Object(fields)) if append_to_form => {
                for (name, value) in fields {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => serde_json::to_string(other).map_err(ErrorKind::EncodeBody)?,
                    };
                    parts.push(FormPart::Text {
                        name: name.clone(),
                        value,
                    });
                }
            }
            Some(json) => parts.push(FormPart::Text {
                name: "payload_json".to_string(),
                value: serde_json::to_string(json).map_err(ErrorKind::EncodeBody)?,
            }),
            None => {}
        }

        // The transport sets the multipart content type including its boundary
        Ok((RequestBody::Multipart(parts), headers))
    }
}
