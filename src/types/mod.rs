mod api_error;
mod body;
mod error;
mod request;
mod response;

pub use api_error::ApiError;
pub use body::{FormPart, RequestBody};
pub use error::{ErrorKind, Result};
pub use request::{ApiRequest, RawFile};
pub use response::{ApiResponse, ResponseBody};
