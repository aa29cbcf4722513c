//! Turning failed responses into errors.
//!
//! Servers of this API family report failures as a JSON body with optional
//! root fields `errorMessage` and `errorCode`. When either is present the
//! failure becomes an [`ApiError`]; otherwise a plain [`Error::HttpError`].

use crate::response::Response;
use crate::Error;
use http::StatusCode;
use serde_json::Value;

const ERROR_MESSAGE_POINTER: &str = "/errorMessage";
const ERROR_CODE_POINTER: &str = "/errorCode";

/// A structured, server-reported failure.
///
/// Wraps the generic [`Error::HttpError`] it was extracted from.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct ApiError {
    code: Option<String>,
    error_message: Option<String>,
    message: String,
    #[source]
    failure: Box<Error>,
}

impl ApiError {
    fn new(failure: Error, error_message: Option<String>, code: Option<String>) -> Self {
        let headline = error_message.as_deref().or(code.as_deref()).unwrap_or_default();
        let message = format!("{} [HTTP Error]: {}", headline, failure);
        Self {
            code,
            error_message,
            message,
            failure: Box::new(failure),
        }
    }

    /// The server's `errorCode`, if it sent one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// The server's `errorMessage`, if it sent one.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// The composed message: `"{errorMessage} [HTTP Error]: {original message}"`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The generic HTTP failure this error was extracted from.
    pub fn failure(&self) -> &Error {
        &self.failure
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.failure.status()
    }
}

/// Converts a failed response into an error, consuming and releasing it.
///
/// Structured extraction is best effort: an unreadable body, malformed JSON
/// or missing fields all produce a plain [`Error::HttpError`].
pub async fn translate_failure(mut response: Response) -> Error {
    let method = response.request().method().clone();
    let url = response.request().full_url();
    let status = response.status();
    let status_message = response.status_message().to_string();
    let headers = response.headers().clone();

    let raw_response = match response.text().await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "Could not read failed response body");
            String::new()
        }
    };
    response.close();

    match status {
        Some(status) if status.is_client_error() => tracing::error!(
            status = status.as_u16(),
            response = %raw_response,
            "Client error (4xx)"
        ),
        Some(status) if status.is_server_error() => tracing::warn!(
            status = status.as_u16(),
            response = %raw_response,
            "Server error (5xx)"
        ),
        _ => {}
    }

    let structured = structured_error(&raw_response);
    let failure = Error::HttpError {
        method,
        url,
        status,
        status_message,
        raw_response,
        headers,
    };

    match structured {
        Some((error_message, code)) => Error::Api(ApiError::new(failure, error_message, code)),
        None => failure,
    }
}

/// Looks up `errorMessage` and `errorCode` at the document root.
///
/// Returns `None` when the body is not JSON or both fields are absent or blank.
fn structured_error(raw: &str) -> Option<(Option<String>, Option<String>)> {
    let document: Value = serde_json::from_str(raw).ok()?;
    let error_message = text_at(&document, ERROR_MESSAGE_POINTER);
    let code = text_at(&document, ERROR_CODE_POINTER);
    if error_message.is_none() && code.is_none() {
        None
    } else {
        Some((error_message, code))
    }
}

fn text_at(document: &Value, pointer: &str) -> Option<String> {
    let text = match document.pointer(pointer)? {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
