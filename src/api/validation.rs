use actix_web::{
    HttpResponse,
    error::{InternalError, JsonPayloadError},
};
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Error body shared by every endpoint
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub fields: Value,
}

fn bad_request(error: &str, fields: Map<String, Value>) -> actix_web::Error {
    let body = ErrorResponse {
        error: error.to_string(),
        fields: Value::Object(fields),
    };
    InternalError::from_response("", HttpResponse::BadRequest().json(body)).into()
}

/// Describe a JSON body that could not be deserialized
fn deserialize_message(err: &str) -> &'static str {
    if err.contains("EOF while parsing") {
        "Request body is empty. Expected JSON payload"
    } else if err.contains("missing field") {
        "Missing required field. Expected {\"target\": \"...\"}"
    } else if err.contains("invalid type") {
        "Field has the wrong type. Expected a string target"
    } else {
        "Invalid JSON format"
    }
}

/// JsonConfig with the project's standard 400 responses
///
/// `limit` caps JSON bodies in bytes; larger bodies get 413.
pub fn json_config(limit: usize) -> actix_web_validator::JsonConfig {
    actix_web_validator::JsonConfig::default()
        .limit(limit)
        .error_handler(move |err, _req| {
            let mut fields = Map::new();

            match err {
                actix_web_validator::Error::Validate(validation_errors) => {
                    for (field, errors) in validation_errors.field_errors() {
                        let messages: Vec<String> = errors
                            .iter()
                            .map(|e| {
                                e.message
                                    .as_ref()
                                    .map(|m| m.to_string())
                                    .unwrap_or_else(|| format!("Validation error in field: {}", field))
                            })
                            .collect();
                        fields.insert(field.to_string(), json!({"errors": messages}));
                    }
                    bad_request("Validation failed", fields)
                }
                actix_web_validator::Error::Deserialize(de_err) => {
                    let message = deserialize_message(&de_err.to_string());
                    fields.insert("message".to_string(), json!(message));
                    bad_request("Request validation failed", fields)
                }
                actix_web_validator::Error::JsonPayloadError(
                    JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. },
                ) => {
                    let body = ErrorResponse {
                        error: "Payload too large".to_string(),
                        fields: json!({"message": format!("Request body exceeds {} bytes", limit)}),
                    };
                    InternalError::from_response("", HttpResponse::PayloadTooLarge().json(body)).into()
                }
                actix_web_validator::Error::JsonPayloadError(payload_err) => {
                    let message = deserialize_message(&payload_err.to_string());
                    fields.insert("message".to_string(), json!(message));
                    bad_request("Request validation failed", fields)
                }
                _ => {
                    fields.insert("message".to_string(), json!("Validation error"));
                    bad_request("Validation failed", fields)
                }
            }
        })
}
