use actix_web::error::{JsonPayloadError, QueryPayloadError};
use actix_web::{HttpRequest, HttpResponse};
use mongodb::bson::{self, Bson, Document};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};

/// The `{message, data}` body every endpoint answers with.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub message: String,
    pub data: Option<T>,
}

impl Envelope<Value> {
    pub fn empty(message: impl Into<String>) -> Self {
        Envelope {
            message: message.into(),
            data: None,
        }
    }
}

pub fn ok<T: Serialize>(message: &str, data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        message: message.to_string(),
        data: Some(data),
    })
}

pub fn created<T: Serialize>(message: &str, data: T) -> HttpResponse {
    HttpResponse::Created().json(Envelope {
        message: message.to_string(),
        data: Some(data),
    })
}

pub fn ok_empty(message: &str) -> HttpResponse {
    HttpResponse::Ok().json(Envelope::empty(message))
}

/// Renders a stored entity the way clients see it: ids as hex strings,
/// timestamps as RFC 3339.
pub fn entity_json<T: Serialize>(entity: &T) -> ApiResult<Value> {
    let doc = bson::to_document(entity).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(document_to_json(doc))
}

pub fn document_to_json(doc: Document) -> Value {
    Value::Object(
        doc.into_iter()
            .map(|(key, value)| (key, bson_to_json(value)))
            .collect::<Map<String, Value>>(),
    )
}

pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(at) => at
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or_else(|_| Value::from(at.timestamp_millis())),
        Bson::Document(doc) => document_to_json(doc),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::bad_request(format!("Invalid request body: {}", err)).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::bad_request(format!("Invalid query parameters: {}", err)).into()
}
