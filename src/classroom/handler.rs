//! Route handlers for the classroom endpoints
//!
//! Handlers are transport-neutral: they take query maps and raw bodies and
//! return a status plus JSON body. `server` adapts them to axum.

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{ClassUpdate, ClassroomError, ClassroomService};
use crate::models::Role;

/// Status code and JSON body for one request
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub status: u16,
    pub body: Value,
}

impl HandlerResponse {
    fn ok(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    fn error(status: u16, error: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": error, "message": message.into() }),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::error(400, "Bad Request", message)
    }
}

impl From<ClassroomError> for HandlerResponse {
    fn from(err: ClassroomError) -> Self {
        match err {
            ClassroomError::ClassNotFound | ClassroomError::MemberNotFound => {
                Self::error(404, "Not Found", err.to_string())
            }
            ClassroomError::AlreadyMember => Self::error(409, "Conflict", err.to_string()),
            ClassroomError::Invalid(msg) => Self::bad_request(msg),
            ClassroomError::Storage(e) => {
                tracing::error!("Classroom service error: {:#}", e);
                let message = e.to_string();
                Self::error(
                    500,
                    "Internal Server Error",
                    if message.is_empty() {
                        "An unexpected error occurred".to_string()
                    } else {
                        message
                    },
                )
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateClassBody {
    name: String,
    description: Option<String>,
    owner_id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateClassBody {
    name: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    description: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberBody {
    user_id: String,
    role: Role,
    invited_by: Option<String>,
}

/// Distinguishes an explicit `null` (clear) from an absent field (keep).
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn parse_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, HandlerResponse> {
    serde_json::from_slice(body)
        .map_err(|e| HandlerResponse::bad_request(format!("Invalid request body: {}", e)))
}

fn user_id_param(query: &HashMap<String, String>) -> Result<&str, HandlerResponse> {
    query
        .get("userId")
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HandlerResponse::bad_request("userId query parameter is required"))
}

/// `GET /classes?userId=&role=`
pub async fn get_classes(
    service: &dyn ClassroomService,
    query: &HashMap<String, String>,
) -> HandlerResponse {
    let user_id = match user_id_param(query) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let role = match query.get("role").map(String::as_str) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<Role>() {
            Ok(role) => Some(role),
            Err(_) => {
                return HandlerResponse::bad_request(
                    "Invalid role parameter. Must be \"teacher\" or \"student\"",
                )
            }
        },
    };

    tracing::info!(user_id, role = ?role, "GET /classes");

    match service.classes_for_user(user_id, role).await {
        Ok(classes) => HandlerResponse::ok(
            200,
            json!({ "success": true, "count": classes.len(), "data": classes }),
        ),
        Err(e) => e.into(),
    }
}

/// `GET /classes/{id}?userId=`
pub async fn get_class(
    service: &dyn ClassroomService,
    class_id: &str,
    query: &HashMap<String, String>,
) -> HandlerResponse {
    let user_id = match user_id_param(query) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match service.class_for_user(class_id, user_id).await {
        Ok(Some(class)) => HandlerResponse::ok(200, json!({ "success": true, "data": class })),
        Ok(None) => ClassroomError::ClassNotFound.into(),
        Err(e) => e.into(),
    }
}

/// `POST /classes`
pub async fn create_class(service: &dyn ClassroomService, body: &[u8]) -> HandlerResponse {
    let req: CreateClassBody = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match service
        .create_class(&req.name, req.description, &req.owner_id)
        .await
    {
        Ok(class) => HandlerResponse::ok(201, json!({ "success": true, "data": class })),
        Err(e) => e.into(),
    }
}

/// `PATCH /classes/{id}`
pub async fn update_class(
    service: &dyn ClassroomService,
    class_id: &str,
    body: &[u8],
) -> HandlerResponse {
    let req: UpdateClassBody = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let update = ClassUpdate {
        name: req.name,
        description: req.description,
    };

    match service.update_class(class_id, update).await {
        Ok(class) => HandlerResponse::ok(200, json!({ "success": true, "data": class })),
        Err(e) => e.into(),
    }
}

/// `DELETE /classes/{id}`
pub async fn delete_class(service: &dyn ClassroomService, class_id: &str) -> HandlerResponse {
    match service.delete_class(class_id).await {
        Ok(()) => HandlerResponse::ok(200, json!({ "success": true })),
        Err(e) => e.into(),
    }
}

/// `POST /classes/{id}/members`
pub async fn add_member(
    service: &dyn ClassroomService,
    class_id: &str,
    body: &[u8],
) -> HandlerResponse {
    let req: AddMemberBody = match parse_body(body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match service
        .add_member(class_id, &req.user_id, req.role, req.invited_by)
        .await
    {
        Ok(member) => HandlerResponse::ok(201, json!({ "success": true, "data": member })),
        Err(e) => e.into(),
    }
}

/// `DELETE /classes/{id}/members/{userId}`
pub async fn remove_member(
    service: &dyn ClassroomService,
    class_id: &str,
    user_id: &str,
) -> HandlerResponse {
    match service.remove_member(class_id, user_id).await {
        Ok(()) => HandlerResponse::ok(200, json!({ "success": true })),
        Err(e) => e.into(),
    }
}
