use crate::batch::ItemError;
use crate::model::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Body of `POST /create-student-course-slip/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCourseSlip {
    pub student_id: EntityId,
    pub course_ids: Vec<EntityId>,
    pub semester_id: EntityId,
}

/// Body of `POST /grades/` and `PUT /grades/{id}/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeWrite {
    pub student: EntityId,
    pub course: EntityId,
    pub semester: EntityId,
    pub grade: String,
    pub grade_point: Option<f64>,
    pub is_published: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayReply {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl GatewayReply {
    pub fn done(message: impl Into<String>) -> Self {
        GatewayReply {
            success: true,
            message: message.into(),
        }
    }

    /// `success: false` is a per-item failure even on a 2xx status.
    pub fn into_result(self) -> Result<String, GatewayError> {
        if self.success {
            Ok(self.message)
        } else {
            Err(GatewayError::Unsuccessful(self.message))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("authentication required: {0}")]
    Authentication(String),
    #[error("CSRF verification failed: {0}")]
    Csrf(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{message}")]
    Rejected {
        status: u16,
        message: String,
        details: Option<Value>,
    },
    #[error("{0}")]
    Unsuccessful(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

fn body_message(body: &Value) -> Option<String> {
    ["detail", "error", "message"]
        .iter()
        .find_map(|k| body.get(*k).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

impl GatewayError {
    /// Classifies a non-2xx backend response; `None` for success statuses.
    pub fn from_response(status: u16, body: &Value) -> Option<Self> {
        if (200..300).contains(&status) {
            return None;
        }
        let detail = body.get("detail").and_then(|v| v.as_str()).unwrap_or("");
        let message = body_message(body).unwrap_or_else(|| format!("HTTP {}", status));
        Some(match status {
            401 => GatewayError::Authentication(message),
            403 if detail.contains("CSRF") => GatewayError::Csrf(message),
            403 if detail.contains("Authentication") => GatewayError::Authentication(message),
            403 => GatewayError::PermissionDenied(message),
            _ => GatewayError::Rejected {
                status,
                message,
                details: body
                    .as_object()
                    .map(|obj| {
                        obj.iter()
                            .filter(|(k, _)| !matches!(k.as_str(), "detail" | "error" | "message"))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect::<serde_json::Map<_, _>>()
                    })
                    .filter(|m| !m.is_empty())
                    .map(Value::Object),
            },
        })
    }

    /// Outcome of a backend call the host replayed: the status first, then the
    /// `success` flag for 2xx bodies that still report a failure.
    pub fn classify_reply(status: u16, body: &Value) -> Result<String, Self> {
        if let Some(e) = Self::from_response(status, body) {
            return Err(e);
        }
        let message = body_message(body).unwrap_or_default();
        match body.get("success").and_then(|v| v.as_bool()) {
            Some(false) if message.is_empty() => Err(GatewayError::Unsuccessful(format!(
                "HTTP {} reported failure",
                status
            ))),
            Some(false) => Err(GatewayError::Unsuccessful(message)),
            _ => Ok(message),
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Authentication(_) => "unauthenticated",
            GatewayError::Csrf(_) => "csrf_rejected",
            GatewayError::PermissionDenied(_) => "forbidden",
            GatewayError::Rejected { status: 404, .. } => "not_found",
            GatewayError::Rejected { status: 400..=499, .. } => "validation_failed",
            GatewayError::Rejected { .. } => "gateway_rejected",
            GatewayError::Unsuccessful(_) => "gateway_rejected",
            GatewayError::Transport(_) => "transport_failed",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            GatewayError::Rejected { details, .. } => details.clone(),
            _ => None,
        }
    }
}

impl ItemError for GatewayError {
    fn is_systemic(&self) -> bool {
        matches!(
            self,
            GatewayError::Authentication(_)
                | GatewayError::Csrf(_)
                | GatewayError::PermissionDenied(_)
        )
    }
}

pub trait CourseSlipGateway {
    fn create_course_slip(&mut self, req: &CreateCourseSlip) -> Result<GatewayReply, GatewayError>;
}

pub trait GradeGateway {
    fn create_grade(&mut self, grade: &GradeWrite) -> Result<GatewayReply, GatewayError>;
    fn update_grade(&mut self, id: EntityId, grade: &GradeWrite) -> Result<GatewayReply, GatewayError>;
    fn set_grade_published(&mut self, id: EntityId, published: bool) -> Result<GatewayReply, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_auth_failures() {
        let csrf = GatewayError::from_response(
            403,
            &json!({ "detail": "CSRF Failed: CSRF token missing or incorrect." }),
        );
        assert!(matches!(csrf, Some(GatewayError::Csrf(_))));

        let auth = GatewayError::from_response(
            403,
            &json!({ "detail": "Authentication credentials were not provided." }),
        );
        assert!(matches!(auth, Some(GatewayError::Authentication(_))));

        let perm = GatewayError::from_response(403, &json!({ "error": "Permission denied" }));
        assert!(matches!(perm, Some(GatewayError::PermissionDenied(ref m)) if m == "Permission denied"));

        assert!(matches!(
            GatewayError::from_response(401, &json!({})),
            Some(GatewayError::Authentication(_))
        ));
        for e in [csrf, auth, perm].into_iter().flatten() {
            assert!(e.is_systemic());
        }
    }

    #[test]
    fn replayed_replies_classify_by_status_then_success_flag() {
        assert_eq!(
            GatewayError::classify_reply(201, &json!({ "success": true, "message": "Course slip created" })),
            Ok("Course slip created".to_string())
        );
        assert_eq!(GatewayError::classify_reply(204, &Value::Null), Ok(String::new()));

        let flagged = GatewayError::classify_reply(200, &json!({ "success": false, "error": "Slip exists" }))
            .expect_err("flagged failure");
        assert_eq!(flagged, GatewayError::Unsuccessful("Slip exists".to_string()));
        assert!(!flagged.is_systemic());

        let csrf = GatewayError::classify_reply(403, &json!({ "detail": "CSRF Failed: CSRF cookie not set." }))
            .expect_err("csrf");
        assert_eq!(csrf.code(), "csrf_rejected");
        assert!(csrf.is_systemic());

        let missing = GatewayError::classify_reply(404, &json!({ "detail": "Not found." })).expect_err("404");
        assert_eq!(missing.code(), "not_found");
        assert_eq!(missing.to_string(), "Not found.");
    }

    #[test]
    fn other_statuses_are_per_item() {
        let e = GatewayError::from_response(
            400,
            &json!({ "error": "Invalid courses selected", "invalid_courses": ["CS101 - Wrong department"] }),
        )
        .expect("error");
        assert!(!e.is_systemic());
        assert_eq!(e.to_string(), "Invalid courses selected");
        assert_eq!(e.code(), "validation_failed");
        assert_eq!(
            e.details(),
            Some(json!({ "invalid_courses": ["CS101 - Wrong department"] }))
        );

        let missing = GatewayError::from_response(404, &json!({ "error": "Student not found" }))
            .expect("error");
        assert_eq!(missing.code(), "not_found");
        assert!(GatewayError::from_response(201, &json!({})).is_none());
    }

    #[test]
    fn unsuccessful_reply_is_an_item_failure() {
        let reply = GatewayReply {
            success: false,
            message: "slip exists".to_string(),
        };
        let e = reply.into_result().expect_err("failure");
        assert!(!e.is_systemic());
        assert_eq!(e.to_string(), "slip exists");
    }

    #[test]
    fn create_body_uses_backend_field_names() {
        let body = serde_json::to_value(CreateCourseSlip {
            student_id: 1,
            course_ids: vec![5],
            semester_id: 7,
        })
        .expect("json");
        assert_eq!(body, json!({ "student_id": 1, "course_ids": [5], "semester_id": 7 }));
    }
}
