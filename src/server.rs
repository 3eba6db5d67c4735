//! HTTP host for the classroom data service
//!
//! Mounts the transport-neutral handlers in `classroom::handler` under `/api`.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::Arc;

use crate::classroom::handler::{self, HandlerResponse};
use crate::classroom::ClassroomService;

/// Shared server state injected into all handlers.
#[derive(Clone)]
struct AppState {
    classroom: Arc<dyn ClassroomService>,
}

impl IntoResponse for HandlerResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body)).into_response()
    }
}

async fn list_classes(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> HandlerResponse {
    handler::get_classes(state.classroom.as_ref(), &query).await
}

async fn create_class(State(state): State<AppState>, body: Bytes) -> HandlerResponse {
    handler::create_class(state.classroom.as_ref(), &body).await
}

async fn show_class(
    State(state): State<AppState>,
    Path(class_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> HandlerResponse {
    handler::get_class(state.classroom.as_ref(), &class_id, &query).await
}

async fn update_class(
    State(state): State<AppState>,
    Path(class_id): Path<String>,
    body: Bytes,
) -> HandlerResponse {
    handler::update_class(state.classroom.as_ref(), &class_id, &body).await
}

async fn delete_class(
    State(state): State<AppState>,
    Path(class_id): Path<String>,
) -> HandlerResponse {
    handler::delete_class(state.classroom.as_ref(), &class_id).await
}

async fn add_member(
    State(state): State<AppState>,
    Path(class_id): Path<String>,
    body: Bytes,
) -> HandlerResponse {
    handler::add_member(state.classroom.as_ref(), &class_id, &body).await
}

async fn remove_member(
    State(state): State<AppState>,
    Path((class_id, user_id)): Path<(String, String)>,
) -> HandlerResponse {
    handler::remove_member(state.classroom.as_ref(), &class_id, &user_id).await
}

pub fn router(classroom: Arc<dyn ClassroomService>) -> Router {
    Router::new()
        .route("/api/classes", get(list_classes).post(create_class))
        .route(
            "/api/classes/{id}",
            get(show_class).patch(update_class).delete(delete_class),
        )
        .route("/api/classes/{id}/members", post(add_member))
        .route("/api/classes/{id}/members/{user_id}", delete(remove_member))
        .with_state(AppState { classroom })
}

/// Resolves when `signal` fires. If the listener itself fails, keep serving.
async fn shutdown_signal<F>(signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => tracing::info!("Shutting down"),
        Err(e) => {
            tracing::warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await
        }
    }
}

/// Serve the classroom API until the process is interrupted.
pub async fn serve(bind: &str, classroom: Arc<dyn ClassroomService>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Classroom API listening on http://{}/api", listener.local_addr()?);

    axum::serve(listener, router(classroom))
        .with_graceful_shutdown(shutdown_signal(tokio::signal::ctrl_c()))
        .await
        .context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::classes::{self, NewClass, NewMember};
    use crate::api::{ApiClient, ApiErrorKind, LoginRedirect};
    use crate::auth::store::MemoryTokenStore;
    use crate::auth::tokens::Credential;
    use crate::classroom::MemoryClassroom;
    use crate::config::ApiSettings;
    use crate::models::Role;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoRedirect;

    #[async_trait]
    impl LoginRedirect for NoRedirect {
        async fn redirect_to_login(&self, _route: &str) {}
    }

    async fn spawn_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(MemoryClassroom::new()));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    fn client(base_url: String) -> ApiClient {
        let store = Arc::new(MemoryTokenStore::with_credential(Credential::new(
            "t".into(),
            None,
            None,
        )));
        let settings = ApiSettings {
            base_url,
            timeout_secs: 5,
        };
        ApiClient::new(&settings, store, Arc::new(NoRedirect)).unwrap()
    }

    #[tokio::test]
    async fn test_client_against_live_router() {
        let api = client(spawn_server().await);

        let algebra = classes::create_class(
            &api,
            &NewClass {
                name: "Algebra".into(),
                description: Some("Linear equations".into()),
                owner_id: "u1".into(),
            },
        )
        .await
        .unwrap();
        let biology = classes::create_class(
            &api,
            &NewClass {
                name: "Biology".into(),
                description: None,
                owner_id: "u2".into(),
            },
        )
        .await
        .unwrap();
        classes::add_member(
            &api,
            &biology.id,
            &NewMember {
                user_id: "u1".into(),
                role: Role::Student,
                invited_by: Some("u2".into()),
            },
        )
        .await
        .unwrap();

        let all = classes::get_classes(&api, "u1", None).await.unwrap();
        assert_eq!(all.count, 2);
        assert_eq!(all.data[0].class.id, biology.id);
        assert_eq!(all.data[1].class.id, algebra.id);

        let teaching = classes::get_classes(&api, "u1", Some(Role::Teacher))
            .await
            .unwrap();
        assert_eq!(teaching.count, 1);
        assert_eq!(teaching.data[0].class.name, "Algebra");

        let shown = classes::get_class(&api, &algebra.id, "u1").await.unwrap();
        assert_eq!(shown.role, Role::Teacher);

        classes::remove_member(&api, &biology.id, "u1").await.unwrap();
        let err = classes::get_class(&api, &biology.id, "u1")
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(404));
    }

    #[tokio::test]
    async fn test_bogus_role_is_400() {
        let api = client(spawn_server().await);
        let err = api
            .get::<serde_json::Value>("/classes", &[("userId", "u1"), ("role", "bogus")])
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(400));
        assert_eq!(err.kind(), ApiErrorKind::Validation);
        assert_eq!(
            err.message,
            "Invalid role parameter. Must be \"teacher\" or \"student\""
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let fired = shutdown_signal(async { Ok(()) });
        assert!(tokio::time::timeout(Duration::from_millis(100), fired)
            .await
            .is_ok());

        let broken = shutdown_signal(async { Err(std::io::Error::other("no signal handler")) });
        assert!(tokio::time::timeout(Duration::from_millis(100), broken)
            .await
            .is_err());
    }
}
