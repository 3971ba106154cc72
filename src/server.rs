use std::time::Duration;

use axum::{
    extract::{rejection::QueryRejection, FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderName, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::access::{Scope, Viewer};
use crate::db;
use crate::error::AppError;
use crate::models::{Role, UserRecord};
use crate::progress::ActivityWindow;
use crate::report;
use crate::views::{self, RosterQuery, RosterRow, StudentProgressView};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
}

/// Identity forwarded by the upstream session provider.
impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = Uuid::parse_str(header_value(parts, USER_ID_HEADER)?)
            .map_err(|_| AppError::Unauthorized(USER_ID_HEADER))?;
        let role: Role = header_value(parts, USER_ROLE_HEADER)?
            .parse()
            .map_err(|_| AppError::Unauthorized(USER_ROLE_HEADER))?;

        Ok(Viewer { user_id, role })
    }
}

fn header_value<'a>(parts: &'a Parts, name: &'static str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized(name))
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    #[serde(default)]
    pub window: ActivityWindow,
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

async fn health() -> &'static str {
    "ok"
}

async fn student_progress(
    State(state): State<AppState>,
    viewer: Viewer,
    query: Result<Query<WindowQuery>, QueryRejection>,
) -> Result<Json<StudentProgressView>, AppError> {
    let params = query_params(query)?;
    let student = db::fetch_user(&state.pool, viewer.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", viewer.user_id)))?;
    let cohort = db::fetch_cohort(&state.pool, viewer.own_scope()).await?;

    Ok(Json(views::student_view(
        student,
        &cohort,
        Utc::now().date_naive(),
        params.window,
    )))
}

async fn roster_for(
    state: &AppState,
    scope: Scope,
    query: &RosterQuery,
) -> Result<Vec<RosterRow>, AppError> {
    let cohort = db::fetch_cohort(&state.pool, scope).await?;
    Ok(views::roster(&cohort, Utc::now().date_naive(), query))
}

async fn instructor_roster(
    State(state): State<AppState>,
    viewer: Viewer,
    query: Result<Query<RosterQuery>, QueryRejection>,
) -> Result<Json<Vec<RosterRow>>, AppError> {
    let scope = viewer.roster_scope()?;
    let query = query_params(query)?;
    Ok(Json(roster_for(&state, scope, &query).await?))
}

async fn admin_student_progress(
    State(state): State<AppState>,
    viewer: Viewer,
    query: Result<Query<RosterQuery>, QueryRejection>,
) -> Result<Json<Vec<RosterRow>>, AppError> {
    let scope = viewer.analytics_scope()?;
    let query = query_params(query)?;
    Ok(Json(roster_for(&state, scope, &query).await?))
}

async fn admin_student_detail(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(student_id): Path<Uuid>,
    query: Result<Query<WindowQuery>, QueryRejection>,
) -> Result<Json<StudentProgressView>, AppError> {
    viewer.analytics_scope()?;
    let params = query_params(query)?;
    let student = require_student(db::fetch_user(&state.pool, student_id).await?, student_id)?;
    let cohort = db::fetch_cohort(&state.pool, Scope::Student(student_id)).await?;

    Ok(Json(views::student_view(
        student,
        &cohort,
        Utc::now().date_naive(),
        params.window,
    )))
}

/// Staff accounts are not students, so their ids are unknown here.
fn require_student(user: Option<UserRecord>, student_id: Uuid) -> Result<UserRecord, AppError> {
    user.filter(|user| user.role == Role::Student)
        .ok_or_else(|| AppError::NotFound(format!("student {student_id}")))
}

async fn admin_export(
    State(state): State<AppState>,
    viewer: Viewer,
    query: Result<Query<RosterQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let scope = viewer.analytics_scope()?;
    let query = query_params(query)?;
    let rows = roster_for(&state, scope, &query).await?;
    let body = report::export_csv(&rows)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"student-progress.csv\"",
            ),
        ],
        body,
    ))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(USER_ROLE_HEADER),
        ])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health))
        .route("/api/student/progress", get(student_progress))
        .route("/api/instructor/roster", get(instructor_roster))
        .route(
            "/api/admin/analytics/student-progress",
            get(admin_student_progress),
        )
        .route(
            "/api/admin/analytics/student-progress/{id}",
            get(admin_student_detail),
        )
        .route("/api/admin/analytics/export", get(admin_export))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(pool: PgPool, bind_addr: &str) -> anyhow::Result<()> {
    let app = router(AppState { pool });

    let listener = TcpListener::bind(bind_addr).await?;
    info!("Server running on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                error!("failed to install terminate handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    // Every request below is rejected before the pool is touched.
    fn app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://learnhub@localhost/learnhub")
            .unwrap();
        router(AppState { pool })
    }

    fn get_as(uri: &str, role: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(role) = role {
            builder = builder
                .header(USER_ID_HEADER, Uuid::new_v4().to_string())
                .header(USER_ROLE_HEADER, role);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app().oneshot(get_as("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let response = app()
            .oneshot(get_as("/api/student/progress", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_role_is_unauthorized() {
        let response = app()
            .oneshot(get_as("/api/student/progress", Some("superuser")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_user_id_is_unauthorized() {
        let request = Request::builder()
            .uri("/api/student/progress")
            .header(USER_ID_HEADER, "not-a-uuid")
            .header(USER_ROLE_HEADER, "student")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn students_cannot_read_rosters() {
        let response = app()
            .oneshot(get_as("/api/instructor/roster", Some("student")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn instructors_cannot_read_admin_analytics() {
        for uri in [
            "/api/admin/analytics/student-progress",
            "/api/admin/analytics/export",
        ] {
            let response = app()
                .oneshot(get_as(uri, Some("instructor")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        }

        let detail = format!("/api/admin/analytics/student-progress/{}", Uuid::new_v4());
        let response = app()
            .oneshot(get_as(&detail, Some("instructor")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn detail_only_resolves_students() {
        let id = Uuid::new_v4();
        let user = |role| UserRecord {
            id,
            full_name: "Maria Santos".to_string(),
            email: "maria.santos@learnhub.dev".to_string(),
            role,
        };

        for role in [Role::Instructor, Role::Admin] {
            let err = require_student(Some(user(role)), id).unwrap_err();
            assert_eq!(err.status(), StatusCode::NOT_FOUND);
            assert_eq!(err.to_string(), format!("student {id} not found"));
        }
        assert_eq!(
            require_student(None, id).unwrap_err().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(require_student(Some(user(Role::Student)), id).unwrap().id, id);
    }

    #[tokio::test]
    async fn bad_sort_key_is_rejected() {
        let response = app()
            .oneshot(get_as(
                "/api/admin/analytics/student-progress?sort=shoe-size",
                Some("admin"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
