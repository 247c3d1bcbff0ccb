use std::collections::BTreeMap;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_sessions::{MemoryStore as SessionMemoryStore, Session, SessionManagerLayer};

use crate::{
    auth::{self, CurrentUser, SESSION_USER_KEY},
    chat::ChatReply,
    error::{AppError, AppResult},
    gating::Location,
    models::{AssessmentSubmitReq, ChatReq, LoginReq, RegisterReq, TestSubmitReq, User},
    progress::{self, CourseSummary, Gated},
    state::AppState,
    store::{NewUser, StoreError},
};

const X_NOTICE: HeaderName = HeaderName::from_static("x-notice");

pub fn router(state: AppState) -> Router {
    Router::new()
        // accounts
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        // diagnostic
        .route("/api/assessment", get(assessment_form).post(assessment_submit))
        .route("/api/dashboard", get(dashboard))
        // learning
        .route("/api/courses", get(list_courses))
        .route("/api/courses/:course", get(course_page))
        .route("/api/chapters/:course/:chapter", get(chapter_page))
        .route("/api/tests/:course/:chapter", get(test_page).post(test_submit))
        .route("/api/progress", get(progress_map))
        .route("/api/chatbot", post(chatbot))
        .with_state(state)
}

/// The full application: health check, API routes and the cookie session.
pub fn app(state: AppState, secure_cookies: bool) -> Router {
    let sessions = SessionManagerLayer::new(SessionMemoryStore::default()).with_secure(secure_cookies);
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(router(state))
        .layer(sessions)
        .layer(DefaultBodyLimit::max(1024 * 1024))
}

fn see_other(to: &Location, notice: &str) -> Response {
    (
        StatusCode::SEE_OTHER,
        [(header::LOCATION, to.path()), (X_NOTICE, notice.to_string())],
    )
        .into_response()
}

fn render<T: Serialize>(page: Gated<T>) -> Response {
    match page {
        Gated::Page(body) => Json(body).into_response(),
        Gated::Redirect { to, notice } => see_other(&to, notice),
    }
}

async fn register(
    State(st): State<AppState>,
    Json(req): Json<RegisterReq>,
) -> AppResult<(StatusCode, Json<User>)> {
    auth::validate_registration(&req)?;
    if st.store.find_user_by_email(req.email.trim()).await?.is_some() {
        return Err(AppError::Conflict("Email already registered".into()));
    }
    let password_hash = auth::hash_password(&req.password)?;
    let user = st
        .store
        .create_user(NewUser {
            name: req.name.trim().to_string(),
            email: req.email.trim().to_string(),
            password_hash,
            age: req.age,
            degree: req.degree.trim().to_string(),
            branch: req.branch.trim().to_string(),
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(_) => AppError::Conflict("Email already registered".into()),
            other => other.into(),
        })?;
    tracing::info!(user_id = %user.id, "registered user");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(st): State<AppState>,
    session: Session,
    Json(req): Json<LoginReq>,
) -> AppResult<Json<Value>> {
    let user = st
        .store
        .find_user_by_email(req.email.trim())
        .await?
        .filter(|u| auth::verify_password(&req.password, &u.password_hash))
        .ok_or(AppError::InvalidCredentials)?;

    session.cycle_id().await?;
    session.insert(SESSION_USER_KEY, user.id).await?;

    let next = if st.store.get_user_progress(user.id).await?.is_some() {
        Location::Dashboard
    } else {
        Location::Assessment
    };
    Ok(Json(json!({ "user_id": user.id, "next": next.path() })))
}

async fn logout(session: Session) -> AppResult<Json<Value>> {
    session.flush().await?;
    Ok(Json(json!({ "message": "You have been logged out" })))
}

async fn assessment_form(
    State(st): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Response> {
    Ok(
        match progress::start_assessment(st.store.as_ref(), &st.banks, user_id).await? {
            Gated::Page(started) => Json(json!({
                "quiz_id": started.quiz_id,
                "questions": started.quiz.view(),
            }))
            .into_response(),
            Gated::Redirect { to, notice } => see_other(&to, notice),
        },
    )
}

async fn assessment_submit(
    State(st): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<AssessmentSubmitReq>,
) -> AppResult<Response> {
    let page = progress::submit_assessment(
        st.store.as_ref(),
        &st.catalog,
        &st.banks,
        user_id,
        req.quiz_id,
        &req.answers,
    )
    .await?;
    Ok(render(page))
}

async fn dashboard(
    State(st): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Response> {
    Ok(render(
        progress::dashboard(st.store.as_ref(), &st.catalog, user_id).await?,
    ))
}

async fn list_courses(
    State(st): State<AppState>,
    _user: CurrentUser,
) -> Json<Vec<CourseSummary>> {
    Json(st.catalog.courses().iter().map(CourseSummary::from).collect())
}

async fn course_page(
    State(st): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(course): Path<String>,
) -> AppResult<Json<progress::CoursePage>> {
    Ok(Json(
        progress::course_page(st.store.as_ref(), &st.catalog, user_id, &course).await?,
    ))
}

async fn chapter_page(
    State(st): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path((course, chapter)): Path<(String, i32)>,
) -> AppResult<Response> {
    Ok(render(
        progress::chapter_page(st.store.as_ref(), &st.catalog, user_id, &course, chapter).await?,
    ))
}

async fn test_page(
    State(st): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path((course, chapter)): Path<(String, i32)>,
) -> AppResult<Response> {
    Ok(render(
        progress::test_page(st.store.as_ref(), &st.catalog, user_id, &course, chapter).await?,
    ))
}

async fn test_submit(
    State(st): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path((course, chapter)): Path<(String, i32)>,
    Json(req): Json<TestSubmitReq>,
) -> AppResult<Response> {
    let page = progress::submit_test(
        st.store.as_ref(),
        &st.catalog,
        user_id,
        &course,
        chapter,
        &req.answers,
    )
    .await?;
    Ok(render(page))
}

async fn progress_map(
    State(st): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<BTreeMap<String, progress::ProgressSummary>>> {
    Ok(Json(
        progress::progress_map(st.store.as_ref(), &st.catalog, user_id).await?,
    ))
}

async fn chatbot(
    State(st): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<ChatReq>,
) -> AppResult<Json<ChatReply>> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("No message provided".into()));
    }
    let course = req.course_name.as_deref().filter(|c| !c.trim().is_empty());
    let chapter = req.chapter_id.filter(|n| *n > 0);
    Ok(Json(st.chat.respond(message, course, chapter).await))
}
