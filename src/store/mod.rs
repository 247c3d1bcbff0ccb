//! Persistence contract for accounts, diagnostic results, course progress and
//! the test attempt log.

mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    assessment::{AssessmentOutcome, Quiz},
    gating::{AttemptState, Grade, Refusal},
    models::{CourseProgress, TestResult, User, UserProgress},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    Duplicate(&'static str),
    #[error("test attempt refused: {0:?}")]
    Refused(Refusal),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub age: i32,
    pub degree: String,
    pub branch: String,
}

/// A graded chapter test waiting to be recorded.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub user_id: Uuid,
    pub course: String,
    pub chapter_id: i32,
    pub chapter_count: i32,
    pub grade: Grade,
}

#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    pub result: TestResult,
    pub state: AttemptState,
    pub progress: CourseProgress,
    pub advanced: bool,
}

/// Starting chapter per course decided by the assessment.
#[derive(Debug, Clone)]
pub struct StartingPoint {
    pub course: String,
    pub chapter: i32,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn get_user_progress(&self, user_id: Uuid) -> StoreResult<Option<UserProgress>>;

    /// Store a freshly issued quiz, replacing any the user left unsubmitted.
    async fn save_quiz(&self, user_id: Uuid, quiz: &Quiz) -> StoreResult<Uuid>;
    async fn load_quiz(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<Option<Quiz>>;

    /// Create the user's UserProgress and per-course rows, and consume the quiz,
    /// all or nothing. Existing course rows only move forward.
    async fn complete_assessment(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        outcome: &AssessmentOutcome,
        starts: &[StartingPoint],
    ) -> StoreResult<UserProgress>;

    async fn get_course_progress(
        &self,
        user_id: Uuid,
        course: &str,
    ) -> StoreResult<Option<CourseProgress>>;
    async fn get_or_create_course_progress(
        &self,
        user_id: Uuid,
        course: &str,
    ) -> StoreResult<CourseProgress>;
    async fn list_course_progress(&self, user_id: Uuid) -> StoreResult<Vec<CourseProgress>>;

    async fn get_latest_test_result(
        &self,
        user_id: Uuid,
        course: &str,
        chapter_id: i32,
    ) -> StoreResult<Option<TestResult>>;

    /// Read the latest attempt, derive the next state, append it and advance
    /// course progress as one atomic step per (user, course). The chapter
    /// and lock gates are checked again inside that step and fail with
    /// [`StoreError::Refused`].
    async fn record_test_attempt(&self, req: AttemptRequest) -> StoreResult<RecordedAttempt>;
}
