use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString, PickFirst};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub age: i32,
    pub degree: String,
    pub branch: String,
    pub registered_on: DateTime<Utc>,
}

/// Diagnostic result for one course, kept on [`UserProgress`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticScore {
    pub score: i32,
    pub recommended_chapter: i32,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct UserProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub assessment_complete: bool,
    pub recommended_course: String,
    pub scores: Json<BTreeMap<String, DiagnosticScore>>,
    pub last_updated: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CourseProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_name: String,
    pub current_chapter: i32,
    pub completed: bool,
    pub started_on: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl CourseProgress {
    pub fn new(user_id: Uuid, course_name: &str, current_chapter: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            course_name: course_name.to_string(),
            current_chapter,
            completed: false,
            started_on: now,
            last_updated: now,
        }
    }

    /// Share of the course behind the learner, 0..=100.
    pub fn percentage(&self, chapter_count: i32) -> f64 {
        if chapter_count <= 0 {
            return 0.0;
        }
        let done = (self.current_chapter - 1).clamp(0, chapter_count);
        f64::from(done) / f64::from(chapter_count) * 100.0
    }
}

/// One row of the append-only attempt log.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TestResult {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_name: String,
    pub chapter_id: i32,
    pub score: f64,
    pub passed: bool,
    pub attempt_number: i32,
    pub consecutive_failures: i32,
    pub is_locked: bool,
    pub taken_on: DateTime<Utc>,
}

/// A submitted multiple-choice answer: the 1-based option number, sent either
/// as a JSON number or as a string. Anything else (null, floats, booleans,
/// objects) is kept as-is and grades as incorrect.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SubmittedAnswer {
    Number(i64),
    Text(String),
    Other(serde_json::Value),
}

impl SubmittedAnswer {
    /// Zero-based option index, if the answer names one.
    pub fn option_index(&self) -> Option<usize> {
        let n = match self {
            SubmittedAnswer::Number(n) => *n,
            SubmittedAnswer::Text(s) => s.trim().parse::<i64>().ok()?,
            SubmittedAnswer::Other(_) => return None,
        };
        usize::try_from(n).ok()?.checked_sub(1)
    }
}

impl From<i64> for SubmittedAnswer {
    fn from(n: i64) -> Self {
        SubmittedAnswer::Number(n)
    }
}

impl From<&str> for SubmittedAnswer {
    fn from(s: &str) -> Self {
        SubmittedAnswer::Text(s.to_string())
    }
}

/// Answers keyed by question id, as `"3"` or `"question_3"`.
pub type Answers = HashMap<String, SubmittedAnswer>;

/// Resolve a submitted key to a question id.
pub fn answer_key_id(key: &str) -> Option<i32> {
    key.strip_prefix("question_").unwrap_or(key).parse().ok()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterReq {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub age: i32,
    pub degree: String,
    pub branch: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssessmentSubmitReq {
    pub quiz_id: Uuid,
    #[serde(default)]
    pub answers: Answers,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TestSubmitReq {
    #[serde(default)]
    pub answers: Answers,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChatReq {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub course_name: Option<String>,
    /// A number, a numeric string, or empty for none.
    #[serde_as(as = "PickFirst<(_, NoneAsEmptyString)>")]
    #[serde(default)]
    pub chapter_id: Option<i32>,
}
