use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{query, query_as, query_scalar, types::Json, PgConnection};
use uuid::Uuid;

use super::{
    AttemptRequest, NewUser, RecordedAttempt, StartingPoint, Store, StoreError, StoreResult,
};
use crate::{
    assessment::{AssessmentOutcome, AssessmentQuestion, Quiz},
    db::Db,
    gating::{self, AttemptState},
    models::{CourseProgress, DiagnosticScore, TestResult, User, UserProgress},
};

const USER_COLS: &str = "id, name, email, password_hash, age, degree, branch, registered_on";
const COURSE_PROGRESS_COLS: &str =
    "id, user_id, course_name, current_chapter, completed, started_on, last_updated";
const TEST_RESULT_COLS: &str = "id, user_id, course_name, chapter_id, score, passed, \
     attempt_number, consecutive_failures, is_locked, taken_on";

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(d) if d.code().as_deref() == Some("23505"))
}

async fn latest_test_result(
    conn: &mut PgConnection,
    user_id: Uuid,
    course: &str,
    chapter_id: i32,
) -> Result<Option<TestResult>, sqlx::Error> {
    query_as::<_, TestResult>(&format!(
        "SELECT {TEST_RESULT_COLS} FROM test_results
         WHERE user_id = $1 AND course_name = $2 AND chapter_id = $3
         ORDER BY taken_on DESC, attempt_number DESC
         LIMIT 1"
    ))
    .bind(user_id)
    .bind(course)
    .bind(chapter_id)
    .fetch_optional(conn)
    .await
}

async fn insert_test_result(
    conn: &mut PgConnection,
    req: &AttemptRequest,
    state: &AttemptState,
) -> Result<TestResult, sqlx::Error> {
    query_as::<_, TestResult>(&format!(
        "INSERT INTO test_results
            (id, user_id, course_name, chapter_id, score, passed,
             attempt_number, consecutive_failures, is_locked)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
         RETURNING {TEST_RESULT_COLS}"
    ))
    .bind(Uuid::new_v4())
    .bind(req.user_id)
    .bind(&req.course)
    .bind(req.chapter_id)
    .bind(req.grade.score)
    .bind(req.grade.passed)
    .bind(state.attempt_number)
    .bind(state.consecutive_failures)
    .bind(state.is_locked)
    .fetch_one(conn)
    .await
}

async fn update_course_progress(
    conn: &mut PgConnection,
    progress: &CourseProgress,
) -> Result<CourseProgress, sqlx::Error> {
    query_as::<_, CourseProgress>(&format!(
        "UPDATE course_progress
         SET current_chapter = $2, completed = $3, last_updated = now()
         WHERE id = $1
         RETURNING {COURSE_PROGRESS_COLS}"
    ))
    .bind(progress.id)
    .bind(progress.current_chapter)
    .bind(progress.completed)
    .fetch_one(conn)
    .await
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let res = query_as::<_, User>(&format!(
            "INSERT INTO users (id, name, email, password_hash, age, degree, branch)
             VALUES ($1,$2,$3,$4,$5,$6,$7)
             RETURNING {USER_COLS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(user.email.to_lowercase())
        .bind(&user.password_hash)
        .bind(user.age)
        .bind(&user.degree)
        .bind(&user.branch)
        .fetch_one(&self.db)
        .await;
        match res {
            Ok(u) => Ok(u),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate("user")),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(
            query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE email = $1"))
                .bind(email.to_lowercase())
                .fetch_optional(&self.db)
                .await?,
        )
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(
            query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    async fn get_user_progress(&self, user_id: Uuid) -> StoreResult<Option<UserProgress>> {
        Ok(query_as::<_, UserProgress>(
            "SELECT id, user_id, assessment_complete, recommended_course, scores, last_updated
             FROM user_progress WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?)
    }

    async fn save_quiz(&self, user_id: Uuid, quiz: &Quiz) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        let mut tx = self.db.begin().await?;
        query("DELETE FROM assessment_quizzes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        query("INSERT INTO assessment_quizzes (id, user_id, questions) VALUES ($1,$2,$3)")
            .bind(id)
            .bind(user_id)
            .bind(Json(&quiz.questions))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn load_quiz(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<Option<Quiz>> {
        let questions: Option<Json<Vec<AssessmentQuestion>>> = query_scalar(
            "SELECT questions FROM assessment_quizzes WHERE id = $1 AND user_id = $2",
        )
        .bind(quiz_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(questions.map(|Json(questions)| Quiz { questions }))
    }

    async fn complete_assessment(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        outcome: &AssessmentOutcome,
        starts: &[StartingPoint],
    ) -> StoreResult<UserProgress> {
        let mut tx = self.db.begin().await?;

        let consumed = query("DELETE FROM assessment_quizzes WHERE id = $1 AND user_id = $2")
            .bind(quiz_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if consumed.rows_affected() == 0 {
            return Err(StoreError::NotFound("assessment quiz"));
        }

        let scores: BTreeMap<String, DiagnosticScore> = outcome
            .scores
            .iter()
            .map(|s| {
                let start = starts
                    .iter()
                    .find(|p| p.course == s.course)
                    .map_or(s.recommended_chapter, |p| p.chapter);
                (
                    s.course.clone(),
                    DiagnosticScore {
                        score: s.percentage.round() as i32,
                        recommended_chapter: start,
                    },
                )
            })
            .collect();

        let progress = query_as::<_, UserProgress>(
            "INSERT INTO user_progress (id, user_id, recommended_course, scores)
             VALUES ($1,$2,$3,$4)
             ON CONFLICT (user_id) DO NOTHING
             RETURNING id, user_id, assessment_complete, recommended_course, scores, last_updated",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&outcome.recommended_course)
        .bind(Json(&scores))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::Duplicate("assessment result"))?;

        for start in starts {
            query(
                "INSERT INTO course_progress (id, user_id, course_name, current_chapter)
                 VALUES ($1,$2,$3,$4)
                 ON CONFLICT (user_id, course_name) DO UPDATE
                 SET current_chapter = GREATEST(course_progress.current_chapter, EXCLUDED.current_chapter),
                     last_updated = now()",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&start.course)
            .bind(start.chapter)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(progress)
    }

    async fn get_course_progress(
        &self,
        user_id: Uuid,
        course: &str,
    ) -> StoreResult<Option<CourseProgress>> {
        Ok(query_as::<_, CourseProgress>(&format!(
            "SELECT {COURSE_PROGRESS_COLS} FROM course_progress
             WHERE user_id = $1 AND course_name = $2"
        ))
        .bind(user_id)
        .bind(course)
        .fetch_optional(&self.db)
        .await?)
    }

    async fn get_or_create_course_progress(
        &self,
        user_id: Uuid,
        course: &str,
    ) -> StoreResult<CourseProgress> {
        query(
            "INSERT INTO course_progress (id, user_id, course_name, current_chapter)
             VALUES ($1,$2,$3,1)
             ON CONFLICT (user_id, course_name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(course)
        .execute(&self.db)
        .await?;
        self.get_course_progress(user_id, course)
            .await?
            .ok_or(StoreError::NotFound("course progress"))
    }

    async fn list_course_progress(&self, user_id: Uuid) -> StoreResult<Vec<CourseProgress>> {
        Ok(query_as::<_, CourseProgress>(&format!(
            "SELECT {COURSE_PROGRESS_COLS} FROM course_progress
             WHERE user_id = $1 ORDER BY course_name"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?)
    }

    async fn get_latest_test_result(
        &self,
        user_id: Uuid,
        course: &str,
        chapter_id: i32,
    ) -> StoreResult<Option<TestResult>> {
        let mut conn = self.db.acquire().await?;
        Ok(latest_test_result(&mut conn, user_id, course, chapter_id).await?)
    }

    async fn record_test_attempt(&self, req: AttemptRequest) -> StoreResult<RecordedAttempt> {
        let mut tx = self.db.begin().await?;

        // the row lock serializes concurrent attempts by the same user on this course
        let mut progress = query_as::<_, CourseProgress>(&format!(
            "SELECT {COURSE_PROGRESS_COLS} FROM course_progress
             WHERE user_id = $1 AND course_name = $2
             FOR UPDATE"
        ))
        .bind(req.user_id)
        .bind(&req.course)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("course progress"))?;

        let prior: i64 = query_scalar(
            "SELECT COUNT(*) FROM test_results
             WHERE user_id = $1 AND course_name = $2 AND chapter_id = $3",
        )
        .bind(req.user_id)
        .bind(&req.course)
        .bind(req.chapter_id)
        .fetch_one(&mut *tx)
        .await?;
        let latest = latest_test_result(&mut tx, req.user_id, &req.course, req.chapter_id).await?;
        if let Some(refusal) = gating::attempt_refusal(&progress, latest.as_ref(), req.chapter_id) {
            return Err(StoreError::Refused(refusal));
        }

        let state = gating::next_attempt(prior, latest.as_ref(), req.chapter_id, req.grade.passed);
        let result = insert_test_result(&mut tx, &req, &state).await?;

        let advanced = req.grade.passed
            && gating::advance(&mut progress, req.chapter_id, req.chapter_count);
        if advanced {
            progress = update_course_progress(&mut tx, &progress).await?;
        }

        tx.commit().await?;
        Ok(RecordedAttempt {
            result,
            state,
            progress,
            advanced,
        })
    }
}
