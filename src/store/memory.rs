use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AttemptRequest, NewUser, RecordedAttempt, StartingPoint, Store, StoreError, StoreResult,
};
use crate::{
    assessment::{AssessmentOutcome, Quiz},
    gating,
    models::{CourseProgress, DiagnosticScore, TestResult, User, UserProgress},
};

/// Process-local store used when no database is configured, and by tests.
/// One mutex serializes every write, which gives the per-key atomicity the
/// attempt log needs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    user_progress: HashMap<Uuid, UserProgress>,
    quizzes: HashMap<Uuid, (Uuid, Quiz)>,
    course_progress: Vec<CourseProgress>,
    test_results: Vec<TestResult>,
}

impl Inner {
    fn course_progress_mut(&mut self, user_id: Uuid, course: &str) -> Option<&mut CourseProgress> {
        self.course_progress
            .iter_mut()
            .find(|p| p.user_id == user_id && p.course_name == course)
    }

    fn results_for<'a>(
        &'a self,
        user_id: Uuid,
        course: &'a str,
        chapter_id: i32,
    ) -> impl DoubleEndedIterator<Item = &'a TestResult> + 'a {
        self.test_results.iter().filter(move |r| {
            r.user_id == user_id && r.course_name == course && r.chapter_id == chapter_id
        })
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.lock().await;
        let email = user.email.to_lowercase();
        if inner.users.iter().any(|u| u.email == email) {
            return Err(StoreError::Duplicate("user"));
        }
        let user = User {
            id: Uuid::new_v4(),
            name: user.name,
            email,
            password_hash: user.password_hash,
            age: user.age,
            degree: user.degree,
            branch: user.branch,
            registered_on: Utc::now(),
        };
        inner.users.push(user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_lowercase();
        let inner = self.inner.lock().await;
        Ok(inner.users.iter().find(|u| u.email == email).cloned())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_progress(&self, user_id: Uuid) -> StoreResult<Option<UserProgress>> {
        Ok(self.inner.lock().await.user_progress.get(&user_id).cloned())
    }

    async fn save_quiz(&self, user_id: Uuid, quiz: &Quiz) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().await;
        inner.quizzes.retain(|_, (owner, _)| *owner != user_id);
        inner.quizzes.insert(id, (user_id, quiz.clone()));
        Ok(id)
    }

    async fn load_quiz(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<Option<Quiz>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .quizzes
            .get(&quiz_id)
            .filter(|(owner, _)| *owner == user_id)
            .map(|(_, quiz)| quiz.clone()))
    }

    async fn complete_assessment(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        outcome: &AssessmentOutcome,
        starts: &[StartingPoint],
    ) -> StoreResult<UserProgress> {
        let mut inner = self.inner.lock().await;
        if inner.user_progress.contains_key(&user_id) {
            return Err(StoreError::Duplicate("assessment result"));
        }
        match inner.quizzes.get(&quiz_id) {
            Some((owner, _)) if *owner == user_id => {}
            _ => return Err(StoreError::NotFound("assessment quiz")),
        }

        let now = Utc::now();
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
        let progress = UserProgress {
            id: Uuid::new_v4(),
            user_id,
            assessment_complete: true,
            recommended_course: outcome.recommended_course.clone(),
            scores: Json(scores),
            last_updated: now,
        };

        for start in starts {
            let existing = inner
                .course_progress
                .iter()
                .position(|p| p.user_id == user_id && p.course_name == start.course);
            match existing {
                Some(i) => {
                    let row = &mut inner.course_progress[i];
                    if start.chapter > row.current_chapter {
                        row.current_chapter = start.chapter;
                        row.last_updated = now;
                    }
                }
                None => inner
                    .course_progress
                    .push(CourseProgress::new(user_id, &start.course, start.chapter)),
            }
        }
        inner.quizzes.remove(&quiz_id);
        inner.user_progress.insert(user_id, progress.clone());
        Ok(progress)
    }

    async fn get_course_progress(
        &self,
        user_id: Uuid,
        course: &str,
    ) -> StoreResult<Option<CourseProgress>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .course_progress
            .iter()
            .find(|p| p.user_id == user_id && p.course_name == course)
            .cloned())
    }

    async fn get_or_create_course_progress(
        &self,
        user_id: Uuid,
        course: &str,
    ) -> StoreResult<CourseProgress> {
        let mut inner = self.inner.lock().await;
        if let Some(p) = inner.course_progress_mut(user_id, course) {
            return Ok(p.clone());
        }
        let p = CourseProgress::new(user_id, course, 1);
        inner.course_progress.push(p.clone());
        Ok(p)
    }

    async fn list_course_progress(&self, user_id: Uuid) -> StoreResult<Vec<CourseProgress>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .course_progress
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_latest_test_result(
        &self,
        user_id: Uuid,
        course: &str,
        chapter_id: i32,
    ) -> StoreResult<Option<TestResult>> {
        let inner = self.inner.lock().await;
        let latest = inner.results_for(user_id, course, chapter_id).next_back().cloned();
        Ok(latest)
    }

    async fn record_test_attempt(&self, req: AttemptRequest) -> StoreResult<RecordedAttempt> {
        let mut inner = self.inner.lock().await;
        let mut progress = inner
            .course_progress_mut(req.user_id, &req.course)
            .ok_or(StoreError::NotFound("course progress"))?
            .clone();

        let prior = inner.results_for(req.user_id, &req.course, req.chapter_id).count() as i64;
        let latest = inner
            .results_for(req.user_id, &req.course, req.chapter_id)
            .next_back()
            .cloned();
        if let Some(refusal) = gating::attempt_refusal(&progress, latest.as_ref(), req.chapter_id) {
            return Err(StoreError::Refused(refusal));
        }
        let state = gating::next_attempt(prior, latest.as_ref(), req.chapter_id, req.grade.passed);

        let now = Utc::now();
        let result = TestResult {
            id: Uuid::new_v4(),
            user_id: req.user_id,
            course_name: req.course.clone(),
            chapter_id: req.chapter_id,
            score: req.grade.score,
            passed: req.grade.passed,
            attempt_number: state.attempt_number,
            consecutive_failures: state.consecutive_failures,
            is_locked: state.is_locked,
            taken_on: now,
        };

        let advanced = req.grade.passed
            && gating::advance(&mut progress, req.chapter_id, req.chapter_count);
        if advanced {
            progress.last_updated = now;
            if let Some(stored) = inner.course_progress_mut(req.user_id, &req.course) {
                *stored = progress.clone();
            }
        }
        inner.test_results.push(result.clone());

        Ok(RecordedAttempt {
            result,
            state,
            progress,
            advanced,
        })
    }
}
