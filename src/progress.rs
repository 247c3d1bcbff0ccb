//! Learner-facing flows: course visits, gated chapter and test pages, test
//! submission, the diagnostic assessment, and progress summaries.

use std::collections::BTreeMap;

use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    assessment::{self, Quiz},
    bank::AssessmentBanks,
    catalog::{Catalog, Chapter, Course},
    error::{AppError, AppResult},
    gating::{self, Access, Location},
    models::{Answers, CourseProgress, DiagnosticScore, TestResult, User},
    store::{AttemptRequest, StartingPoint, Store, StoreError},
};

pub const NOTICE_ASSESSED: &str = "You have already completed the assessment";
pub const NOTICE_ASSESSMENT_FIRST: &str = "Please complete the assessment first";

/// A page, or where to send the learner instead.
#[derive(Debug)]
pub enum Gated<T> {
    Page(T),
    Redirect { to: Location, notice: &'static str },
}

impl<T> Gated<T> {
    fn redirect(to: Location, notice: &'static str) -> Self {
        Gated::Redirect { to, notice }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProgressSummary {
    pub current_chapter: i32,
    pub chapter_count: i32,
    pub percentage: f64,
    pub completed: bool,
}

impl ProgressSummary {
    fn new(progress: &CourseProgress, chapter_count: i32) -> Self {
        Self {
            current_chapter: progress.current_chapter,
            chapter_count,
            percentage: progress.percentage(chapter_count),
            completed: progress.completed,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct CourseSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub chapter_count: i32,
}

impl From<&Course> for CourseSummary {
    fn from(c: &Course) -> Self {
        Self {
            id: c.id.clone(),
            title: c.title.clone(),
            description: c.description.clone(),
            chapter_count: c.chapter_count(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ChapterLink {
    pub id: i32,
    pub title: String,
    pub unlocked: bool,
    pub has_test: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct CoursePage {
    pub course: CourseSummary,
    pub progress: ProgressSummary,
    pub chapters: Vec<ChapterLink>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ChapterPage {
    pub course_name: String,
    pub course_title: String,
    pub chapter: Chapter,
    pub has_test: bool,
    pub previous_chapter: Option<i32>,
    pub next_chapter: Option<i32>,
}

#[derive(Serialize, Debug, Clone)]
pub struct TestQuestionView {
    pub id: i32,
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct TestPage {
    pub course_name: String,
    pub chapter_id: i32,
    pub title: String,
    pub questions: Vec<TestQuestionView>,
    pub latest: Option<TestResult>,
}

#[derive(Serialize, Debug, Clone)]
pub struct TestOutcome {
    pub score: f64,
    pub correct: usize,
    pub total: usize,
    pub passed: bool,
    pub attempt_number: i32,
    pub consecutive_failures: i32,
    pub is_locked: bool,
    pub progress: ProgressSummary,
    pub next: String,
    pub notice: String,
}

pub struct StartedQuiz {
    pub quiz_id: Uuid,
    pub quiz: Quiz,
}

#[derive(Serialize, Debug, Clone)]
pub struct AssessmentResult {
    pub recommended_course: String,
    pub scores: BTreeMap<String, DiagnosticScore>,
    pub next: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct Dashboard {
    pub user: User,
    pub recommended_course: String,
    pub scores: BTreeMap<String, DiagnosticScore>,
    pub progress: BTreeMap<String, ProgressSummary>,
    pub courses: Vec<CourseSummary>,
}

fn find_course<'a>(catalog: &'a Catalog, course: &str) -> AppResult<&'a Course> {
    catalog
        .course(course)
        .ok_or_else(|| AppError::not_found("Course not found"))
}

fn find_chapter<'a>(course: &'a Course, chapter_id: i32) -> AppResult<&'a Chapter> {
    course
        .chapter(chapter_id)
        .ok_or_else(|| AppError::not_found("Chapter not found"))
}

/// Course page; the first visit creates progress at chapter 1.
pub async fn course_page(
    store: &dyn Store,
    catalog: &Catalog,
    user_id: Uuid,
    course: &str,
) -> AppResult<CoursePage> {
    let course = find_course(catalog, course)?;
    let progress = store.get_or_create_course_progress(user_id, &course.id).await?;
    let chapters = course
        .chapters
        .iter()
        .map(|ch| ChapterLink {
            id: ch.id,
            title: ch.title.clone(),
            unlocked: ch.id <= progress.current_chapter,
            has_test: !ch.questions.is_empty(),
        })
        .collect();
    Ok(CoursePage {
        course: course.into(),
        progress: ProgressSummary::new(&progress, course.chapter_count()),
        chapters,
    })
}

pub async fn chapter_page(
    store: &dyn Store,
    catalog: &Catalog,
    user_id: Uuid,
    course: &str,
    chapter_id: i32,
) -> AppResult<Gated<ChapterPage>> {
    let course = find_course(catalog, course)?;
    let chapter = find_chapter(course, chapter_id)?;
    let progress = store.get_course_progress(user_id, &course.id).await?;

    if let Access::Redirect { to, notice } =
        gating::chapter_access(course, progress.as_ref(), chapter_id)
    {
        return Ok(Gated::redirect(to, notice));
    }

    Ok(Gated::Page(ChapterPage {
        course_name: course.id.clone(),
        course_title: course.title.clone(),
        chapter: chapter.clone(),
        has_test: !chapter.questions.is_empty(),
        previous_chapter: (chapter_id > 1).then(|| chapter_id - 1),
        next_chapter: (chapter_id < course.chapter_count()).then(|| chapter_id + 1),
    }))
}

/// Resolve a chapter test and apply both gates. Chapters without questions
/// have no test.
async fn gated_test<'a>(
    store: &dyn Store,
    catalog: &'a Catalog,
    user_id: Uuid,
    course: &str,
    chapter_id: i32,
) -> AppResult<Gated<(&'a Course, &'a Chapter, Option<TestResult>)>> {
    let course = find_course(catalog, course)?;
    let chapter = find_chapter(course, chapter_id)?;
    if chapter.questions.is_empty() {
        return Err(AppError::not_found("Test not found"));
    }
    let progress = store.get_course_progress(user_id, &course.id).await?;
    let latest = store
        .get_latest_test_result(user_id, &course.id, chapter_id)
        .await?;
    match gating::test_access(course, progress.as_ref(), latest.as_ref(), chapter_id) {
        Access::Granted => Ok(Gated::Page((course, chapter, latest))),
        Access::Redirect { to, notice } => Ok(Gated::redirect(to, notice)),
    }
}

pub async fn test_page(
    store: &dyn Store,
    catalog: &Catalog,
    user_id: Uuid,
    course: &str,
    chapter_id: i32,
) -> AppResult<Gated<TestPage>> {
    let (course, chapter, latest) =
        match gated_test(store, catalog, user_id, course, chapter_id).await? {
            Gated::Page(found) => found,
            Gated::Redirect { to, notice } => return Ok(Gated::redirect(to, notice)),
        };
    Ok(Gated::Page(TestPage {
        course_name: course.id.clone(),
        chapter_id,
        title: chapter.title.clone(),
        questions: chapter
            .questions
            .iter()
            .map(|q| TestQuestionView {
                id: q.id,
                question: q.question.clone(),
                options: q.options.clone(),
            })
            .collect(),
        latest,
    }))
}

/// Grade a chapter test, append the attempt and advance progress.
pub async fn submit_test(
    store: &dyn Store,
    catalog: &Catalog,
    user_id: Uuid,
    course: &str,
    chapter_id: i32,
    answers: &Answers,
) -> AppResult<Gated<TestOutcome>> {
    let (course, chapter, _) =
        match gated_test(store, catalog, user_id, course, chapter_id).await? {
            Gated::Page(found) => found,
            Gated::Redirect { to, notice } => return Ok(Gated::redirect(to, notice)),
        };

    let grade = gating::grade(&chapter.questions, answers);
    debug!(course = %course.id, chapter_id, ?grade, "graded chapter test");

    let recorded = match store
        .record_test_attempt(AttemptRequest {
            user_id,
            course: course.id.clone(),
            chapter_id,
            chapter_count: course.chapter_count(),
            grade,
        })
        .await
    {
        Ok(recorded) => recorded,
        // another submission got in first
        Err(StoreError::Refused(refusal)) => {
            debug!(%user_id, course = %course.id, chapter_id, ?refusal, "test attempt refused");
            let (to, notice) = refusal.redirect(course, chapter_id);
            return Ok(Gated::redirect(to, notice));
        }
        Err(e) => return Err(e.into()),
    };

    let next = gating::after_attempt(course, chapter_id, &recorded.state, grade.passed);
    let notice = if recorded.state.is_locked {
        "Chapter locked due to consecutive failures.".to_string()
    } else if grade.passed {
        format!("Test passed! Score: {:.2}%", grade.score)
    } else {
        format!(
            "Test failed. Score: {:.2}%. Need {}% to pass.",
            grade.score,
            gating::PASS_THRESHOLD
        )
    };
    info!(
        %user_id,
        course = %course.id,
        chapter_id,
        score = grade.score,
        passed = grade.passed,
        locked = recorded.state.is_locked,
        "test attempt recorded"
    );

    Ok(Gated::Page(TestOutcome {
        score: grade.score,
        correct: grade.correct,
        total: grade.total,
        passed: grade.passed,
        attempt_number: recorded.state.attempt_number,
        consecutive_failures: recorded.state.consecutive_failures,
        is_locked: recorded.state.is_locked,
        progress: ProgressSummary::new(&recorded.progress, course.chapter_count()),
        next: next.path(),
        notice,
    }))
}

/// Generate and persist a fresh diagnostic quiz.
pub async fn start_assessment(
    store: &dyn Store,
    banks: &AssessmentBanks,
    user_id: Uuid,
) -> AppResult<Gated<StartedQuiz>> {
    if store.get_user_progress(user_id).await?.is_some() {
        return Ok(Gated::redirect(Location::Dashboard, NOTICE_ASSESSED));
    }
    let quiz = assessment::generate_quiz(banks, &mut StdRng::from_entropy())?;
    let quiz_id = store.save_quiz(user_id, &quiz).await?;
    debug!(%quiz_id, questions = quiz.questions.len(), "assessment quiz issued");
    Ok(Gated::Page(StartedQuiz { quiz_id, quiz }))
}

/// Score a stored quiz and commit the learner's starting points.
pub async fn submit_assessment(
    store: &dyn Store,
    catalog: &Catalog,
    banks: &AssessmentBanks,
    user_id: Uuid,
    quiz_id: Uuid,
    answers: &Answers,
) -> AppResult<Gated<AssessmentResult>> {
    if store.get_user_progress(user_id).await?.is_some() {
        return Ok(Gated::redirect(Location::Dashboard, NOTICE_ASSESSED));
    }
    let quiz = store
        .load_quiz(user_id, quiz_id)
        .await?
        .ok_or_else(|| AppError::not_found("Assessment quiz not found"))?;

    let courses: Vec<&str> = banks.courses().collect();
    let outcome = assessment::score_quiz(&quiz, answers, &courses);

    let starts: Vec<StartingPoint> = outcome
        .scores
        .iter()
        .filter_map(|s| match catalog.course(&s.course) {
            Some(course) => Some(StartingPoint {
                course: s.course.clone(),
                chapter: s.recommended_chapter.min(course.chapter_count()),
            }),
            None => {
                warn!(course = %s.course, "assessed course is missing from the catalog");
                None
            }
        })
        .collect();

    let progress = store
        .complete_assessment(user_id, quiz_id, &outcome, &starts)
        .await?;
    info!(
        %user_id,
        recommended = %progress.recommended_course,
        "assessment completed"
    );

    Ok(Gated::Page(AssessmentResult {
        recommended_course: progress.recommended_course.clone(),
        scores: progress.scores.0.clone(),
        next: Location::Dashboard.path(),
    }))
}

/// Per-course progress keyed by course id.
pub async fn progress_map(
    store: &dyn Store,
    catalog: &Catalog,
    user_id: Uuid,
) -> AppResult<BTreeMap<String, ProgressSummary>> {
    let rows = store.list_course_progress(user_id).await?;
    Ok(rows
        .iter()
        .filter_map(|p| {
            let course = catalog.course(&p.course_name)?;
            Some((
                p.course_name.clone(),
                ProgressSummary::new(p, course.chapter_count()),
            ))
        })
        .collect())
}

pub async fn dashboard(
    store: &dyn Store,
    catalog: &Catalog,
    user_id: Uuid,
) -> AppResult<Gated<Dashboard>> {
    let user = store
        .get_user(user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let Some(assessed) = store.get_user_progress(user_id).await? else {
        return Ok(Gated::redirect(Location::Assessment, NOTICE_ASSESSMENT_FIRST));
    };
    let progress = progress_map(store, catalog, user_id).await?;
    Ok(Gated::Page(Dashboard {
        user,
        recommended_course: assessed.recommended_course,
        scores: assessed.scores.0,
        progress,
        courses: catalog.courses().iter().map(CourseSummary::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Barrier;

    use crate::{
        assessment::{AssessmentOutcome, QuestionStyle},
        bank::{BankRecord, QuestionBank},
        models::{SubmittedAnswer, UserProgress},
        store::{MemoryStore, NewUser, RecordedAttempt, StoreResult},
    };

    fn catalog() -> Catalog {
        let chapters: Vec<String> = (1..=3)
            .map(|id| {
                format!(
                    r#"{{"id": {id}, "title": "Chapter {id}", "content": "text {id}", "test": "t{id}"}}"#
                )
            })
            .collect();
        let raw = format!(
            r#"{{"python": {{"title": "Python", "description": "d", "chapters": [{}]}}}}"#,
            chapters.join(",")
        );
        let mut catalog = Catalog::from_json(&raw).unwrap();
        let tests = r#"{"python": {"chapters": {
            "chapter1": {"questions": [{"question": "q", "options": ["a", "b"], "correct_option": "a"}]},
            "chapter2": {"questions": [{"question": "q", "options": ["a", "b"], "correct_option": "b"}]}
        }}}"#;
        catalog.attach_tests("python", tests).unwrap();
        catalog
    }

    fn answers(option: i64) -> Answers {
        Answers::from([("question_1".to_string(), SubmittedAnswer::from(option))])
    }

    async fn user(store: &MemoryStore) -> Uuid {
        store
            .create_user(NewUser {
                name: "Grace".into(),
                email: "grace@example.com".into(),
                password_hash: "x".into(),
                age: 30,
                degree: "BSc".into(),
                branch: "CS".into(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn chapter_ahead_of_progress_redirects_to_current() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let uid = user(&store).await;

        // no progress row yet
        let Gated::Redirect { to, .. } = chapter_page(&store, &catalog, uid, "python", 1).await.unwrap()
        else {
            panic!("expected redirect");
        };
        assert_eq!(to, Location::Course("python".into()));

        course_page(&store, &catalog, uid, "python").await.unwrap();
        assert!(matches!(
            chapter_page(&store, &catalog, uid, "python", 1).await.unwrap(),
            Gated::Page(_)
        ));
        let Gated::Redirect { to, notice } =
            chapter_page(&store, &catalog, uid, "python", 3).await.unwrap()
        else {
            panic!("expected redirect");
        };
        assert_eq!(to, Location::Chapter("python".into(), 1));
        assert_eq!(notice, gating::NOTICE_PREVIOUS_FIRST);
    }

    #[tokio::test]
    async fn unknown_course_and_chapter_are_not_found() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let uid = user(&store).await;
        assert!(matches!(
            course_page(&store, &catalog, uid, "rust").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            chapter_page(&store, &catalog, uid, "python", 4).await,
            Err(AppError::NotFound(_))
        ));
        // chapter 3 exists but carries no questions
        course_page(&store, &catalog, uid, "python").await.unwrap();
        assert!(matches!(
            test_page(&store, &catalog, uid, "python", 3).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn passing_moves_to_next_chapter() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let uid = user(&store).await;
        course_page(&store, &catalog, uid, "python").await.unwrap();

        let Gated::Page(outcome) = submit_test(&store, &catalog, uid, "python", 1, &answers(1))
            .await
            .unwrap()
        else {
            panic!("expected outcome");
        };
        assert!(outcome.passed);
        assert_eq!(outcome.score, 100.0);
        assert_eq!(outcome.next, "/api/chapters/python/2");
        assert_eq!(outcome.progress.current_chapter, 2);
        assert_eq!(outcome.notice, "Test passed! Score: 100.00%");
    }

    #[tokio::test]
    async fn two_failures_lock_the_chapter_test() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let uid = user(&store).await;
        course_page(&store, &catalog, uid, "python").await.unwrap();
        submit_test(&store, &catalog, uid, "python", 1, &answers(1)).await.unwrap();

        let Gated::Page(first) = submit_test(&store, &catalog, uid, "python", 2, &answers(1))
            .await
            .unwrap()
        else {
            panic!("expected outcome");
        };
        assert!(!first.is_locked);
        assert_eq!(first.next, "/api/chapters/python/2");
        assert_eq!(first.notice, "Test failed. Score: 0.00%. Need 60% to pass.");

        let Gated::Page(second) = submit_test(&store, &catalog, uid, "python", 2, &answers(1))
            .await
            .unwrap()
        else {
            panic!("expected outcome");
        };
        assert!(second.is_locked);
        assert_eq!(second.next, "/api/chapters/python/1");

        let Gated::Redirect { to, notice } =
            test_page(&store, &catalog, uid, "python", 2).await.unwrap()
        else {
            panic!("expected redirect");
        };
        assert_eq!(to, Location::Chapter("python".into(), 1));
        assert_eq!(notice, gating::NOTICE_LOCKED);
    }

    fn banks() -> AssessmentBanks {
        let records = (1..=6)
            .map(|i| BankRecord::new(&format!("concept {i}"), &format!("description {i}")))
            .collect();
        AssessmentBanks {
            banks: vec![QuestionBank::new("python", QuestionStyle::Descriptive, records).unwrap()],
        }
    }

    #[tokio::test]
    async fn assessment_commits_clamped_start_once() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let banks = banks();
        let uid = user(&store).await;

        let Gated::Page(started) = start_assessment(&store, &banks, uid).await.unwrap() else {
            panic!("expected quiz");
        };
        assert_eq!(started.quiz.questions.len(), 5);

        // answer everything correctly: 100% recommends chapter 7, clamped to 3
        let answers: Answers = started
            .quiz
            .questions
            .iter()
            .map(|q| {
                let pos = q.options.iter().position(|o| *o == q.answer).unwrap();
                (q.id.to_string(), SubmittedAnswer::from(pos as i64 + 1))
            })
            .collect();
        let Gated::Page(result) =
            submit_assessment(&store, &catalog, &banks, uid, started.quiz_id, &answers)
                .await
                .unwrap()
        else {
            panic!("expected result");
        };
        assert_eq!(result.recommended_course, "python");
        assert_eq!(result.scores["python"].score, 100);
        assert_eq!(result.scores["python"].recommended_chapter, 3);

        let progress = store.get_course_progress(uid, "python").await.unwrap().unwrap();
        assert_eq!(progress.current_chapter, 3);

        assert!(matches!(
            start_assessment(&store, &banks, uid).await.unwrap(),
            Gated::Redirect { to: Location::Dashboard, .. }
        ));
        let Gated::Page(dash) = dashboard(&store, &catalog, uid).await.unwrap() else {
            panic!("expected dashboard");
        };
        assert_eq!(dash.progress["python"].current_chapter, 3);
        assert!((dash.progress["python"].percentage - 200.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn dashboard_requires_assessment() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let uid = user(&store).await;
        assert!(matches!(
            dashboard(&store, &catalog, uid).await.unwrap(),
            Gated::Redirect { to: Location::Assessment, .. }
        ));
    }

    /// Holds every reader of the latest attempt until `barrier` fills, so
    /// concurrent submissions all pass the read-side gate together.
    struct Lockstep {
        inner: MemoryStore,
        barrier: Barrier,
    }

    #[async_trait]
    impl Store for Lockstep {
        async fn create_user(&self, user: NewUser) -> StoreResult<User> {
            self.inner.create_user(user).await
        }
        async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
            self.inner.find_user_by_email(email).await
        }
        async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
            self.inner.get_user(id).await
        }
        async fn get_user_progress(&self, user_id: Uuid) -> StoreResult<Option<UserProgress>> {
            self.inner.get_user_progress(user_id).await
        }
        async fn save_quiz(&self, user_id: Uuid, quiz: &Quiz) -> StoreResult<Uuid> {
            self.inner.save_quiz(user_id, quiz).await
        }
        async fn load_quiz(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<Option<Quiz>> {
            self.inner.load_quiz(user_id, quiz_id).await
        }
        async fn complete_assessment(
            &self,
            user_id: Uuid,
            quiz_id: Uuid,
            outcome: &AssessmentOutcome,
            starts: &[StartingPoint],
        ) -> StoreResult<UserProgress> {
            self.inner
                .complete_assessment(user_id, quiz_id, outcome, starts)
                .await
        }
        async fn get_course_progress(
            &self,
            user_id: Uuid,
            course: &str,
        ) -> StoreResult<Option<CourseProgress>> {
            self.inner.get_course_progress(user_id, course).await
        }
        async fn get_or_create_course_progress(
            &self,
            user_id: Uuid,
            course: &str,
        ) -> StoreResult<CourseProgress> {
            self.inner.get_or_create_course_progress(user_id, course).await
        }
        async fn list_course_progress(&self, user_id: Uuid) -> StoreResult<Vec<CourseProgress>> {
            self.inner.list_course_progress(user_id).await
        }
        async fn get_latest_test_result(
            &self,
            user_id: Uuid,
            course: &str,
            chapter_id: i32,
        ) -> StoreResult<Option<TestResult>> {
            let latest = self
                .inner
                .get_latest_test_result(user_id, course, chapter_id)
                .await;
            self.barrier.wait().await;
            latest
        }
        async fn record_test_attempt(&self, req: AttemptRequest) -> StoreResult<RecordedAttempt> {
            self.inner.record_test_attempt(req).await
        }
    }

    #[tokio::test]
    async fn simultaneous_failures_record_one_locking_attempt() {
        let store = Lockstep {
            inner: MemoryStore::new(),
            barrier: Barrier::new(2),
        };
        let catalog = catalog();
        let uid = user(&store.inner).await;
        course_page(&store.inner, &catalog, uid, "python").await.unwrap();
        submit_test(&store.inner, &catalog, uid, "python", 1, &answers(1)).await.unwrap();
        submit_test(&store.inner, &catalog, uid, "python", 2, &answers(1)).await.unwrap();

        let (answers_a, answers_b) = (answers(1), answers(1));
        let (a, b) = tokio::join!(
            submit_test(&store, &catalog, uid, "python", 2, &answers_a),
            submit_test(&store, &catalog, uid, "python", 2, &answers_b),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let recorded: Vec<&TestOutcome> = outcomes
            .iter()
            .filter_map(|g| match g {
                Gated::Page(outcome) => Some(outcome),
                Gated::Redirect { .. } => None,
            })
            .collect();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].is_locked);
        assert_eq!(recorded[0].attempt_number, 2);
        assert!(outcomes.iter().any(|g| matches!(
            g,
            Gated::Redirect { to: Location::Chapter(_, 1), notice } if *notice == gating::NOTICE_LOCKED
        )));

        let latest = store
            .inner
            .get_latest_test_result(uid, "python", 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.attempt_number, 2);
        assert_eq!(latest.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn malformed_answers_grade_as_wrong() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let uid = user(&store).await;
        course_page(&store, &catalog, uid, "python").await.unwrap();

        let req: crate::models::TestSubmitReq =
            serde_json::from_str(r#"{"answers": {"question_1": null, "question_9": true}}"#).unwrap();
        let Gated::Page(outcome) = submit_test(&store, &catalog, uid, "python", 1, &req.answers)
            .await
            .unwrap()
        else {
            panic!("expected outcome");
        };
        assert!(!outcome.passed);
        assert_eq!(outcome.correct, 0);
        assert_eq!(outcome.attempt_number, 1);
    }

    #[tokio::test]
    async fn reissued_assessment_drops_the_previous_quiz() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let banks = banks();
        let uid = user(&store).await;

        let Gated::Page(first) = start_assessment(&store, &banks, uid).await.unwrap() else {
            panic!("expected quiz");
        };
        let Gated::Page(second) = start_assessment(&store, &banks, uid).await.unwrap() else {
            panic!("expected quiz");
        };
        assert!(store.load_quiz(uid, first.quiz_id).await.unwrap().is_none());
        assert!(matches!(
            submit_assessment(&store, &catalog, &banks, uid, first.quiz_id, &Answers::new()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            submit_assessment(&store, &catalog, &banks, uid, second.quiz_id, &Answers::new())
                .await
                .unwrap(),
            Gated::Page(_)
        ));
    }
}
