// Chapter gating: test grading, the attempt/lockout state machine, and the
// access decisions that route learners back to where they may be.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;

use crate::{
    catalog::{Course, TestQuestion},
    models::{answer_key_id, Answers, CourseProgress, TestResult},
};

pub const PASS_THRESHOLD: f64 = 60.0;
pub const LOCK_AFTER_FAILURES: i32 = 2;

const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-').remove(b'.');

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Grade {
    pub correct: usize,
    pub total: usize,
    pub score: f64,
    pub passed: bool,
}

impl Grade {
    pub fn from_counts(correct: usize, total: usize) -> Self {
        let score = if total > 0 {
            100.0 * correct as f64 / total as f64
        } else {
            0.0
        };
        Self {
            correct,
            total,
            score,
            passed: score >= PASS_THRESHOLD,
        }
    }
}

/// Grade a chapter test. Answers name options by 1-based number; anything that
/// does not resolve to the correct option text is wrong.
pub fn grade(questions: &[TestQuestion], answers: &Answers) -> Grade {
    let mut correct = 0;
    for (key, submitted) in answers {
        let Some(q) = answer_key_id(key).and_then(|id| questions.iter().find(|q| q.id == id))
        else {
            continue;
        };
        let picked = submitted.option_index().and_then(|i| q.options.get(i));
        if picked == Some(&q.correct_option) {
            correct += 1;
        }
    }
    Grade::from_counts(correct, questions.len())
}

/// Bookkeeping for the attempt about to be recorded.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    pub attempt_number: i32,
    pub consecutive_failures: i32,
    pub is_locked: bool,
}

/// Next attempt state for a (user, course, chapter) triple given how many
/// attempts precede it and the latest of them.
///
/// `consecutive_failures` is the length of the failing run ending at this
/// attempt, so the second failure in a row locks every chapter but the first.
/// A pass clears both the run and the lock.
pub fn next_attempt(
    prior_attempts: i64,
    latest: Option<&TestResult>,
    chapter_id: i32,
    passed: bool,
) -> AttemptState {
    let attempt_number = prior_attempts as i32 + 1;
    if passed {
        return AttemptState {
            attempt_number,
            consecutive_failures: 0,
            is_locked: false,
        };
    }
    let run_before = match latest {
        Some(prev) if !prev.passed => prev.consecutive_failures,
        _ => 0,
    };
    let consecutive_failures = run_before + 1;
    AttemptState {
        attempt_number,
        consecutive_failures,
        is_locked: chapter_id > 1 && consecutive_failures >= LOCK_AFTER_FAILURES,
    }
}

/// Move the learner past `chapter_id` if it is their current chapter.
/// Returns whether progress changed.
pub fn advance(progress: &mut CourseProgress, chapter_id: i32, chapter_count: i32) -> bool {
    if chapter_id != progress.current_chapter {
        return false;
    }
    progress.current_chapter += 1;
    if progress.current_chapter > chapter_count {
        progress.completed = true;
    }
    true
}

/// Where a learner is sent instead of the page they asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Dashboard,
    Assessment,
    Course(String),
    Chapter(String, i32),
    Test(String, i32),
}

impl Location {
    pub fn path(&self) -> String {
        match self {
            Location::Dashboard => "/api/dashboard".into(),
            Location::Assessment => "/api/assessment".into(),
            Location::Course(c) => format!("/api/courses/{}", segment(c)),
            Location::Chapter(c, n) => format!("/api/chapters/{}/{n}", segment(c)),
            Location::Test(c, n) => format!("/api/tests/{}/{n}", segment(c)),
        }
    }

    /// The chapter before `chapter_id`, or the course root for chapter 1.
    pub fn previous(course: &str, chapter_id: i32) -> Self {
        if chapter_id > 1 {
            Location::Chapter(course.to_string(), chapter_id - 1)
        } else {
            Location::Course(course.to_string())
        }
    }

    /// The learner's current chapter, or the course root once finished.
    pub fn current(course: &Course, progress: &CourseProgress) -> Self {
        if progress.current_chapter <= course.chapter_count() {
            Location::Chapter(course.id.clone(), progress.current_chapter)
        } else {
            Location::Course(course.id.clone())
        }
    }
}

fn segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Granted,
    Redirect { to: Location, notice: &'static str },
}

pub const NOTICE_PREVIOUS_FIRST: &str = "You need to complete previous chapters first";
pub const NOTICE_LOCKED: &str = "This chapter is locked due to consecutive test failures.";

/// Sequential unlocking: a chapter is open once the learner's current chapter
/// has reached it.
pub fn chapter_access(course: &Course, progress: Option<&CourseProgress>, chapter_id: i32) -> Access {
    match progress {
        None => Access::Redirect {
            to: Location::Course(course.id.clone()),
            notice: NOTICE_PREVIOUS_FIRST,
        },
        Some(p) if chapter_id > p.current_chapter => Access::Redirect {
            to: Location::current(course, p),
            notice: NOTICE_PREVIOUS_FIRST,
        },
        Some(_) => Access::Granted,
    }
}

/// Chapter access plus the lockout rule, read off the latest attempt only.
pub fn test_access(
    course: &Course,
    progress: Option<&CourseProgress>,
    latest: Option<&TestResult>,
    chapter_id: i32,
) -> Access {
    match chapter_access(course, progress, chapter_id) {
        Access::Granted if latest.is_some_and(|r| r.is_locked) => Access::Redirect {
            to: Location::previous(&course.id, chapter_id),
            notice: NOTICE_LOCKED,
        },
        access => access,
    }
}

/// Why an attempt cannot be recorded, judged against the rows it would follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    NotReached { current_chapter: i32 },
    Locked,
}

/// The test gates as checked at write time, under the store's lock.
pub fn attempt_refusal(
    progress: &CourseProgress,
    latest: Option<&TestResult>,
    chapter_id: i32,
) -> Option<Refusal> {
    if chapter_id > progress.current_chapter {
        Some(Refusal::NotReached {
            current_chapter: progress.current_chapter,
        })
    } else if latest.is_some_and(|r| r.is_locked) {
        Some(Refusal::Locked)
    } else {
        None
    }
}

impl Refusal {
    /// Where a refused submission sends the learner, and why.
    pub fn redirect(self, course: &Course, chapter_id: i32) -> (Location, &'static str) {
        match self {
            Refusal::NotReached { current_chapter } => (
                Location::Chapter(course.id.clone(), current_chapter),
                NOTICE_PREVIOUS_FIRST,
            ),
            Refusal::Locked => (Location::previous(&course.id, chapter_id), NOTICE_LOCKED),
        }
    }
}

/// Where to go after recording an attempt.
pub fn after_attempt(course: &Course, chapter_id: i32, state: &AttemptState, passed: bool) -> Location {
    if state.is_locked {
        Location::previous(&course.id, chapter_id)
    } else if passed {
        if chapter_id < course.chapter_count() {
            Location::Chapter(course.id.clone(), chapter_id + 1)
        } else {
            Location::Course(course.id.clone())
        }
    } else {
        Location::Chapter(course.id.clone(), chapter_id)
    }
}
