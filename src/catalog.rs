use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: malformed JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{path}: malformed CSV: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("invalid content: {0}")]
    Invalid(String),
}

/// A chapter test question as served to the learner and graded on submit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TestQuestion {
    pub id: i32,
    pub question: String,
    pub options: Vec<String>,
    pub correct_option: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Chapter {
    pub id: i32,
    pub title: String,
    pub content: String,
    pub test: String,
    #[serde(skip)]
    pub questions: Vec<TestQuestion>,
}

#[derive(Serialize, Debug, Clone)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: String,
    pub chapters: Vec<Chapter>,
}

impl Course {
    pub fn chapter_count(&self) -> i32 {
        self.chapters.len() as i32
    }

    pub fn chapter(&self, id: i32) -> Option<&Chapter> {
        if id < 1 {
            return None;
        }
        self.chapters.get(id as usize - 1)
    }
}

/// Static course content, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    courses: Vec<Course>,
}

#[derive(Deserialize)]
struct CourseJson {
    title: String,
    #[serde(default)]
    description: String,
    chapters: Vec<Chapter>,
}

#[derive(Deserialize)]
struct TestBankJson {
    chapters: BTreeMap<String, ChapterTestJson>,
}

#[derive(Deserialize)]
struct ChapterTestJson {
    #[serde(default)]
    questions: Vec<QuestionJson>,
}

#[derive(Deserialize)]
struct QuestionJson {
    question: String,
    options: Vec<String>,
    correct_option: String,
}

impl Catalog {
    /// Load `courses.json` from `dir`, then attach each course's chapter tests
    /// from `new_<course>.json` when that file exists.
    pub fn load(dir: &Path) -> Result<Self, ContentError> {
        let path = dir.join("courses.json");
        let raw = read(&path)?;
        let mut catalog =
            Self::from_json(&raw).map_err(|e| with_path(e, &path))?;

        let ids: Vec<String> = catalog.courses.iter().map(|c| c.id.clone()).collect();
        for id in ids {
            let bank_path = dir.join(format!("new_{id}.json"));
            if !bank_path.exists() {
                tracing::warn!(course = %id, path = %bank_path.display(), "no chapter tests for course");
                continue;
            }
            let raw = read(&bank_path)?;
            catalog
                .attach_tests(&id, &raw)
                .map_err(|e| with_path(e, &bank_path))?;
        }
        Ok(catalog)
    }

    pub fn from_json(raw: &str) -> Result<Self, ContentError> {
        let parsed: BTreeMap<String, CourseJson> =
            serde_json::from_str(raw).map_err(|source| ContentError::Json {
                path: PathBuf::from("courses.json"),
                source,
            })?;
        if parsed.is_empty() {
            return Err(ContentError::Invalid("no courses defined".into()));
        }

        let mut courses = Vec::with_capacity(parsed.len());
        for (id, c) in parsed {
            if c.title.trim().is_empty() {
                return Err(ContentError::Invalid(format!("course {id} has no title")));
            }
            if c.chapters.is_empty() {
                return Err(ContentError::Invalid(format!("course {id} has no chapters")));
            }
            for (i, ch) in c.chapters.iter().enumerate() {
                let expected = i as i32 + 1;
                if ch.id != expected {
                    return Err(ContentError::Invalid(format!(
                        "course {id}: chapter at position {expected} has id {}",
                        ch.id
                    )));
                }
                if ch.title.trim().is_empty() {
                    return Err(ContentError::Invalid(format!(
                        "course {id}: chapter {expected} has no title"
                    )));
                }
            }
            courses.push(Course {
                id,
                title: c.title,
                description: c.description,
                chapters: c.chapters,
            });
        }
        Ok(Self { courses })
    }

    /// Parse a chapter test bank and attach its questions to `course_id`.
    pub fn attach_tests(&mut self, course_id: &str, raw: &str) -> Result<(), ContentError> {
        let mut parsed: HashMap<String, TestBankJson> =
            serde_json::from_str(raw).map_err(|source| ContentError::Json {
                path: PathBuf::from(format!("new_{course_id}.json")),
                source,
            })?;
        let bank = parsed.remove(course_id).ok_or_else(|| {
            ContentError::Invalid(format!("test bank has no entry for {course_id}"))
        })?;
        let course = self
            .courses
            .iter_mut()
            .find(|c| c.id == course_id)
            .ok_or_else(|| ContentError::Invalid(format!("unknown course {course_id}")))?;

        for (key, test) in bank.chapters {
            let chapter_id: i32 = key
                .strip_prefix("chapter")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| {
                    ContentError::Invalid(format!("{course_id}: bad chapter key {key:?}"))
                })?;
            let chapter = course
                .chapters
                .get_mut((chapter_id - 1).max(0) as usize)
                .filter(|c| c.id == chapter_id)
                .ok_or_else(|| {
                    ContentError::Invalid(format!("{course_id}: no chapter {chapter_id}"))
                })?;

            let mut questions = Vec::with_capacity(test.questions.len());
            for (i, q) in test.questions.into_iter().enumerate() {
                if q.options.is_empty() || !q.options.contains(&q.correct_option) {
                    return Err(ContentError::Invalid(format!(
                        "{course_id} chapter {chapter_id} question {}: correct option is not among the options",
                        i + 1
                    )));
                }
                questions.push(TestQuestion {
                    id: i as i32 + 1,
                    question: q.question,
                    options: q.options,
                    correct_option: q.correct_option,
                });
            }
            chapter.questions = questions;
        }
        Ok(())
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn course(&self, id: &str) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == id)
    }
}

fn read(path: &Path) -> Result<String, ContentError> {
    fs::read_to_string(path).map_err(|source| ContentError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn with_path(e: ContentError, path: &Path) -> ContentError {
    match e {
        ContentError::Json { source, .. } => ContentError::Json {
            path: path.to_path_buf(),
            source,
        },
        ContentError::Invalid(msg) => ContentError::Invalid(format!("{}: {msg}", path.display())),
        other => other,
    }
}
