//! Diagnostic assessment: quiz generation from the course banks, scoring
//! against the stored answer key, and the score-to-chapter recommendation.

use std::collections::HashSet;

use rand::{seq::index, seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    bank::{AssessmentBanks, BankRecord, QuestionBank},
    models::{answer_key_id, Answers},
};

pub const QUESTIONS_PER_COURSE: usize = 5;
pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Error, Debug, PartialEq)]
pub enum AssessmentError {
    #[error("bank for {course} cannot supply {OPTIONS_PER_QUESTION} distinct options")]
    NotEnoughOptions { course: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStyle {
    /// "What is X?"
    Descriptive,
    /// "Which of the following best describes the use of X?"
    Application,
    /// "What is the main difference between X and Y?"
    Analytical,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssessmentQuestion {
    pub id: i32,
    pub prompt: String,
    pub options: Vec<String>,
    pub answer: String,
    pub course: String,
}

/// A generated quiz together with its answer key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Quiz {
    pub questions: Vec<AssessmentQuestion>,
}

/// Question as shown to the learner: no answer key.
#[derive(Serialize, Debug, Clone)]
pub struct QuestionView<'a> {
    pub id: i32,
    pub prompt: &'a str,
    pub options: &'a [String],
    pub course: &'a str,
}

impl Quiz {
    pub fn view(&self) -> Vec<QuestionView<'_>> {
        self.questions
            .iter()
            .map(|q| QuestionView {
                id: q.id,
                prompt: &q.prompt,
                options: &q.options,
                course: &q.course,
            })
            .collect()
    }

    pub fn question(&self, id: i32) -> Option<&AssessmentQuestion> {
        self.questions.iter().find(|q| q.id == id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CourseScore {
    pub course: String,
    pub correct: usize,
    pub total: usize,
    pub percentage: f64,
    pub recommended_chapter: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssessmentOutcome {
    pub recommended_course: String,
    pub scores: Vec<CourseScore>,
}

#[cfg(test)]
impl AssessmentOutcome {
    fn score(&self, course: &str) -> Option<&CourseScore> {
        self.scores.iter().find(|s| s.course == course)
    }
}

/// Build a diagnostic quiz: up to five questions per bank, shuffled together,
/// then numbered 1.. in the shuffled order.
pub fn generate_quiz<R: Rng + ?Sized>(
    banks: &AssessmentBanks,
    rng: &mut R,
) -> Result<Quiz, AssessmentError> {
    let mut questions = Vec::new();
    for bank in &banks.banks {
        questions.extend(generate_course_questions(bank, rng)?);
    }
    questions.shuffle(rng);
    for (i, q) in questions.iter_mut().enumerate() {
        q.id = i as i32 + 1;
    }
    Ok(Quiz { questions })
}

/// Questions for one bank, ids left at 0 until the quiz is assembled.
pub fn generate_course_questions<R: Rng + ?Sized>(
    bank: &QuestionBank,
    rng: &mut R,
) -> Result<Vec<AssessmentQuestion>, AssessmentError> {
    let records = &bank.records;
    let amount = QUESTIONS_PER_COURSE.min(records.len());
    let mut out = Vec::with_capacity(amount);

    for idx in index::sample(rng, records.len(), amount) {
        let item = &records[idx];
        let question = match bank.style {
            QuestionStyle::Analytical => match analytical(bank, item, rng)? {
                Some(q) => q,
                None => descriptive(bank, item, &format!("What is {}?", item.concept), rng)?,
            },
            QuestionStyle::Application => descriptive(
                bank,
                item,
                &format!(
                    "Which of the following best describes the use of {}?",
                    item.concept
                ),
                rng,
            )?,
            QuestionStyle::Descriptive => {
                descriptive(bank, item, &format!("What is {}?", item.concept), rng)?
            }
        };
        out.push(question);
    }
    Ok(out)
}

fn descriptive<R: Rng + ?Sized>(
    bank: &QuestionBank,
    item: &BankRecord,
    prompt: &str,
    rng: &mut R,
) -> Result<AssessmentQuestion, AssessmentError> {
    let answer = item.description.clone();
    let options = pad_options(
        bank,
        vec![answer.clone()],
        |r| r.description.clone(),
        rng,
    )?;
    Ok(AssessmentQuestion {
        id: 0,
        prompt: prompt.to_string(),
        options,
        answer,
        course: bank.course.clone(),
    })
}

/// Comparison question, or `None` when no record with a different concept exists.
fn analytical<R: Rng + ?Sized>(
    bank: &QuestionBank,
    item: &BankRecord,
    rng: &mut R,
) -> Result<Option<AssessmentQuestion>, AssessmentError> {
    let others: Vec<&BankRecord> = bank
        .records
        .iter()
        .filter(|r| r.concept != item.concept)
        .collect();
    let Some(&other) = others.choose(rng) else {
        return Ok(None);
    };

    let statement = |r: &BankRecord| format!("{} is {}", r.concept, r.description);
    let answer = statement(item);
    let seed = vec![answer.clone(), statement(other)];
    let options = pad_options(bank, seed, statement, rng)?;
    Ok(Some(AssessmentQuestion {
        id: 0,
        prompt: format!(
            "What is the main difference between {} and {}?",
            item.concept, other.concept
        ),
        options,
        answer,
        course: bank.course.clone(),
    }))
}

/// Fill `options` up to four unique strings drawn from the rest of the bank,
/// then shuffle. Draws are without replacement, so this always terminates.
fn pad_options<R, F>(
    bank: &QuestionBank,
    mut options: Vec<String>,
    render: F,
    rng: &mut R,
) -> Result<Vec<String>, AssessmentError>
where
    R: Rng + ?Sized,
    F: Fn(&BankRecord) -> String,
{
    let mut seen: HashSet<String> = options.iter().cloned().collect();
    let mut pool = Vec::new();
    for r in &bank.records {
        let text = render(r);
        if seen.insert(text.clone()) {
            pool.push(text);
        }
    }
    let missing = OPTIONS_PER_QUESTION.saturating_sub(options.len());
    if pool.len() < missing {
        return Err(AssessmentError::NotEnoughOptions {
            course: bank.course.clone(),
        });
    }
    options.extend(pool.choose_multiple(rng, missing).cloned());
    options.shuffle(rng);
    Ok(options)
}

/// Score answers against the stored quiz. Unknown question ids and answers
/// that do not name an option count as incorrect.
pub fn score_quiz(quiz: &Quiz, answers: &Answers, courses: &[&str]) -> AssessmentOutcome {
    let mut scores: Vec<CourseScore> = courses
        .iter()
        .map(|c| CourseScore {
            course: c.to_string(),
            correct: 0,
            total: quiz.questions.iter().filter(|q| q.course == *c).count(),
            percentage: 0.0,
            recommended_chapter: 1,
        })
        .collect();

    for (key, submitted) in answers {
        let Some(question) = answer_key_id(key).and_then(|id| quiz.question(id)) else {
            continue;
        };
        let selected = submitted
            .option_index()
            .and_then(|i| question.options.get(i));
        if selected == Some(&question.answer) {
            if let Some(s) = scores.iter_mut().find(|s| s.course == question.course) {
                s.correct += 1;
            }
        }
    }

    for s in &mut scores {
        s.percentage = if s.total > 0 {
            s.correct as f64 / s.total as f64 * 100.0
        } else {
            0.0
        };
        s.recommended_chapter = recommend_chapter(s.percentage);
    }

    // first course holding the top percentage wins ties
    let mut best: Option<&CourseScore> = None;
    for s in &scores {
        if best.map_or(true, |b| s.percentage > b.percentage) {
            best = Some(s);
        }
    }
    let recommended_course = best.map(|s| s.course.clone()).unwrap_or_default();

    AssessmentOutcome {
        recommended_course,
        scores,
    }
}

/// Starting chapter for a diagnostic percentage.
pub fn recommend_chapter(percentage: f64) -> i32 {
    if percentage <= 30.0 {
        1
    } else if percentage <= 60.0 {
        3
    } else if percentage <= 80.0 {
        5
    } else {
        7
    }
}
