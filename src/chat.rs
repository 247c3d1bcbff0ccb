//! Course-aware chat assistant.
//!
//! Small talk is answered locally from canned replies. Anything else is routed
//! to a course (and maybe a chapter) and forwarded to an OpenAI-compatible
//! completion endpoint with the matching context.

use std::{sync::Arc, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::Catalog;

pub const DEFAULT_API_BASE: &str = "https://api.together.xyz/v1";
pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct-Turbo";

const GREETING_REPLIES: [&str; 5] = [
    "Hello! How can I assist you with your learning today?",
    "Hi there! What would you like to know about the course material?",
    "Hey! I’m here to help with your studies. What’s on your mind?",
    "Greetings! Ready to dive into some course content?",
    "Hello! What part of the material can I help you with?",
];

const FAREWELL_REPLIES: [&str; 5] = [
    "Goodbye! Keep up the great work with your studies!",
    "See you later! Feel free to come back with more questions.",
    "Bye! Happy learning!",
    "Farewell! Practice makes perfect, so keep at it!",
    "See you soon! Don’t hesitate to ask if you need more help.",
];

const THANKS_REPLIES: [&str; 5] = [
    "You’re welcome! Anything else I can help with?",
    "My pleasure! What’s your next question?",
    "No problem! I’m here to assist whenever you need me.",
    "Glad to help! What else can I explain?",
    "You’re welcome! Keep the questions coming if you’d like.",
];

const FALLBACK_REPLIES: [&str; 5] = [
    "I’m not sure I understood that. Could you ask about a specific topic from the course?",
    "Hmm, I might need more details. What part of the material are you curious about?",
    "I don’t have an answer for that yet. Try asking about a concept from the chapter.",
    "Let’s focus on the course content. Any particular topic you’d like me to explain?",
    "I’m here to help with the course material. What would you like to discuss?",
];

pub const HELP_REPLY: &str = "I can explain topics from the course material, answer questions \
     about specific chapters, or clarify anything you’re unsure about. What do you need help with?";

// evaluation order decides which category wins
static GREETING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:hi|hello|hey|greetings|what's up)\b").expect("valid regex"));
static FAREWELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:bye|goodbye|see you|see ya|farewell)\b").expect("valid regex"));
static THANKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:thank you|thanks|appreciate it|thank)\b").expect("valid regex"));
static HELP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:help|assist)").expect("valid regex"));
static CHAPTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"chapter (\d+)").expect("valid regex"));

/// Keyword lists per course, in tie-breaking order.
const COURSE_KEYWORDS: [(&str, &[&str]); 3] = [
    (
        "python",
        &[
            "python",
            "programming",
            "variable",
            "loop",
            "function",
            "data type",
            "list",
            "dictionary",
        ],
    ),
    (
        "data_analytics",
        &[
            "data",
            "analytics",
            "analysis",
            "visualization",
            "statistics",
            "lifecycle",
        ],
    ),
    (
        "full_stack",
        &[
            "web",
            "frontend",
            "backend",
            "html",
            "css",
            "javascript",
            "full stack",
            "http",
        ],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Farewell,
    Thanks,
    Help,
}

impl Intent {
    /// Canned category for lowercased input, first match wins.
    pub fn classify(text: &str) -> Option<Intent> {
        [
            (&*GREETING, Intent::Greeting),
            (&*FAREWELL, Intent::Farewell),
            (&*THANKS, Intent::Thanks),
            (&*HELP, Intent::Help),
        ]
        .into_iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, intent)| intent)
    }

    fn reply(self) -> String {
        let pool: &[&str] = match self {
            Intent::Greeting => &GREETING_REPLIES,
            Intent::Farewell => &FAREWELL_REPLIES,
            Intent::Thanks => &THANKS_REPLIES,
            Intent::Help => return HELP_REPLY.to_string(),
        };
        pick(pool)
    }
}

fn pick(pool: &[&str]) -> String {
    pool.choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_default()
        .to_string()
}

/// Course with the most keyword hits; the earliest course wins a tie.
pub fn identify_course(text: &str) -> Option<&'static str> {
    let mut best: Option<(&'static str, usize)> = None;
    for (course, keywords) in COURSE_KEYWORDS {
        let hits = keywords.iter().filter(|k| text.contains(*k)).count();
        if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
            best = Some((course, hits));
        }
    }
    best.map(|(course, _)| course)
}

pub fn identify_chapter(text: &str) -> Option<i32> {
    CHAPTER
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat service is not configured")]
    NotConfigured,
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("chat service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("chat service returned no choices")]
    EmptyResponse,
}

/// A single-prompt text completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct RemoteCompletion {
    http: reqwest::Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
}

impl RemoteCompletion {
    pub fn new(
        api_base: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionClient for RemoteCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        let key = self.api_key.as_deref().ok_or(ChatError::NotConfigured)?;
        let body = CompletionRequest {
            model: &self.model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Status { status, body });
        }
        let parsed: CompletionResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ChatError::EmptyResponse)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub response: String,
    pub course_name: Option<String>,
    pub chapter_id: Option<i32>,
}

pub struct Chatbot {
    catalog: Arc<Catalog>,
    client: Arc<dyn CompletionClient>,
}

impl Chatbot {
    pub fn new(catalog: Arc<Catalog>, client: Arc<dyn CompletionClient>) -> Self {
        Self { catalog, client }
    }

    /// Answer `message`. Explicit course and chapter context wins over what
    /// the text mentions. Service failures come back as reply text.
    pub async fn respond(
        &self,
        message: &str,
        course: Option<&str>,
        chapter: Option<i32>,
    ) -> ChatReply {
        let text = message.trim().to_lowercase();

        if let Some(intent) = Intent::classify(&text) {
            debug!(?intent, "canned chat reply");
            return ChatReply {
                response: intent.reply(),
                course_name: course.map(str::to_string),
                chapter_id: chapter,
            };
        }

        let course_name = course
            .map(str::to_string)
            .or_else(|| identify_course(&text).map(str::to_string));
        let chapter_id = chapter.or_else(|| identify_chapter(&text));
        let reply = |response: String| ChatReply {
            response,
            course_name: course_name.clone(),
            chapter_id,
        };

        let Some(name) = course_name.as_deref() else {
            return reply(pick(&FALLBACK_REPLIES));
        };
        let Some(c) = self.catalog.course(name) else {
            let known = self
                .catalog
                .courses()
                .iter()
                .map(|c| format!("'{}'", c.id))
                .collect::<Vec<_>>()
                .join(", ");
            return reply(format!(
                "I don’t have information on {name} yet. I can help with {known}. \
                 What would you like to explore?"
            ));
        };

        let prompt = match chapter_id {
            Some(n) => match c.chapter(n) {
                Some(ch) => format!(
                    "Please explain '{text}' in the context of {name} Chapter {n}.\n\n\
                     Chapter title: {}\n\n{}",
                    ch.title, ch.content
                ),
                None => {
                    return reply(format!(
                        "I couldn’t find Chapter {n} in {name}. Try asking about a chapter \
                         that exists, like Chapter 1!"
                    ))
                }
            },
            None => format!(
                "Please explain the {name} course and its chapters, focusing on {text}."
            ),
        };

        debug!(course = name, chapter = ?chapter_id, "forwarding chat prompt");
        let response = match self.client.complete(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "chat completion failed");
                format!("Error fetching response: {e}")
            }
        };
        reply(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        prompts: Mutex<Vec<String>>,
        answer: Result<&'static str, ()>,
    }

    impl Recorder {
        fn answering(answer: &'static str) -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(vec![]),
                answer: Ok(answer),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(vec![]),
                answer: Err(()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for Recorder {
        async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answer
                .map(str::to_string)
                .map_err(|_| ChatError::NotConfigured)
        }
    }

    fn catalog() -> Arc<Catalog> {
        let raw = r#"{
            "python": {"title": "Python", "description": "d", "chapters": [
                {"id": 1, "title": "Basics", "content": "Variables and types", "test": "t1"},
                {"id": 2, "title": "Loops", "content": "for and while", "test": "t2"}
            ]},
            "full_stack": {"title": "Full Stack", "description": "d", "chapters": [
                {"id": 1, "title": "HTML", "content": "markup", "test": "t1"}
            ]}
        }"#;
        Arc::new(Catalog::from_json(raw).unwrap())
    }

    #[test]
    fn canned_categories_in_order() {
        assert_eq!(Intent::classify("hello there"), Some(Intent::Greeting));
        assert_eq!(Intent::classify("ok bye"), Some(Intent::Farewell));
        assert_eq!(Intent::classify("thanks a lot"), Some(Intent::Thanks));
        assert_eq!(Intent::classify("can you help me"), Some(Intent::Help));
        // greeting is checked before thanks
        assert_eq!(Intent::classify("hi, thanks"), Some(Intent::Greeting));
    }

    #[test]
    fn canned_categories_need_whole_words() {
        assert_eq!(Intent::classify("which loop should i use"), None);
        assert_eq!(Intent::classify("what is a python list"), None);
    }

    #[test]
    fn course_detection_counts_keywords() {
        assert_eq!(identify_course("explain html and css"), Some("full_stack"));
        assert_eq!(identify_course("statistics for data analysis"), Some("data_analytics"));
        assert_eq!(identify_course("nothing relevant"), None);
        // one hit each ("data type" vs "data"), python is listed first
        assert_eq!(identify_course("what is a data type"), Some("python"));
    }

    #[test]
    fn course_detection_ties_go_to_earlier_course() {
        // one hit each for python ("loop") and full_stack ("web")
        assert_eq!(identify_course("loop web"), Some("python"));
    }

    #[test]
    fn chapter_pattern() {
        assert_eq!(identify_chapter("what is in chapter 12?"), Some(12));
        assert_eq!(identify_chapter("chapter one"), None);
        assert_eq!(identify_chapter("chapter 99999999999"), None);
    }

    #[tokio::test]
    async fn greeting_does_not_call_service() {
        let client = Recorder::answering("unused");
        let bot = Chatbot::new(catalog(), client.clone());
        let reply = bot.respond("Hello!", None, None).await;
        assert!(GREETING_REPLIES.contains(&reply.response.as_str()));
        assert!(client.prompts().is_empty());
    }

    #[tokio::test]
    async fn unknown_topic_falls_back() {
        let client = Recorder::answering("unused");
        let bot = Chatbot::new(catalog(), client.clone());
        let reply = bot.respond("tell me a joke", None, None).await;
        assert!(FALLBACK_REPLIES.contains(&reply.response.as_str()));
        assert!(client.prompts().is_empty());
    }

    #[tokio::test]
    async fn chapter_question_carries_context() {
        let client = Recorder::answering("  a loop repeats  ");
        let bot = Chatbot::new(catalog(), client.clone());
        let reply = bot.respond("What does chapter 2 cover?", Some("python"), None).await;
        assert_eq!(reply.response, "  a loop repeats  ");
        assert_eq!(reply.chapter_id, Some(2));
        let prompts = client.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0]
            .starts_with("Please explain 'what does chapter 2 cover?' in the context of python Chapter 2."));
        assert!(prompts[0].contains("Loops"));
        assert!(prompts[0].contains("for and while"));
    }

    #[tokio::test]
    async fn course_question_without_chapter() {
        let client = Recorder::answering("overview");
        let bot = Chatbot::new(catalog(), client.clone());
        let reply = bot.respond("what is javascript used for", None, None).await;
        assert_eq!(reply.response, "overview");
        assert_eq!(reply.course_name.as_deref(), Some("full_stack"));
        assert_eq!(
            client.prompts()[0],
            "Please explain the full_stack course and its chapters, focusing on what is javascript used for."
        );
    }

    #[tokio::test]
    async fn explicit_context_wins() {
        let client = Recorder::answering("ok");
        let bot = Chatbot::new(catalog(), client.clone());
        bot.respond("html in chapter 2", Some("python"), Some(1)).await;
        assert!(client.prompts()[0].contains("in the context of python Chapter 1."));
    }

    #[tokio::test]
    async fn missing_chapter_and_course_are_explained() {
        let client = Recorder::answering("unused");
        let bot = Chatbot::new(catalog(), client.clone());

        let reply = bot.respond("explain chapter 7", Some("python"), None).await;
        assert!(reply.response.starts_with("I couldn’t find Chapter 7 in python."));

        // detected from keywords but absent from the catalog
        let reply = bot.respond("data visualization", None, None).await;
        assert!(reply
            .response
            .starts_with("I don’t have information on data_analytics yet."));
        assert!(client.prompts().is_empty());
    }

    #[tokio::test]
    async fn service_errors_become_text() {
        let bot = Chatbot::new(catalog(), Recorder::failing());
        let reply = bot.respond("python functions", None, None).await;
        assert_eq!(
            reply.response,
            "Error fetching response: chat service is not configured"
        );
    }
}
