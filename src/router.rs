use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::RowLayout;
use crate::platform::IncomingMessage;
use crate::sheets::SheetSink;

pub const GREETING: &str = "Hello! I'm AbioAIBot 🤖. How can I assist you today?";
pub const HELP_TEXT: &str = "Use /recommend [category] to get AI product recommendations!";
pub const RECOMMEND_PROMPT: &str = "Please specify a category, e.g. /recommend image-tools";
pub const SAVE_PROMPT: &str =
    "Te rog să introduci un text pentru a-l salva, e.g. /save notițele mele";
pub const SAVE_FAILED: &str = "Nu am putut salva textul în Google Sheets.";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A recognized command. Arguments are already whitespace-normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    Recommend(String),
    Save(String),
}

impl Command {
    /// Parse `/name[@bot] args...`. Returns `None` for anything that is not
    /// one of our commands, including commands addressed to another bot.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let rest = text.strip_prefix('/')?;
        let (token, args) = match rest.find(char::is_whitespace) {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };

        let name = match token.split_once('@') {
            Some((name, mention)) => {
                if let Some(own) = bot_username {
                    if !mention.eq_ignore_ascii_case(own) {
                        return None;
                    }
                }
                name
            }
            None => token,
        };

        let args = args.split_whitespace().collect::<Vec<_>>().join(" ");
        match name {
            "start" => Some(Command::Start),
            "help" => Some(Command::Help),
            "recommend" => Some(Command::Recommend(args)),
            "save" => Some(Command::Save(args)),
            _ => None,
        }
    }
}

pub fn recommendations(query: &str) -> String {
    format!(
        "Here are some AI tools for {}:\n1. Tool AI 1\n2. Tool AI 2\n3. Tool AI 3",
        query
    )
}

pub fn save_confirmation(text: &str) -> String {
    format!("Textul '{}' a fost salvat în Google Sheets!", text)
}

/// Cells written for one saved message.
pub fn build_row(
    layout: RowLayout,
    msg: &IncomingMessage,
    text: &str,
    timestamp: &str,
) -> Vec<Value> {
    match layout {
        RowLayout::Text => vec![json!(text)],
        RowLayout::Name => vec![json!(msg.user_name), json!(text)],
        RowLayout::NameId => vec![json!(msg.user_name), json!(msg.user_id), json!(text)],
        RowLayout::Full => vec![
            json!(msg.user_name),
            json!(msg.user_id),
            json!(text),
            json!(timestamp),
        ],
    }
}

/// Maps each inbound message to exactly one reply, writing to the sheet
/// for `/save`.
pub struct Router {
    sink: Arc<dyn SheetSink>,
    row_layout: RowLayout,
    confirm_on_failure: bool,
    bot_username: Option<String>,
}

impl Router {
    pub fn new(sink: Arc<dyn SheetSink>, row_layout: RowLayout, confirm_on_failure: bool) -> Self {
        Self {
            sink,
            row_layout,
            confirm_on_failure,
            bot_username: None,
        }
    }

    /// Only accept `/cmd@name` mentions addressed to this username.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    pub async fn handle(&self, msg: &IncomingMessage) -> String {
        match Command::parse(&msg.text, self.bot_username.as_deref()) {
            Some(Command::Start) => GREETING.to_string(),
            Some(Command::Help) => HELP_TEXT.to_string(),
            Some(Command::Recommend(query)) => {
                if query.is_empty() {
                    RECOMMEND_PROMPT.to_string()
                } else {
                    recommendations(&query)
                }
            }
            Some(Command::Save(text)) => {
                if text.is_empty() {
                    return SAVE_PROMPT.to_string();
                }
                self.save(msg, &text).await
            }
            None => msg.text.clone(),
        }
    }

    async fn save(&self, msg: &IncomingMessage, text: &str) -> String {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let row = build_row(self.row_layout, msg, text, &timestamp);

        match self.sink.append_row(&row).await {
            Ok(()) => {
                info!(
                    "Saved text from {} ({}) in chat {}",
                    msg.user_name, msg.user_id, msg.chat_id
                );
                save_confirmation(text)
            }
            Err(e) => {
                error!(
                    "Failed to append row for {} ({}): {:#}",
                    msg.user_name, msg.user_id, e
                );
                if self.confirm_on_failure {
                    save_confirmation(text)
                } else {
                    SAVE_FAILED.to_string()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        rows: Mutex<Vec<Vec<Value>>>,
    }

    #[async_trait]
    impl SheetSink for RecordingSink {
        async fn append_row(&self, row: &[Value]) -> Result<()> {
            self.rows.lock().await.push(row.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailingSink {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SheetSink for FailingSink {
        async fn append_row(&self, _row: &[Value]) -> Result<()> {
            *self.calls.lock().await += 1;
            anyhow::bail!("The caller does not have permission")
        }
    }

    fn message(text: &str) -> IncomingMessage {
        IncomingMessage {
            user_id: 42,
            chat_id: 1001,
            user_name: "Ana".to_string(),
            text: text.to_string(),
        }
    }

    fn router(sink: Arc<dyn SheetSink>) -> Router {
        Router::new(sink, RowLayout::Full, true)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start", None), Some(Command::Start));
        assert_eq!(Command::parse("/help extra", None), Some(Command::Help));
        assert_eq!(
            Command::parse("/recommend  image   tools ", None),
            Some(Command::Recommend("image tools".to_string()))
        );
        assert_eq!(
            Command::parse("/save\thello\nworld", None),
            Some(Command::Save("hello world".to_string()))
        );
        assert_eq!(Command::parse("/save", None), Some(Command::Save(String::new())));
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!(Command::parse("/Start", None), None);
        assert_eq!(Command::parse("/SAVE x", None), None);
    }

    #[test]
    fn test_parse_rejects_non_commands() {
        assert_eq!(Command::parse("start", None), None);
        assert_eq!(Command::parse(" /start", None), None);
        assert_eq!(Command::parse("/startnow", None), None);
        assert_eq!(Command::parse("/unknown arg", None), None);
        assert_eq!(Command::parse("/", None), None);
    }

    #[test]
    fn test_parse_bot_mention() {
        assert_eq!(
            Command::parse("/start@AbioAIBot", Some("abioaibot")),
            Some(Command::Start)
        );
        assert_eq!(Command::parse("/start@OtherBot", Some("AbioAIBot")), None);
        assert_eq!(
            Command::parse("/recommend@AnyBot chatbots", None),
            Some(Command::Recommend("chatbots".to_string()))
        );
    }

    #[tokio::test]
    async fn test_start_and_help() {
        let router = router(Arc::new(RecordingSink::default()));
        assert_eq!(router.handle(&message("/start")).await, GREETING);
        assert_eq!(router.handle(&message("/help")).await, HELP_TEXT);
    }

    #[tokio::test]
    async fn test_recommend_listing() {
        let router = router(Arc::new(RecordingSink::default()));
        let reply = router.handle(&message("/recommend chatbots")).await;
        assert_eq!(
            reply,
            "Here are some AI tools for chatbots:\n1. Tool AI 1\n2. Tool AI 2\n3. Tool AI 3"
        );
    }

    #[tokio::test]
    async fn test_recommend_contains_query_and_three_lines() {
        let router = router(Arc::new(RecordingSink::default()));
        for query in ["image-tools", "voice cloning", "ăîșț 🤖"] {
            let reply = router.handle(&message(&format!("/recommend {}", query))).await;
            assert!(reply.contains(query));
            let numbered = reply
                .lines()
                .filter(|l| l.starts_with(|c: char| c.is_ascii_digit()))
                .count();
            assert_eq!(numbered, 3);
        }
    }

    #[tokio::test]
    async fn test_recommend_without_category() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());
        assert_eq!(router.handle(&message("/recommend")).await, RECOMMEND_PROMPT);
        assert_eq!(router.handle(&message("/recommend    ")).await, RECOMMEND_PROMPT);
        assert!(sink.rows.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_appends_full_row() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());

        let reply = router.handle(&message("/save hello world")).await;
        assert_eq!(reply, "Textul 'hello world' a fost salvat în Google Sheets!");

        let rows = sink.rows.lock().await;
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.len(), 4);
        assert_eq!(row[0], json!("Ana"));
        assert_eq!(row[1], json!(42));
        assert_eq!(row[2], json!("hello world"));
        let ts = row[3].as_str().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).is_ok());
    }

    #[tokio::test]
    async fn test_save_without_text() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone());
        assert_eq!(router.handle(&message("/save")).await, SAVE_PROMPT);
        assert_eq!(router.handle(&message("/save  \t ")).await, SAVE_PROMPT);
        assert!(sink.rows.lock().await.is_empty());
    }

    // The confirmation does not depend on the append outcome unless
    // `confirm_on_failure` is turned off.
    #[tokio::test]
    async fn test_save_confirms_even_when_append_fails() {
        let sink = Arc::new(FailingSink::default());
        let router = router(sink.clone());

        let reply = router.handle(&message("/save hello world")).await;
        assert_eq!(reply, save_confirmation("hello world"));
        assert_eq!(*sink.calls.lock().await, 1);
    }

    #[tokio::test]
    async fn test_save_reports_failure_when_configured() {
        let sink = Arc::new(FailingSink::default());
        let router = Router::new(sink.clone(), RowLayout::Full, false);

        let reply = router.handle(&message("/save hello world")).await;
        assert_eq!(reply, SAVE_FAILED);
        assert_eq!(*sink.calls.lock().await, 1);
    }

    #[tokio::test]
    async fn test_echo_is_verbatim() {
        let router = router(Arc::new(RecordingSink::default()));
        for text in ["hello", "  spaced  out  ", "line1\nline2", "/unknown cmd", "emoji 🤖"] {
            assert_eq!(router.handle(&message(text)).await, text);
        }
    }

    #[tokio::test]
    async fn test_command_for_other_bot_is_echoed() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone()).with_bot_username("AbioAIBot");
        let text = "/save@OtherBot secret";
        assert_eq!(router.handle(&message(text)).await, text);
        assert!(sink.rows.lock().await.is_empty());
    }

    #[test]
    fn test_row_layouts() {
        let msg = message("/save x");
        let ts = "2026-01-01 10:00:00";
        assert_eq!(build_row(RowLayout::Text, &msg, "x", ts), vec![json!("x")]);
        assert_eq!(
            build_row(RowLayout::Name, &msg, "x", ts),
            vec![json!("Ana"), json!("x")]
        );
        assert_eq!(
            build_row(RowLayout::NameId, &msg, "x", ts),
            vec![json!("Ana"), json!(42), json!("x")]
        );
        assert_eq!(
            build_row(RowLayout::Full, &msg, "x", ts),
            vec![json!("Ana"), json!(42), json!("x"), json!(ts)]
        );
    }
}
