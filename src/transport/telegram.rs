//! Telegram Bot API client
//!
//! Only the methods the bot needs: getMe, getUpdates, sendMessage and
//! answerCallbackQuery. Requests go out as JSON bodies. getUpdates is the
//! only call allowed the long request timeout; everything else uses
//! `send_timeout_secs`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AckMode, Control, Greeting, Transport, UpdateSource};
use crate::config::TelegramConfig;
use crate::error::TransportError;
use crate::redirect::Interaction;
use crate::store::Identity;

// ============================================
// WIRE TYPES
// ============================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotInfo {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_data: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackQuery<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

impl From<&Control> for InlineKeyboardMarkup {
    fn from(control: &Control) -> Self {
        let button = match control {
            Control::ExternalLink { text, url } => InlineKeyboardButton {
                text: text.clone(),
                url: Some(url.clone()),
                callback_data: None,
            },
            Control::Interactive { text, token } => InlineKeyboardButton {
                text: text.clone(),
                url: None,
                callback_data: Some(token.clone()),
            },
        };
        Self {
            inline_keyboard: vec![vec![button]],
        }
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Identity {
            user_id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }
}

// ============================================
// CLASSIFICATION
// ============================================

/// Argument text of a `/start` command, None for anything else.
///
/// `/start@name` only counts when `name` is this bot's username
/// (case-insensitive); with no known username every addressed form is
/// rejected.
pub fn parse_start_command<'a>(text: &'a str, bot_username: Option<&str>) -> Option<&'a str> {
    let rest = text.strip_prefix('/')?;
    let (command, args) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let (name, addressed_to) = match command.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (command, None),
    };
    if name != "start" {
        return None;
    }
    match (addressed_to, bot_username) {
        (None, _) => Some(args),
        (Some(target), Some(own)) if target.eq_ignore_ascii_case(own) => Some(args),
        (Some(_), _) => None,
    }
}

/// Map a raw update to an interaction; non-command messages are dropped
pub fn classify(update: &Update, bot_username: Option<&str>) -> Option<Interaction> {
    if let Some(query) = &update.callback_query {
        let chat_id = query
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(query.from.id);
        return Some(Interaction::ControlActivation {
            control_id: query.data.clone().unwrap_or_default(),
            activation_id: query.id.clone(),
            user: Identity::from(&query.from),
            chat_id,
        });
    }

    let message = update.message.as_ref()?;
    let from = message.from.as_ref()?;
    let argument = parse_start_command(message.text.as_deref()?, bot_username)?;
    Some(Interaction::EntryCommand {
        argument: argument.to_string(),
        user: Identity::from(from),
        chat_id: message.chat.id,
    })
}

// ============================================
// CLIENT
// ============================================

pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
    /// Only getUpdates may hold a request open this long
    poll_request_timeout: Duration,
    send_timeout: Duration,
    username: Option<String>,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Http(e.without_url()))?;
        Ok(Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_base.trim_end_matches('/'),
                config.token
            ),
            poll_timeout_secs: config.poll_timeout_secs,
            poll_request_timeout: Duration::from_secs(config.request_timeout_secs),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            username: None,
        })
    }

    /// Look up the bot's own username so addressed commands can be matched
    pub async fn identify(&mut self) -> Result<BotInfo, TransportError> {
        let me: BotInfo = self
            .call("getMe", &serde_json::json!({}), self.send_timeout)
            .await?;
        self.username = me.username.clone();
        Ok(me)
    }

    async fn call<B, T>(&self, method: &str, body: &B, timeout: Duration) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        // without_url(): the request URL carries the bot token
        let response: ApiResponse<T> = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.without_url()))?
            .json()
            .await
            .map_err(|e| TransportError::Http(e.without_url()))?;

        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(TransportError::Api {
                method: method.to_string(),
                description: description.unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }

    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TransportError> {
        let request_timeout = if timeout_secs == 0 {
            self.send_timeout
        } else {
            self.poll_request_timeout
        };
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: timeout_secs,
                allowed_updates: &["message", "callback_query"],
            },
            request_timeout,
        )
        .await
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn fetch(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        self.get_updates(offset, self.poll_timeout_secs).await
    }

    async fn confirm(&self, offset: i64) -> Result<(), TransportError> {
        // A zero-timeout poll with the new offset marks everything before it as delivered
        self.get_updates(offset, 0).await.map(|_| ())
    }

    fn bot_username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_greeting(&self, greeting: &Greeting) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &SendMessage {
                    chat_id: greeting.chat_id,
                    text: &greeting.text,
                    reply_markup: Some(InlineKeyboardMarkup::from(&greeting.control)),
                },
                self.send_timeout,
            )
            .await?;
        Ok(())
    }

    async fn acknowledge(&self, activation_id: &str, mode: &AckMode) -> Result<(), TransportError> {
        let (text, url) = match mode {
            AckMode::Silent => (None, None),
            AckMode::OpenUrl(url) => (None, Some(url.as_str())),
            AckMode::Toast(text) => (Some(text.as_str()), None),
        };
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &AnswerCallbackQuery {
                    callback_query_id: activation_id,
                    text,
                    url,
                },
                self.send_timeout,
            )
            .await?;
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &SendMessage {
                    chat_id,
                    text,
                    reply_markup: None,
                },
                self.send_timeout,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_command() {
        let me = Some("refgate_bot");
        assert_eq!(parse_start_command("/start", me), Some(""));
        assert_eq!(parse_start_command("/start promo1", me), Some(" promo1"));
        assert_eq!(parse_start_command("/start@refgate_bot kw_promo", me), Some(" kw_promo"));
        assert_eq!(parse_start_command("/start@RefGate_Bot kw_promo", me), Some(" kw_promo"));
        assert_eq!(parse_start_command("/help", me), None);
        assert_eq!(parse_start_command("/starter", me), None);
        assert_eq!(parse_start_command("start", me), None);
    }

    #[test]
    fn test_start_addressed_to_other_bot_is_ignored() {
        assert_eq!(parse_start_command("/start@other_bot kw", Some("refgate_bot")), None);
        assert_eq!(parse_start_command("/start@other_bot", Some("refgate_bot")), None);
        // unknown own username: only the bare form is accepted
        assert_eq!(parse_start_command("/start@refgate_bot kw", None), None);
        assert_eq!(parse_start_command("/start kw", None), Some(" kw"));
    }

    #[test]
    fn test_classify_entry_command() {
        let update: Update = serde_json::from_str(
            r#"{
                "update_id": 10,
                "message": {
                    "message_id": 1,
                    "from": {"id": 42, "is_bot": false, "first_name": "Ivan", "username": "ivan"},
                    "chat": {"id": 42, "type": "private"},
                    "text": "/start kw_promo"
                }
            }"#,
        )
        .unwrap();

        match classify(&update, Some("refgate_bot")) {
            Some(Interaction::EntryCommand {
                argument,
                user,
                chat_id,
            }) => {
                assert_eq!(argument.trim(), "kw_promo");
                assert_eq!(user.user_id, 42);
                assert_eq!(user.username.as_deref(), Some("ivan"));
                assert_eq!(chat_id, 42);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_callback_query() {
        let update: Update = serde_json::from_str(
            r#"{
                "update_id": 11,
                "callback_query": {
                    "id": "cbq-1",
                    "from": {"id": 9, "is_bot": false, "first_name": "Olga"},
                    "message": {"message_id": 5, "chat": {"id": -100, "type": "group"}},
                    "data": "open_main"
                }
            }"#,
        )
        .unwrap();

        match classify(&update, Some("refgate_bot")) {
            Some(Interaction::ControlActivation {
                control_id,
                activation_id,
                user,
                chat_id,
            }) => {
                assert_eq!(control_id, "open_main");
                assert_eq!(activation_id, "cbq-1");
                assert_eq!(user.user_id, 9);
                assert_eq!(chat_id, -100);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_ignores_plain_text() {
        let update: Update = serde_json::from_str(
            r#"{
                "update_id": 12,
                "message": {
                    "message_id": 2,
                    "from": {"id": 1, "is_bot": false, "first_name": "A"},
                    "chat": {"id": 1, "type": "private"},
                    "text": "hello"
                }
            }"#,
        )
        .unwrap();
        assert!(classify(&update, Some("refgate_bot")).is_none());
    }

    #[test]
    fn test_keyboard_serialization() {
        let link = InlineKeyboardMarkup::from(&Control::ExternalLink {
            text: "Go".into(),
            url: "https://t.me/main_bot".into(),
        });
        assert_eq!(
            serde_json::to_value(&link).unwrap(),
            serde_json::json!({"inline_keyboard": [[{"text": "Go", "url": "https://t.me/main_bot"}]]})
        );

        let callback = InlineKeyboardMarkup::from(&Control::Interactive {
            text: "Go".into(),
            token: "open_main".into(),
        });
        assert_eq!(
            serde_json::to_value(&callback).unwrap(),
            serde_json::json!({"inline_keyboard": [[{"text": "Go", "callback_data": "open_main"}]]})
        );
    }
}
