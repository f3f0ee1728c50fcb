//! Outbound transport contract and the Telegram Bot API implementation
//!
//! The redirect machine only talks to `Transport`; the long-polling loop in
//! `poller` feeds it classified interactions.

mod poller;
mod telegram;

pub use poller::run_polling;
pub use telegram::{classify, parse_start_command, BotInfo, TelegramClient, Update};

use async_trait::async_trait;

use crate::error::TransportError;

/// Actionable element attached to the greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Leaves the service; no signal comes back when it is used
    ExternalLink { text: String, url: String },
    /// Reports back with `token` when pressed
    Interactive { text: String, token: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub chat_id: i64,
    pub text: String,
    pub control: Control,
}

/// How an activation is answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckMode {
    Silent,
    OpenUrl(String),
    Toast(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_greeting(&self, greeting: &Greeting) -> Result<(), TransportError>;

    /// Must be called exactly once per activation, promptly
    async fn acknowledge(&self, activation_id: &str, mode: &AckMode) -> Result<(), TransportError>;

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError>;
}

/// Inbound side: where the poller gets updates from
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Long-poll for updates with id >= `offset`
    async fn fetch(&self, offset: i64) -> Result<Vec<Update>, TransportError>;

    /// Tell the platform everything before `offset` has been handled
    async fn confirm(&self, offset: i64) -> Result<(), TransportError>;

    /// Own username, used to accept `/start@username`
    fn bot_username(&self) -> Option<&str>;
}
