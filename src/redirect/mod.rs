//! Redirect state machine
//!
//! Per interaction: `AwaitingEntry` -> `Greeted` on an entry command,
//! -> `Redirected` on activation of the greeting's control. Nothing is
//! persisted about the state itself; the event log is the only record.
//!
//! Storage steps are best-effort: a failed upsert or append is logged and
//! the user still gets the greeting or redirect. Transport steps are
//! attempted once and logged on failure.

mod debounce;

pub use debounce::Debouncer;

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{Config, RedirectConfig, RedirectMode};
use crate::error::{BestEffort, TransportError};
use crate::keyword::KeywordPolicy;
use crate::resolver::AttributionResolver;
use crate::store::{EventId, EventLog, EventType, Identity, IdentityStore, Store, StoreResult};
use crate::transport::{AckMode, Control, Greeting, Transport};

/// Upper bound on answering an activation before it counts as failed
const ACK_DEADLINE: Duration = Duration::from_secs(10);

/// Run a transport call, failing it once `deadline` passes
async fn within<F>(deadline: Duration, call: F) -> Result<(), TransportError>
where
    F: std::future::Future<Output = Result<(), TransportError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(deadline)),
    }
}

/// Inbound interaction, already classified by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    EntryCommand {
        argument: String,
        user: Identity,
        chat_id: i64,
    },
    ControlActivation {
        control_id: String,
        activation_id: String,
        user: Identity,
        chat_id: i64,
    },
}

impl Interaction {
    pub fn user_id(&self) -> i64 {
        match self {
            Interaction::EntryCommand { user, .. } | Interaction::ControlActivation { user, .. } => {
                user.user_id
            }
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            Interaction::EntryCommand { chat_id, .. }
            | Interaction::ControlActivation { chat_id, .. } => *chat_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Interaction::EntryCommand { .. } => "entry",
            Interaction::ControlActivation { .. } => "activation",
        }
    }
}

/// Which redirect was performed for an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectAction {
    /// The acknowledgement itself opened the destination
    OpenUrl,
    /// A follow-up message carrying the link was sent
    FollowUpMessage,
}

/// What one interaction did, for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Greeted {
        keyword: String,
        start_event: Option<EventId>,
        greeting_sent: bool,
    },
    Redirected {
        keyword: String,
        click_event: Option<EventId>,
        debounced: bool,
        acknowledged: bool,
        action: RedirectAction,
        delivered: bool,
    },
    /// Activation of a control this deployment never issued
    Ignored { acknowledged: bool },
}

/// Everything the machine talks to, built once at startup
#[derive(Clone)]
pub struct Deps {
    pub identities: Arc<dyn IdentityStore>,
    pub events: Arc<dyn EventLog>,
    pub transport: Arc<dyn Transport>,
}

impl Deps {
    pub fn new(store: Store, transport: Arc<dyn Transport>) -> Self {
        let store = Arc::new(store);
        Self {
            identities: store.clone(),
            events: store,
            transport,
        }
    }
}

pub struct RedirectMachine {
    identities: Arc<dyn IdentityStore>,
    events: Arc<dyn EventLog>,
    resolver: AttributionResolver,
    transport: Arc<dyn Transport>,
    redirect: RedirectConfig,
    keywords: KeywordPolicy,
    debounce: Option<Debouncer>,
    ack_deadline: Duration,
    send_deadline: Duration,
}

/// Run a storage call on the blocking pool
async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

impl RedirectMachine {
    pub fn new(deps: Deps, config: &Config) -> Self {
        let debounce = match config.attribution.debounce_ms {
            0 => None,
            ms => Some(Debouncer::new(Duration::from_millis(ms))),
        };
        Self {
            resolver: AttributionResolver::new(deps.events.clone()),
            identities: deps.identities,
            events: deps.events,
            transport: deps.transport,
            redirect: config.redirect.clone(),
            keywords: KeywordPolicy::from_config(&config.attribution.allow_list),
            debounce,
            ack_deadline: ACK_DEADLINE,
            send_deadline: Duration::from_secs(config.telegram.send_timeout_secs),
        }
    }

    /// Override how long acknowledgements and outbound messages may take
    pub fn with_deadlines(mut self, ack: Duration, send: Duration) -> Self {
        self.ack_deadline = ack;
        self.send_deadline = send;
        self
    }

    pub async fn handle(&self, interaction: Interaction) -> Outcome {
        let span = tracing::info_span!(
            "interaction",
            id = %Uuid::new_v4(),
            kind = interaction.kind(),
            user_id = interaction.user_id(),
            chat_id = interaction.chat_id(),
        );

        async move {
            match interaction {
                Interaction::EntryCommand {
                    argument,
                    user,
                    chat_id,
                } => self.on_entry(&argument, user, chat_id).await,
                Interaction::ControlActivation {
                    control_id,
                    activation_id,
                    user,
                    chat_id,
                } => {
                    self.on_activation(&control_id, &activation_id, user, chat_id)
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    fn greeting_control(&self) -> Control {
        match self.redirect.mode {
            RedirectMode::Link => Control::ExternalLink {
                text: self.redirect.button_text.clone(),
                url: self.redirect.destination_url.clone(),
            },
            RedirectMode::OpenUrl | RedirectMode::FollowUp => Control::Interactive {
                text: self.redirect.button_text.clone(),
                token: self.redirect.control_token.clone(),
            },
        }
    }

    async fn touch_identity(&self, user: Identity) {
        let identities = self.identities.clone();
        let now = Utc::now();
        blocking(move || identities.upsert(&user, now))
            .await
            .best_effort("identity_upsert");
    }

    async fn append_event(
        &self,
        event_type: EventType,
        keyword: &str,
        user_id: i64,
        chat_id: i64,
    ) -> Option<EventId> {
        let events = self.events.clone();
        let keyword = keyword.to_string();
        let now = Utc::now();
        let step = match event_type {
            EventType::Start => "start_append",
            EventType::Click => "click_append",
        };
        blocking(move || events.append(event_type, &keyword, user_id, chat_id, now))
            .await
            .best_effort(step)
    }

    /// Entry command: capture keyword, record start, greet
    async fn on_entry(&self, argument: &str, user: Identity, chat_id: i64) -> Outcome {
        let keyword = self.keywords.apply(argument);
        let user_id = user.user_id;

        self.touch_identity(user).await;
        let start_event = self
            .append_event(EventType::Start, &keyword, user_id, chat_id)
            .await;

        let greeting = Greeting {
            chat_id,
            text: self.redirect.greeting_text.clone(),
            control: self.greeting_control(),
        };
        let greeting_sent = within(self.send_deadline, self.transport.send_greeting(&greeting))
            .await
            .best_effort("send_greeting")
            .is_some();

        tracing::info!(%keyword, ?start_event, greeting_sent, "greeted");
        Outcome::Greeted {
            keyword,
            start_event,
            greeting_sent,
        }
    }

    async fn acknowledge(&self, activation_id: &str, mode: &AckMode) -> bool {
        within(self.ack_deadline, self.transport.acknowledge(activation_id, mode))
            .await
            .best_effort("acknowledge")
            .is_some()
    }

    /// Control activation: resolve attribution, record click, redirect
    async fn on_activation(
        &self,
        control_id: &str,
        activation_id: &str,
        user: Identity,
        chat_id: i64,
    ) -> Outcome {
        if control_id != self.redirect.control_token {
            tracing::debug!(control_id, "activation of unknown control");
            let acknowledged = self.acknowledge(activation_id, &AckMode::Silent).await;
            return Outcome::Ignored { acknowledged };
        }

        let user_id = user.user_id;
        self.touch_identity(user).await;

        let resolver = self.resolver.clone();
        let keyword = blocking(move || Ok(resolver.resolve_last_keyword(user_id)))
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "attribution lookup aborted, using fallback");
                crate::keyword::UNKNOWN.to_string()
            });

        let debounced = self
            .debounce
            .as_ref()
            .is_some_and(|d| !d.admit(user_id, Instant::now()));

        let click_event = if debounced {
            tracing::debug!("activation inside debounce window, click not recorded");
            None
        } else {
            self.append_event(EventType::Click, &keyword, user_id, chat_id)
                .await
        };

        // Exactly one redirect: either the ack opens the URL, or a follow-up
        // message carries the link.
        let (acknowledged, action, delivered) = match self.redirect.mode {
            // Link deployments never issue callback controls; a stale button
            // from an earlier deployment still gets sent on its way.
            RedirectMode::OpenUrl | RedirectMode::Link => {
                let mode = AckMode::OpenUrl(self.redirect.destination_url.clone());
                let acknowledged = self.acknowledge(activation_id, &mode).await;
                (acknowledged, RedirectAction::OpenUrl, acknowledged)
            }
            RedirectMode::FollowUp => {
                let mode = match &self.redirect.ack_toast {
                    Some(text) => AckMode::Toast(text.clone()),
                    None => AckMode::Silent,
                };
                let acknowledged = self.acknowledge(activation_id, &mode).await;
                let follow_up = self.redirect.follow_up_message();
                let delivered = within(
                    self.send_deadline,
                    self.transport.send_message(chat_id, &follow_up),
                )
                .await
                .best_effort("send_follow_up")
                .is_some();
                (acknowledged, RedirectAction::FollowUpMessage, delivered)
            }
        };

        tracing::info!(%keyword, ?click_event, debounced, acknowledged, ?action, delivered, "redirected");
        Outcome::Redirected {
            keyword,
            click_event,
            debounced,
            acknowledged,
            action,
            delivered,
        }
    }
}
