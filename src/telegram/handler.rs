//! Command handling for the chat interface.
//!
//! Each chat has a small input state machine so a bare team name can follow
//! a `/follow` or `/search` prompt:
//!
//! ```text
//!  Idle ──/follow──▶ AwaitingAlertTeamName ──<team>──▶ Idle (team followed)
//!  Idle ──/search──▶ AwaitingTeamName      ──<team>──▶ Idle (matches listed)
//!  any  ──/cancel──▶ Idle
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use crate::live_scores::{format_live_matches, SnapshotFetcher};
use crate::models::SubscriberId;
use crate::store::SubscriptionRegistry;

const HELP_TEXT: &str = "Commands:\n\
/live – live matches right now\n\
/search <team> – live matches for one team\n\
/follow <team> – goal alerts for a team\n\
/unfollow <team> – stop alerts for a team\n\
/teams – teams you follow\n\
/cancel – abort the current prompt\n\n\
Team names must match the data provider's spelling exactly, e.g. \"Manchester United\".";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputState {
    #[default]
    Idle,
    /// Next plain message is a team to search live matches for
    AwaitingTeamName,
    /// Next plain message is a team to follow
    AwaitingAlertTeamName,
}

/// Text plus optional inline keyboard to send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
    /// Replace the message the pressed button belongs to instead of
    /// sending a new one.
    pub edit_in_place: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            keyboard: None,
            edit_in_place: false,
        }
    }
}

#[derive(Clone)]
pub struct ChatHandler {
    registry: SubscriptionRegistry,
    fetcher: Arc<dyn SnapshotFetcher>,
    sessions: Arc<Mutex<HashMap<SubscriberId, InputState>>>,
}

impl ChatHandler {
    pub fn new(registry: SubscriptionRegistry, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        ChatHandler {
            registry,
            fetcher,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[allow(dead_code)]
    pub async fn input_state(&self, chat: SubscriberId) -> InputState {
        self.sessions
            .lock()
            .await
            .get(&chat)
            .copied()
            .unwrap_or_default()
    }

    async fn set_state(&self, chat: SubscriberId, state: InputState) {
        let mut sessions = self.sessions.lock().await;
        if state == InputState::Idle {
            sessions.remove(&chat);
        } else {
            sessions.insert(chat, state);
        }
    }

    /// Current state, reset to `Idle`.
    async fn take_state(&self, chat: SubscriberId) -> InputState {
        self.sessions
            .lock()
            .await
            .remove(&chat)
            .unwrap_or_default()
    }

    /// Handle a text message from `chat`.
    pub async fn handle_text(&self, chat: SubscriberId, text: &str) -> Reply {
        let text = text.trim();
        let Some(command_line) = text.strip_prefix('/') else {
            return self.handle_plain(chat, text).await;
        };

        let (command, arg) = match command_line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (command_line, ""),
        };
        // "/follow@my_bot Arsenal" in group chats
        let command = command.split('@').next().unwrap_or(command);

        // Any command aborts a pending prompt
        self.set_state(chat, InputState::Idle).await;

        match command {
            "start" => welcome(),
            "help" => Reply::text(HELP_TEXT),
            "live" => self.live_matches(None).await,
            "search" if arg.is_empty() => {
                self.set_state(chat, InputState::AwaitingTeamName).await;
                Reply::text("Which team? Send its name.")
            }
            "search" => self.live_matches(Some(arg)).await,
            "follow" if arg.is_empty() => {
                self.set_state(chat, InputState::AwaitingAlertTeamName).await;
                Reply::text("Which team do you want goal alerts for? Send its name.")
            }
            "follow" => self.follow(chat, arg).await,
            "unfollow" if arg.is_empty() => Reply::text("Usage: /unfollow <team>"),
            "unfollow" => self.unfollow(chat, arg).await,
            "teams" => self.teams(chat).await,
            "cancel" => Reply::text("Cancelled."),
            _ => Reply::text("Unknown command. Send /help to see what I can do."),
        }
    }

    /// Handle an inline keyboard button press.
    pub async fn handle_callback(&self, chat: SubscriberId, data: &str) -> Reply {
        match data {
            "live" => {
                let live = self.handle_text(chat, "/live").await;
                Reply {
                    keyboard: Some(main_menu()),
                    edit_in_place: true,
                    ..live
                }
            }
            "follow" => self.handle_text(chat, "/follow").await,
            "search" => self.handle_text(chat, "/search").await,
            other => {
                warn!("Unknown callback data '{}' from {}", other, chat);
                Reply::text("That button is no longer supported.")
            }
        }
    }

    async fn handle_plain(&self, chat: SubscriberId, text: &str) -> Reply {
        if text.is_empty() {
            return Reply::text("Send /help to see what I can do.");
        }
        match self.take_state(chat).await {
            InputState::Idle => Reply::text("Send /help to see what I can do."),
            InputState::AwaitingTeamName => self.live_matches(Some(text)).await,
            InputState::AwaitingAlertTeamName => self.follow(chat, text).await,
        }
    }

    async fn live_matches(&self, team: Option<&str>) -> Reply {
        let events = match self.fetcher.fetch_live_events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Live matches lookup failed: {}", e);
                return Reply::text(format!("Error fetching live scores: {}", e));
            }
        };
        match team {
            None => Reply::text(format_live_matches(&events)),
            Some(team) => {
                let matching: Vec<_> = events.into_iter().filter(|e| e.involves(team)).collect();
                if matching.is_empty() {
                    Reply::text(format!("No live matches for {} right now.", team))
                } else {
                    Reply::text(format_live_matches(&matching))
                }
            }
        }
    }

    async fn follow(&self, chat: SubscriberId, team: &str) -> Reply {
        if self.registry.add(chat, team).await {
            info!("Subscriber {} follows '{}'", chat, team);
            Reply::text(format!("✅ You'll get goal alerts for {}.", team))
        } else {
            Reply::text(format!("You already follow {}.", team))
        }
    }

    async fn unfollow(&self, chat: SubscriberId, team: &str) -> Reply {
        if self.registry.remove(chat, team).await {
            info!("Subscriber {} unfollowed '{}'", chat, team);
            Reply::text(format!("🔕 No more alerts for {}.", team))
        } else {
            Reply::text(format!("You don't follow {}.", team))
        }
    }

    async fn teams(&self, chat: SubscriberId) -> Reply {
        let teams = self.registry.list(chat).await;
        if teams.is_empty() {
            return Reply::text("You don't follow any teams yet. Use /follow <team>.");
        }
        let mut text = String::from("You follow:\n");
        for team in teams {
            text.push_str(&format!("• {}\n", team));
        }
        Reply::text(text)
    }
}

fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            vec![InlineKeyboardButton::callback("Live Matches", "live")],
            vec![
                InlineKeyboardButton::callback("Follow a team", "follow"),
                InlineKeyboardButton::callback("Search a team", "search"),
            ],
        ],
    }
}

fn welcome() -> Reply {
    Reply {
        text: "Welcome to LiveScore Bot!".to_string(),
        keyboard: Some(main_menu()),
        edit_in_place: false,
    }
}
