use futures_util::FutureExt;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::TelegramClient;
use super::handler::{ChatHandler, Reply};
use super::types::{CallbackQuery, Update};
use crate::models::SubscriberId;
use crate::notify::DeliveryError;

const MAX_BACKOFF_SECS: u64 = 60;

/// A chat lane with nothing to do for this long shuts down.
const LANE_IDLE: Duration = Duration::from_secs(300);

/// How long shutdown waits for updates already received.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Delay before retrying `getUpdates`: `base_secs` plus up to 50% jitter.
pub fn retry_delay(base_secs: u64) -> Duration {
    let base_ms = base_secs * 1000;
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms + jitter_ms)
}

/// One FIFO task per active chat. Updates from the same chat are routed in
/// arrival order, so a prompt and its answer can never swap; different chats
/// run concurrently.
struct ChatLanes<F> {
    route: F,
    lanes: HashMap<i64, mpsc::UnboundedSender<Update>>,
    tasks: JoinSet<()>,
}

impl<F, Fut> ChatLanes<F>
where
    F: Fn(Update) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn new(route: F) -> Self {
        ChatLanes {
            route,
            lanes: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    fn push(&mut self, update: Update) {
        let Some(chat) = update.chat_id() else {
            debug!("Ignoring update {} with no chat", update.update_id);
            return;
        };
        // A lane that went idle has closed its receiver; start a new one
        let update = match self.lanes.get(&chat) {
            Some(tx) => match tx.send(update) {
                Ok(()) => return,
                Err(mpsc::error::SendError(update)) => update,
            },
            None => update,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(update).is_ok() {
            self.tasks.spawn(run_lane(chat, rx, self.route.clone()));
            self.lanes.insert(chat, tx);
        }
    }

    /// Forget lanes that have shut down.
    fn reap(&mut self) {
        while let Some(res) = self.tasks.try_join_next() {
            log_lane_exit(res);
        }
        self.lanes.retain(|_, tx| !tx.is_closed());
    }

    /// Close every lane and wait for queued updates to finish, up to `grace`.
    async fn drain(mut self, grace: Duration) {
        self.lanes.clear();
        let tasks = &mut self.tasks;
        let finished = tokio::time::timeout(grace, async {
            while let Some(res) = tasks.join_next().await {
                log_lane_exit(res);
            }
        })
        .await;
        if finished.is_err() {
            warn!(
                "{} chat lane(s) still busy after {:?}; aborting",
                self.tasks.len(),
                grace
            );
            self.tasks.shutdown().await;
        }
    }
}

async fn run_lane<F, Fut>(chat: i64, mut rx: mpsc::UnboundedReceiver<Update>, route: F)
where
    F: Fn(Update) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        match tokio::time::timeout(LANE_IDLE, rx.recv()).await {
            Ok(Some(update)) => route_guarded(chat, &route, update).await,
            // Loop is shutting down and the queue is empty
            Ok(None) => return,
            Err(_) => break,
        }
    }
    // Refuse new updates, then finish whatever slipped in
    rx.close();
    while let Some(update) = rx.recv().await {
        route_guarded(chat, &route, update).await;
    }
}

async fn route_guarded<F, Fut>(chat: i64, route: &F, update: Update)
where
    F: Fn(Update) -> Fut,
    Fut: Future<Output = ()>,
{
    let update_id = update.update_id;
    if AssertUnwindSafe(route(update)).catch_unwind().await.is_err() {
        error!("Handling update {} for chat {} panicked", update_id, chat);
    }
}

fn log_lane_exit(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if !e.is_cancelled() {
            error!("Chat lane failed: {}", e);
        }
    }
}

/// Long-poll Telegram for updates and route them to `handler` until
/// `shutdown` is cancelled. Updates already received are finished before
/// this returns.
pub async fn run_update_loop(
    client: TelegramClient,
    handler: ChatHandler,
    shutdown: CancellationToken,
) {
    info!("Telegram update loop started");
    let mut offset = 0i64;
    let mut backoff_secs = 1u64;

    let route = {
        let client = client.clone();
        move |update: Update| {
            let client = client.clone();
            let handler = handler.clone();
            async move { route_update(&client, &handler, update).await }
        }
    };
    let mut lanes = ChatLanes::new(route);

    loop {
        let polled = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            res = client.get_updates(offset) => res,
        };
        lanes.reap();

        match polled {
            Ok(updates) => {
                backoff_secs = 1;
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    lanes.push(update);
                }
            }
            Err(e) => {
                let delay = retry_delay(backoff_secs);
                warn!("Polling Telegram failed: {:#}; retrying in {:?}", e, delay);
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        }
    }

    lanes.drain(SHUTDOWN_GRACE).await;
    info!("Telegram update loop stopped");
}

async fn route_update(client: &TelegramClient, handler: &ChatHandler, update: Update) {
    if let Some(message) = update.message {
        let Some(text) = message.text else {
            return;
        };
        let chat = message.chat.id;
        let reply = handler.handle_text(SubscriberId(chat), &text).await;
        send_reply(client, chat, reply).await;
    } else if let Some(callback) = update.callback_query {
        if let Err(e) = client.answer_callback_query(&callback.id).await {
            warn!("{:#}", e);
        }
        let chat = callback.chat_id();
        let Some(data) = callback.data.as_deref() else {
            return;
        };
        let reply = handler.handle_callback(SubscriberId(chat), data).await;
        match pressed_message(&callback, &reply) {
            Some(message_id) => edit_reply(client, chat, message_id, reply).await,
            None => send_reply(client, chat, reply).await,
        }
    }
}

/// Message to edit for a callback reply, if the reply asks for it and the
/// button's message is still known.
fn pressed_message(callback: &CallbackQuery, reply: &Reply) -> Option<i64> {
    if !reply.edit_in_place {
        return None;
    }
    callback.message.as_ref().map(|m| m.message_id)
}

async fn send_reply(client: &TelegramClient, chat: i64, reply: Reply) {
    if let Err(e) = client
        .send_message(chat, &reply.text, reply.keyboard.as_ref())
        .await
    {
        warn!("Reply to {} failed: {}", chat, e);
    }
}

async fn edit_reply(client: &TelegramClient, chat: i64, message_id: i64, reply: Reply) {
    match client
        .edit_message_text(chat, message_id, &reply.text, reply.keyboard.as_ref())
        .await
    {
        Ok(()) => {}
        // Pressing "Live Matches" twice with no score change
        Err(DeliveryError::Rejected(d)) if d.contains("message is not modified") => {
            debug!("Message {} in {} unchanged", message_id, chat);
        }
        Err(e) => warn!("Editing message {} in {} failed: {}", message_id, chat, e),
    }
}
