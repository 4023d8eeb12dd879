//! The subset of Telegram Bot API objects this bot reads and writes.

use serde::{Deserialize, Serialize};

/// Envelope every Bot API method responds with.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

impl Update {
    /// Chat this update belongs to, if it carries anything we handle.
    pub fn chat_id(&self) -> Option<i64> {
        match (&self.message, &self.callback_query) {
            (Some(message), _) => Some(message.chat.id),
            (None, Some(callback)) => Some(callback.chat_id()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

impl CallbackQuery {
    /// Chat the button was pressed in, falling back to the user's private chat.
    pub fn chat_id(&self) -> i64 {
        self.message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(self.from.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardButton {
    pub fn callback(text: &str, data: &str) -> Self {
        InlineKeyboardButton {
            text: text.to_string(),
            callback_data: data.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMessage<'a> {
    pub chat_id: i64,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EditMessageText<'a> {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_updates() {
        let raw = r#"{
            "ok": true,
            "result": [
                {"update_id": 7, "message": {"message_id": 1, "chat": {"id": 42, "type": "private"}, "text": "/follow Arsenal"}},
                {"update_id": 8, "callback_query": {"id": "cb1", "from": {"id": 42, "is_bot": false}, "data": "live",
                    "message": {"message_id": 2, "chat": {"id": -100, "type": "group"}}}}
            ]
        }"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(resp.ok);
        let updates = resp.result.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].message.as_ref().unwrap().chat.id, 42);
        assert_eq!(
            updates[0].message.as_ref().unwrap().text.as_deref(),
            Some("/follow Arsenal")
        );
        let cb = updates[1].callback_query.as_ref().unwrap();
        assert_eq!(cb.data.as_deref(), Some("live"));
        assert_eq!(cb.chat_id(), -100);
        assert_eq!(cb.message.as_ref().unwrap().message_id, 2);
        assert_eq!(updates[0].chat_id(), Some(42));
        assert_eq!(updates[1].chat_id(), Some(-100));
    }

    #[test]
    fn test_update_without_payload_has_no_chat() {
        let update: Update = serde_json::from_str(r#"{"update_id": 9}"#).unwrap();
        assert_eq!(update.chat_id(), None);
    }

    #[test]
    fn test_serialize_send_message_without_keyboard() {
        let body = SendMessage {
            chat_id: 1,
            text: "hi",
            reply_markup: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("reply_markup").is_none());
    }

    #[test]
    fn test_error_envelope() {
        let raw = r#"{"ok": false, "error_code": 403, "description": "Forbidden: bot was blocked by the user"}"#;
        let resp: ApiResponse<serde_json::Value> = serde_json::from_str(raw).unwrap();
        assert!(!resp.ok);
        assert!(resp.description.unwrap().contains("blocked"));
    }
}
