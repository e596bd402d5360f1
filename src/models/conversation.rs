use chrono::{ DateTime, NaiveDate, TimeZone, Utc };
use log::warn;
use serde::{ Serialize, Deserialize };
use serde_json::Value;

/// A turn waiting to be written; exactly one of the two messages is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTurn {
    pub session_id: String,
    pub user_message: Option<String>,
    pub ai_message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub chat_id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub user_message: Option<String>,
    pub ai_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn from_turn(chat_id: i64, user_id: i64, turn: NewTurn, timestamp: DateTime<Utc>) -> Self {
        Self {
            chat_id,
            user_id,
            session_id: turn.session_id,
            user_message: turn.user_message,
            ai_message: turn.ai_message,
            timestamp,
        }
    }
}

/// Record joined with its owner's name, as returned by the filter listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationWithUser {
    #[serde(flatten)]
    pub record: ConversationRecord,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    pub user_id: Option<i64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ConversationFilter {
    /// Builds a filter from calendar days; both ends are inclusive.
    pub fn from_dates(
        user_id: Option<i64>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>
    ) -> Self {
        let start = start_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt));
        let end = end_date
            .and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999))
            .map(|dt| Utc.from_utc_datetime(&dt));
        Self { user_id, start, end }
    }

    pub fn matches(&self, record: &ConversationRecord) -> bool {
        if let Some(user_id) = self.user_id {
            if record.user_id != user_id {
                return false;
            }
        }
        if let Some(start) = self.start {
            if record.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if record.timestamp > end {
                return false;
            }
        }
        true
    }
}

/// Per-user history order: session, then time, then insertion.
pub fn sort_for_user(records: &mut [ConversationRecord]) {
    records.sort_by(|a, b| {
        a.session_id
            .cmp(&b.session_id)
            .then(a.timestamp.cmp(&b.timestamp))
            .then(a.chat_id.cmp(&b.chat_id))
    });
}

pub fn sort_newest_first(records: &mut [ConversationWithUser]) {
    records.sort_by(|a, b| {
        b.record.timestamp.cmp(&a.record.timestamp).then(b.record.chat_id.cmp(&a.record.chat_id))
    });
}

/// Body of `POST /save_conversation_session`.
#[derive(Debug, Default, Deserialize)]
pub struct SaveSessionRequest {
    #[serde(default, rename = "userId", alias = "userID")]
    pub user_id: Option<Value>,
    #[serde(default, rename = "conversationId")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
}

impl SaveSessionRequest {
    /// Checks the envelope and turns the entries into rows.
    ///
    /// Entries with an unknown `messageType` or blank content are skipped
    /// with a warning; the envelope itself must be complete.
    pub fn into_turns(self) -> Result<(i64, Vec<NewTurn>), String> {
        let user_id = self.user_id
            .as_ref()
            .and_then(parse_user_id)
            .ok_or_else(|| "Invalid UserID provided.".to_string())?;

        let conversation_id = self.conversation_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let messages = self.messages.unwrap_or_default();
        let conversation_id = match conversation_id {
            Some(c) if !messages.is_empty() => c,
            _ => {
                return Err(
                    "UserID, conversationId, and a non-empty array of messages are required.".to_string()
                );
            }
        };

        let turns = messages
            .iter()
            .filter_map(|entry| entry_to_turn(&conversation_id, entry))
            .collect();
        Ok((user_id, turns))
    }
}

/// Accepts a positive integer or a string holding one.
pub fn parse_user_id(value: &Value) -> Option<i64> {
    let id = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => {
            return None;
        }
    };
    (id > 0).then_some(id)
}

fn entry_to_turn(default_session: &str, entry: &Value) -> Option<NewTurn> {
    let kind = entry.get("messageType").and_then(Value::as_str);
    let content = entry
        .get("messageContent")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|c| !c.trim().is_empty());
    let session_id = entry
        .get("chatID")
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default_session.to_string());

    let Some(content) = content else {
        warn!("Skipping conversation entry without content: {}", entry);
        return None;
    };

    match kind {
        Some("user") =>
            Some(NewTurn { session_id, user_message: Some(content), ai_message: None }),
        Some("assistant") =>
            Some(NewTurn { session_id, user_message: None, ai_message: Some(content) }),
        _ => {
            warn!("Skipping conversation entry with unknown messageType: {}", entry);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> SaveSessionRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn builds_turns_and_skips_bad_entries() {
        let (user_id, turns) = request(
            json!({
            "userId": "12",
            "conversationId": "s-1",
            "messages": [
                {"messageType": "user", "messageContent": "hello"},
                {"messageType": "assistant", "messageContent": "hi there", "chatID": "s-2"},
                {"messageType": "system", "messageContent": "ignored"},
                {"messageType": "user", "messageContent": "   "},
                {"messageType": "user"}
            ]
        })
        )
            .into_turns()
            .unwrap();

        assert_eq!(user_id, 12);
        assert_eq!(
            turns,
            vec![
                NewTurn {
                    session_id: "s-1".into(),
                    user_message: Some("hello".into()),
                    ai_message: None,
                },
                NewTurn {
                    session_id: "s-2".into(),
                    user_message: None,
                    ai_message: Some("hi there".into()),
                }
            ]
        );
    }

    #[test]
    fn user_id_key_accepts_both_spellings() {
        let envelope = |key: &str| {
            let mut body = json!({
                "conversationId": "s",
                "messages": [{"messageType": "user", "messageContent": "hi"}]
            });
            body[key] = json!(5);
            body
        };
        assert_eq!(request(envelope("userId")).into_turns().unwrap().0, 5);
        assert_eq!(request(envelope("userID")).into_turns().unwrap().0, 5);

        let both = json!({"userId": 5, "userID": 6, "conversationId": "s", "messages": []});
        assert!(serde_json::from_value::<SaveSessionRequest>(both).is_err());
    }

    #[test]
    fn rejects_incomplete_envelopes() {
        assert!(request(json!({"userId": "abc"})).into_turns().is_err());
        assert!(request(json!({"userId": 0, "conversationId": "s"})).into_turns().is_err());
        assert!(
            request(json!({"userId": 1, "conversationId": " ", "messages": [{}]}))
                .into_turns()
                .is_err()
        );
        assert!(
            request(json!({"userId": 1, "conversationId": "s", "messages": []}))
                .into_turns()
                .is_err()
        );
    }

    #[test]
    fn date_filter_is_inclusive_by_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let filter = ConversationFilter::from_dates(None, Some(day), Some(day));
        let at = |h, m, s| ConversationRecord {
            chat_id: 1,
            user_id: 1,
            session_id: "s".into(),
            user_message: Some("x".into()),
            ai_message: None,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, h, m, s).unwrap(),
        };
        assert!(filter.matches(&at(0, 0, 0)));
        assert!(filter.matches(&at(23, 59, 59)));

        let mut next_day = at(0, 0, 0);
        next_day.timestamp = Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap();
        assert!(!filter.matches(&next_day));
    }

    #[test]
    fn user_history_sorts_by_session_then_time() {
        let ts = |s| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, s).unwrap();
        let rec = |id, session: &str, s| ConversationRecord {
            chat_id: id,
            user_id: 1,
            session_id: session.into(),
            user_message: None,
            ai_message: Some("x".into()),
            timestamp: ts(s),
        };
        let mut records = vec![rec(1, "b", 1), rec(2, "a", 5), rec(3, "a", 2)];
        sort_for_user(&mut records);
        let ids: Vec<i64> = records.iter().map(|r| r.chat_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
