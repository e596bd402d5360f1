use async_trait::async_trait;
use chrono::Utc;
use std::collections::{ BTreeMap, HashMap };
use tokio::sync::RwLock;

use super::{ ConversationStore, StoreError, UserStore };
use crate::models::conversation::{
    sort_for_user,
    sort_newest_first,
    ConversationFilter,
    ConversationRecord,
    ConversationWithUser,
    NewTurn,
};
use crate::models::user::{
    normalize_email,
    NewUser,
    StoredUser,
    UserCredentials,
    UserSummary,
};

/// Process-local store, used for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<i64, StoredUser>,
    emails: HashMap<String, i64>,
    conversations: Vec<ConversationRecord>,
    last_user_id: i64,
    last_chat_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<i64, StoreError> {
        let email = normalize_email(&user.email);
        let mut inner = self.inner.write().await;
        if inner.emails.contains_key(&email) {
            return Err(StoreError::DuplicateEmail);
        }
        inner.last_user_id += 1;
        let id = inner.last_user_id;
        inner.emails.insert(email.clone(), id);
        inner.users.insert(id, StoredUser {
            id,
            email,
            password_hash: user.password_hash,
            profile: user.profile,
        });
        Ok(id)
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, StoreError> {
        let inner = self.inner.read().await;
        let found = inner.emails
            .get(&normalize_email(email))
            .and_then(|id| inner.users.get(id))
            .map(|user| UserCredentials {
                id: user.id,
                password_hash: user.password_hash.clone(),
            });
        Ok(found)
    }

    async fn get_user(&self, id: i64) -> Result<Option<UserSummary>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).map(StoredUser::summary))
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        Ok(self.inner.read().await.users.values().map(StoredUser::summary).collect())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save_batch(&self, user_id: i64, turns: Vec<NewTurn>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let count = turns.len();
        for turn in turns {
            inner.last_chat_id += 1;
            let record = ConversationRecord::from_turn(inner.last_chat_id, user_id, turn, now);
            inner.conversations.push(record);
        }
        Ok(count)
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<ConversationRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut records: Vec<ConversationRecord> = inner.conversations
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        sort_for_user(&mut records);
        Ok(records)
    }

    async fn list_by_filters(
        &self,
        filter: &ConversationFilter
    ) -> Result<Vec<ConversationWithUser>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<ConversationWithUser> = inner.conversations
            .iter()
            .filter(|r| filter.matches(r))
            .filter_map(|r| {
                let owner = inner.users.get(&r.user_id)?;
                Some(ConversationWithUser {
                    record: r.clone(),
                    first_name: owner.profile.first_name.clone(),
                    last_name: owner.profile.last_name.clone(),
                })
            })
            .collect();
        sort_newest_first(&mut rows);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserProfile;
    use chrono::Duration;

    fn new_user(email: &str, first_name: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            profile: UserProfile {
                first_name: Some(first_name.to_string()),
                ..Default::default()
            },
        }
    }

    fn turn(session: &str, user: &str) -> NewTurn {
        NewTurn {
            session_id: session.to_string(),
            user_message: Some(user.to_string()),
            ai_message: None,
        }
    }

    #[tokio::test]
    async fn emails_are_unique_ignoring_case() {
        let store = MemoryStore::new();
        let id = store.create_user(new_user("ada@example.com", "Ada")).await.unwrap();
        assert_eq!(id, 1);
        let dup = store.create_user(new_user("ADA@example.com", "Other")).await;
        assert!(matches!(dup, Err(StoreError::DuplicateEmail)));

        let creds = store.find_credentials(" Ada@Example.com").await.unwrap().unwrap();
        assert_eq!(creds.id, 1);
        assert!(store.find_credentials("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_user_returns_the_public_summary() {
        let store = MemoryStore::new();
        let id = store.create_user(new_user("ada@example.com", "Ada")).await.unwrap();
        let summary = store.get_user(id).await.unwrap().unwrap();
        assert_eq!(summary.id, id);
        assert_eq!(summary.first_name.as_deref(), Some("Ada"));
        assert!(store.get_user(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_by_user_and_by_filters() {
        let store = MemoryStore::new();
        let ada = store.create_user(new_user("ada@example.com", "Ada")).await.unwrap();
        let bob = store.create_user(new_user("bob@example.com", "Bob")).await.unwrap();

        store.save_batch(ada, vec![turn("b", "second session"), turn("a", "first")]).await.unwrap();
        store.save_batch(bob, vec![turn("x", "bob says")]).await.unwrap();

        let history = store.list_by_user(ada).await.unwrap();
        let sessions: Vec<&str> = history
            .iter()
            .map(|r| r.session_id.as_str())
            .collect();
        assert_eq!(sessions, vec!["a", "b"]);

        let only_bob = store
            .list_by_filters(&(ConversationFilter { user_id: Some(bob), ..Default::default() })).await
            .unwrap();
        assert_eq!(only_bob.len(), 1);
        assert_eq!(only_bob[0].first_name.as_deref(), Some("Bob"));

        let everything = store.list_by_filters(&ConversationFilter::default()).await.unwrap();
        assert_eq!(everything.len(), 3);
        assert_eq!(everything[0].record.user_id, bob, "newest first");

        let future = ConversationFilter {
            start: Some(Utc::now() + Duration::days(1)),
            ..Default::default()
        };
        assert!(store.list_by_filters(&future).await.unwrap().is_empty());
    }
}
