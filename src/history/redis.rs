use async_trait::async_trait;
use chrono::Utc;
use log::error;
use redis::{ AsyncCommands, Client, Script };

use crate::history::{ ConversationStore, StoreError, UserStore };
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

/// Redis layout, every key under the configured prefix:
///
/// - `users:next_id`     counter
/// - `users:by_email`    hash, normalized email -> id
/// - `users:index`       sorted set of ids
/// - `users:{id}`        JSON `StoredUser`
/// - `chats:next_id`     counter
/// - `chats:user:{id}`   list of JSON `ConversationRecord`, insertion order
pub struct RedisStore {
    client: Client,
    prefix: String,
    insert_user: Script,
}

/// Claims the email, stores the row and indexes the id in one server-side
/// step. KEYS: by_email, user row, index. ARGV: email, id, row JSON.
/// Returns 0 when the email is already taken.
const INSERT_USER_LUA: &str = r"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return 0
end
redis.call('SET', KEYS[2], ARGV[3])
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[2])
return 1
";

impl RedisStore {
    pub fn new(url: &str, prefix: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: Client::open(url)?,
            prefix: prefix.to_string(),
            insert_user: Script::new(INSERT_USER_LUA),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    fn user_key(&self, id: i64) -> String {
        self.key(&format!("users:{}", id))
    }

    fn chats_key(&self, user_id: i64) -> String {
        self.key(&format!("chats:user:{}", user_id))
    }

    async fn load_user(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: i64
    ) -> Result<Option<StoredUser>, StoreError> {
        let raw: Option<String> = conn.get(self.user_key(id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn load_records(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        user_id: i64
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        let entries: Vec<String> = conn.lrange(self.chats_key(user_id), 0, -1).await?;
        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            match serde_json::from_str::<ConversationRecord>(entry) {
                Ok(record) => records.push(record),
                Err(e) => error!("Error parsing conversation entry for user {}: {}", user_id, e),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl UserStore for RedisStore {
    async fn create_user(&self, user: NewUser) -> Result<i64, StoreError> {
        let mut conn = self.get_connection().await?;
        let email = normalize_email(&user.email);

        let id: i64 = conn.incr(self.key("users:next_id"), 1).await?;
        let stored = StoredUser {
            id,
            email,
            password_hash: user.password_hash,
            profile: user.profile,
        };
        let json = serde_json::to_string(&stored)?;

        let inserted: i64 = self.insert_user
            .key(self.key("users:by_email"))
            .key(self.user_key(id))
            .key(self.key("users:index"))
            .arg(&stored.email)
            .arg(id)
            .arg(json)
            .invoke_async(&mut conn).await?;
        if inserted == 0 {
            return Err(StoreError::DuplicateEmail);
        }
        Ok(id)
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, StoreError> {
        let mut conn = self.get_connection().await?;
        let id: Option<i64> = conn.hget(self.key("users:by_email"), normalize_email(email)).await?;
        let Some(id) = id else {
            return Ok(None);
        };
        let user = self.load_user(&mut conn, id).await?;
        Ok(
            user.map(|u| UserCredentials {
                id: u.id,
                password_hash: u.password_hash,
            })
        )
    }

    async fn get_user(&self, id: i64) -> Result<Option<UserSummary>, StoreError> {
        let mut conn = self.get_connection().await?;
        Ok(self.load_user(&mut conn, id).await?.map(|u| u.summary()))
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<i64> = conn.zrange(self.key("users:index"), 0, -1).await?;
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.load_user(&mut conn, id).await? {
                users.push(user.summary());
            }
        }
        Ok(users)
    }
}

#[async_trait]
impl ConversationStore for RedisStore {
    async fn save_batch(&self, user_id: i64, turns: Vec<NewTurn>) -> Result<usize, StoreError> {
        if turns.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;

        let count = turns.len();
        let last_id: i64 = conn.incr(self.key("chats:next_id"), count as i64).await?;
        let first_id = last_id - (count as i64) + 1;
        let now = Utc::now();
        let entries = turns
            .into_iter()
            .enumerate()
            .map(|(offset, turn)| {
                let record = ConversationRecord::from_turn(
                    first_id + (offset as i64),
                    user_id,
                    turn,
                    now
                );
                serde_json::to_string(&record)
            })
            .collect::<Result<Vec<String>, _>>()?;

        // A single multi-value RPUSH lands all rows or none.
        let _: i64 = conn.rpush(self.chats_key(user_id), entries).await?;
        Ok(count)
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<ConversationRecord>, StoreError> {
        let mut conn = self.get_connection().await?;
        let mut records = self.load_records(&mut conn, user_id).await?;
        sort_for_user(&mut records);
        Ok(records)
    }

    async fn list_by_filters(
        &self,
        filter: &ConversationFilter
    ) -> Result<Vec<ConversationWithUser>, StoreError> {
        let mut conn = self.get_connection().await?;
        let user_ids: Vec<i64> = match filter.user_id {
            Some(id) => vec![id],
            None => conn.zrange(self.key("users:index"), 0, -1).await?,
        };

        let mut rows = Vec::new();
        for user_id in user_ids {
            let Some(owner) = self.load_user(&mut conn, user_id).await? else {
                continue;
            };
            let records = self.load_records(&mut conn, user_id).await?;
            rows.extend(
                records
                    .into_iter()
                    .filter(|r| filter.matches(r))
                    .map(|record| ConversationWithUser {
                        record,
                        first_name: owner.profile.first_name.clone(),
                        last_name: owner.profile.last_name.clone(),
                    })
            );
        }
        sort_newest_first(&mut rows);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserProfile;
    use chrono::Duration;
    use uuid::Uuid;

    #[test]
    fn keys_live_under_the_prefix() {
        let store = RedisStore::new("redis://127.0.0.1:6379", "chatrelay:").unwrap();
        assert_eq!(store.user_key(7), "chatrelay:users:7");
        assert_eq!(store.chats_key(7), "chatrelay:chats:user:7");
        assert_eq!(store.key("users:by_email"), "chatrelay:users:by_email");
    }

    // The tests below need a running server: `cargo test -- --ignored`,
    // pointed elsewhere with REDIS_TEST_URL.

    fn live_store() -> RedisStore {
        let url = std::env::var("REDIS_TEST_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        RedisStore::new(&url, &format!("chatrelay-test:{}:", Uuid::new_v4())).unwrap()
    }

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
    #[ignore]
    async fn duplicate_email_leaves_no_partial_user() {
        let store = live_store();
        let id = store.create_user(new_user("ada@example.com", "Ada")).await.unwrap();
        let dup = store.create_user(new_user("ADA@example.com", "Other")).await;
        assert!(matches!(dup, Err(StoreError::DuplicateEmail)));

        let creds = store.find_credentials("ada@example.com").await.unwrap().unwrap();
        assert_eq!(creds.id, id);
        let users = store.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(store.get_user(id).await.unwrap().unwrap().first_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    #[ignore]
    async fn batches_sort_and_filter() {
        let store = live_store();
        let ada = store.create_user(new_user("ada@example.com", "Ada")).await.unwrap();
        let bob = store.create_user(new_user("bob@example.com", "Bob")).await.unwrap();

        let saved = store
            .save_batch(ada, vec![turn("b", "second session"), turn("a", "first")]).await
            .unwrap();
        assert_eq!(saved, 2);
        store.save_batch(bob, vec![turn("x", "bob says")]).await.unwrap();

        let sessions: Vec<String> = store
            .list_by_user(ada).await
            .unwrap()
            .into_iter()
            .map(|r| r.session_id)
            .collect();
        assert_eq!(sessions, vec!["a", "b"]);

        let everything = store.list_by_filters(&ConversationFilter::default()).await.unwrap();
        assert_eq!(everything.len(), 3);
        assert_eq!(everything[0].record.user_id, bob);
        assert_eq!(everything[0].first_name.as_deref(), Some("Bob"));

        let future = ConversationFilter {
            start: Some(Utc::now() + Duration::days(1)),
            ..Default::default()
        };
        assert!(store.list_by_filters(&future).await.unwrap().is_empty());
    }
}
