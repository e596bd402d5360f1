mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

use crate::cli::Args;
use crate::models::conversation::{
    ConversationFilter,
    ConversationRecord,
    ConversationWithUser,
    NewTurn,
};
use crate::models::user::{ NewUser, UserCredentials, UserSummary };

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("serialization failed: {}", err))
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user and returns the assigned id. Emails are unique
    /// case-insensitively.
    async fn create_user(&self, user: NewUser) -> Result<i64, StoreError>;

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, StoreError>;

    async fn get_user(&self, id: i64) -> Result<Option<UserSummary>, StoreError>;

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Writes every turn or none of them. Returns the number written.
    /// The caller checks that the user exists.
    async fn save_batch(&self, user_id: i64, turns: Vec<NewTurn>) -> Result<usize, StoreError>;

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<ConversationRecord>, StoreError>;

    async fn list_by_filters(
        &self,
        filter: &ConversationFilter
    ) -> Result<Vec<ConversationWithUser>, StoreError>;
}

/// Store handles injected into the HTTP layer.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self { users: store.clone(), conversations: store }
    }
}

pub fn create_stores(args: &Args) -> Result<Stores, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "redis" => {
            let store = Arc::new(RedisStore::new(&args.store_host, &args.store_prefix)?);
            Ok(Stores { users: store.clone(), conversations: store })
        }
        "memory" => Ok(Stores::in_memory()),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported store type: {}", args.store_type)
                    )
                )
            ),
    }
}

pub fn initialize_stores(args: &Args) -> Result<Stores, Box<dyn Error + Send + Sync>> {
    info!("Users and conversations will be stored in: {} at {}", args.store_type, args.store_host);
    create_stores(args)
}
