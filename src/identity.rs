//! User identity storage for the demonstration application.
//!
//! # Responsibilities
//! - Store users keyed by id, with lookup by external (OAuth) id and email
//! - Upsert users from identity-provider claims
//!
//! # Design Decisions
//! - Emails are compared case-insensitively
//! - Email uniqueness is enforced through an index entry, so concurrent
//!   registrations of one address cannot both succeed

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("A user with email '{0}' already exists")]
    EmailTaken(String),

    #[error("User {0} not found")]
    NotFound(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    /// Seconds since epoch.
    pub created_at: u64,
    pub updated_at: u64,
}

/// Fields supplied when creating a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub external_id: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

/// Claims from the identity provider's callback.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClaims {
    pub sub: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn email_key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[async_trait]
pub trait UserStore: Send + Sync + std::fmt::Debug {
    async fn get_user_by_external_id(&self, external_id: &str) -> Option<User>;
    async fn get_user_by_email(&self, email: &str) -> Option<User>;
    async fn create_user(&self, user: NewUser) -> Result<User, IdentityError>;
    async fn update_user(&self, user: User) -> Result<User, IdentityError>;
}

/// In-memory `UserStore`.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<DashMap<Uuid, User>>,
    by_email: Arc<DashMap<String, Uuid>>,
    by_external_id: Arc<DashMap<String, Uuid>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn lookup(&self, index: &DashMap<String, Uuid>, key: &str) -> Option<User> {
        let id = *index.get(key)?;
        self.users.get(&id).map(|user| user.clone())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_user_by_external_id(&self, external_id: &str) -> Option<User> {
        self.lookup(&self.by_external_id, external_id)
    }

    async fn get_user_by_email(&self, email: &str) -> Option<User> {
        self.lookup(&self.by_email, &email_key(email))
    }

    async fn create_user(&self, new: NewUser) -> Result<User, IdentityError> {
        let id = Uuid::new_v4();
        match self.by_email.entry(email_key(&new.email)) {
            Entry::Occupied(_) => return Err(IdentityError::EmailTaken(new.email)),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let now = now_secs();
        let user = User {
            id,
            external_id: new.external_id,
            email: new.email.trim().to_string(),
            first_name: new.first_name,
            last_name: new.last_name,
            profile_image_url: new.profile_image_url,
            created_at: now,
            updated_at: now,
        };
        if let Some(external_id) = &user.external_id {
            self.by_external_id.insert(external_id.clone(), id);
        }
        self.users.insert(id, user.clone());

        tracing::info!(user_id = %id, "User created");
        Ok(user)
    }

    async fn update_user(&self, mut user: User) -> Result<User, IdentityError> {
        let previous = self
            .users
            .get(&user.id)
            .map(|u| u.clone())
            .ok_or(IdentityError::NotFound(user.id))?;

        let old_email = email_key(&previous.email);
        let new_email = email_key(&user.email);
        if old_email != new_email {
            match self.by_email.entry(new_email) {
                Entry::Occupied(_) => return Err(IdentityError::EmailTaken(user.email)),
                Entry::Vacant(slot) => {
                    slot.insert(user.id);
                }
            }
            self.by_email.remove(&old_email);
        }

        if previous.external_id != user.external_id {
            if let Some(old) = &previous.external_id {
                self.by_external_id.remove(old);
            }
            if let Some(new) = &user.external_id {
                self.by_external_id.insert(new.clone(), user.id);
            }
        }

        user.created_at = previous.created_at;
        user.updated_at = now_secs();
        self.users.insert(user.id, user.clone());
        Ok(user)
    }
}

/// Find by external id, else link an existing account by email, else create.
pub async fn upsert_oauth_user(
    store: &dyn UserStore,
    claims: OAuthClaims,
) -> Result<User, IdentityError> {
    let existing = match store.get_user_by_external_id(&claims.sub).await {
        Some(user) => Some(user),
        None => {
            let linked = store.get_user_by_email(&claims.email).await;
            if let Some(user) = &linked {
                tracing::info!(user_id = %user.id, "Linking identity provider account by email");
            }
            linked
        }
    };

    match existing {
        Some(mut user) => {
            user.external_id = Some(claims.sub);
            user.email = claims.email;
            user.first_name = claims.first_name.or(user.first_name);
            user.last_name = claims.last_name.or(user.last_name);
            user.profile_image_url = claims.profile_image_url.or(user.profile_image_url);
            store.update_user(user).await
        }
        None => {
            store
                .create_user(NewUser {
                    external_id: Some(claims.sub),
                    email: claims.email,
                    first_name: claims.first_name,
                    last_name: claims.last_name,
                    profile_image_url: claims.profile_image_url,
                })
                .await
        }
    }
}
