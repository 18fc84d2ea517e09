//! User store: registration and lookups. Password hashes never leave
//! this layer except inside [`UserRecord`] for verification.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use applygate_core::types::{Role, Subject};

use crate::error::DataError;
use crate::routing::RoutedPool;
use std::sync::Arc;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn subject(&self) -> Subject {
        Subject {
            id: self.id,
            principal: self.email.clone(),
            roles: self
                .roles
                .iter()
                .filter_map(|r| r.parse::<Role>().ok())
                .collect(),
        }
    }
}

const COLUMNS: &str = "id, email, password_hash, roles, created_at";

#[derive(Clone)]
pub struct UserStore {
    router: Arc<RoutedPool>,
}

impl UserStore {
    pub fn new(router: Arc<RoutedPool>) -> Self {
        Self { router }
    }

    /// Insert a new user; a duplicate email is a conflict.
    pub async fn create(&self, email: &str, password_hash: &str) -> Result<UserRecord, DataError> {
        let result: Result<UserRecord, sqlx::Error> = sqlx::query_as(&format!(
            "INSERT INTO users (id, email, password_hash, roles, created_at) \
             VALUES ($1, $2, $3, ARRAY['user'], now()) \
             RETURNING {COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(password_hash)
        .fetch_one(self.router.writer())
        .await;

        result.map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DataError::Conflict(format!("email {email} already registered"))
            }
            _ => err.into(),
        })
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DataError> {
        // Read-after-write consistency matters right after registration.
        let user = sqlx::query_as(&format!("SELECT {COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(self.router.writer())
            .await?;
        Ok(user)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, DataError> {
        let user = sqlx::query_as(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.router.reader())
            .await?;
        Ok(user)
    }
}

/// Object-safe user-store seam.
pub trait UserDirectory: Send + Sync + 'static {
    fn create<'a>(
        &'a self,
        email: &'a str,
        password_hash: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UserRecord, DataError>> + Send + 'a>>;

    fn find_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserRecord>, DataError>> + Send + 'a>>;

    fn find_by_id<'a>(
        &'a self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserRecord>, DataError>> + Send + 'a>>;
}

use std::future::Future;
use std::pin::Pin;

impl UserDirectory for UserStore {
    fn create<'a>(
        &'a self,
        email: &'a str,
        password_hash: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UserRecord, DataError>> + Send + 'a>> {
        Box::pin(UserStore::create(self, email, password_hash))
    }

    fn find_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserRecord>, DataError>> + Send + 'a>> {
        Box::pin(UserStore::find_by_email(self, email))
    }

    fn find_by_id<'a>(
        &'a self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<UserRecord>, DataError>> + Send + 'a>> {
        Box::pin(UserStore::find_by_id(self, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_parses_known_roles_and_skips_unknown() {
        let user = UserRecord {
            id: Uuid::new_v4(),
            email: "a@b.c".into(),
            password_hash: "hash".into(),
            roles: vec!["user".into(), "admin".into(), "bogus".into()],
            created_at: Utc::now(),
        };
        let subject = user.subject();
        assert_eq!(subject.roles, vec![Role::User, Role::Admin]);
        assert_eq!(subject.principal, "a@b.c");
    }
}
