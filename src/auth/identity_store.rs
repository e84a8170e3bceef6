//! Persistent users and their linked provider identities

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, error, info};

use super::models::{AuthAssertion, Provider, ProviderIdentity, User};
use crate::common::{generate_identity_id, generate_user_id, safe_email_log, ApiError};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid identity assertion: {0}")]
    Validation(String),

    #[error("Identity conflict: {0}")]
    Conflict(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Validation(msg) => ApiError::ValidationError(msg),
            IdentityError::Conflict(msg) => ApiError::Conflict(msg),
            IdentityError::UserNotFound(msg) => ApiError::NotFound(msg),
            IdentityError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

/// Storage for users and provider identities
///
/// Implementations must enforce one user per email, one owner per
/// `(provider, provider_user_id)` and one identity per `(user, provider)`.
/// Violations surface as [`IdentityError::Conflict`].
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_user_by_identity(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<User>, IdentityError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, IdentityError>;

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, IdentityError>;

    async fn find_identity(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<ProviderIdentity>, IdentityError>;

    async fn list_providers(&self, user_id: &str) -> Result<Vec<Provider>, IdentityError>;

    /// Creates the user and its first identity atomically
    async fn create_user_with_identity(
        &self,
        assertion: &AuthAssertion,
    ) -> Result<User, IdentityError>;

    /// Attaches a provider identity to an existing user
    async fn link_identity(
        &self,
        user_id: &str,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<ProviderIdentity, IdentityError>;
}

pub struct SqliteIdentityStore {
    db: SqlitePool,
}

impl SqliteIdentityStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn find_user_by_identity(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<User>, IdentityError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.name, u.image, u.created_at
            FROM users u
            JOIN auth_providers ap ON ap.user_id = u.id
            WHERE ap.provider = ? AND ap.provider_user_id = ?
            "#,
        )
        .bind(provider.as_str())
        .bind(provider_user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, IdentityError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, image, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, IdentityError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, image, created_at FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    async fn find_identity(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<ProviderIdentity>, IdentityError> {
        let identity = sqlx::query_as::<_, ProviderIdentity>(
            "SELECT * FROM auth_providers WHERE provider = ? AND provider_user_id = ?",
        )
        .bind(provider.as_str())
        .bind(provider_user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(identity)
    }

    async fn list_providers(&self, user_id: &str) -> Result<Vec<Provider>, IdentityError> {
        let identities = sqlx::query_as::<_, ProviderIdentity>(
            "SELECT * FROM auth_providers WHERE user_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(identities.into_iter().map(|i| i.provider).collect())
    }

    async fn create_user_with_identity(
        &self,
        assertion: &AuthAssertion,
    ) -> Result<User, IdentityError> {
        let user_id = generate_user_id();
        let identity_id = generate_identity_id();

        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query("INSERT INTO users (id, email, name, image) VALUES (?, ?, ?, ?)")
            .bind(&user_id)
            .bind(&assertion.email)
            .bind(&assertion.display_name)
            .bind(&assertion.avatar_url)
            .execute(&mut *tx)
            .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                debug!(
                    email = %safe_email_log(&assertion.email),
                    "User insert lost a race on email"
                );
                return Err(IdentityError::Conflict(
                    "a user with this email already exists".to_string(),
                ));
            }
            error!(error = %e, "Database error creating user");
            return Err(IdentityError::Database(e));
        }

        let linked = sqlx::query(
            "INSERT INTO auth_providers (id, user_id, provider, provider_user_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&identity_id)
        .bind(&user_id)
        .bind(assertion.provider.as_str())
        .bind(&assertion.provider_subject_id)
        .execute(&mut *tx)
        .await;

        // Dropping `tx` on the error paths rolls back the user insert
        if let Err(e) = linked {
            if is_unique_violation(&e) {
                debug!(
                    provider = %assertion.provider,
                    "Identity insert lost a race on provider subject"
                );
                return Err(IdentityError::Conflict(
                    "this provider account is already linked".to_string(),
                ));
            }
            error!(error = %e, "Database error creating provider identity");
            return Err(IdentityError::Database(e));
        }

        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, image, created_at FROM users WHERE id = ?",
        )
        .bind(&user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            user_id = %user.id,
            email = %safe_email_log(&user.email),
            provider = %assertion.provider,
            "New user created"
        );

        Ok(user)
    }

    async fn link_identity(
        &self,
        user_id: &str,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<ProviderIdentity, IdentityError> {
        let identity_id = generate_identity_id();

        let mut tx = self.db.begin().await?;

        let owner: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if owner.is_none() {
            return Err(IdentityError::UserNotFound(user_id.to_string()));
        }

        let inserted = sqlx::query(
            "INSERT INTO auth_providers (id, user_id, provider, provider_user_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&identity_id)
        .bind(user_id)
        .bind(provider.as_str())
        .bind(provider_user_id)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(IdentityError::Conflict(format!(
                    "{} identity cannot be linked to this user",
                    provider
                )));
            }
            Err(e) if is_foreign_key_violation(&e) => {
                return Err(IdentityError::UserNotFound(user_id.to_string()));
            }
            Err(e) => {
                error!(error = %e, user_id = %user_id, "Database error linking identity");
                return Err(IdentityError::Database(e));
            }
        }

        let identity =
            sqlx::query_as::<_, ProviderIdentity>("SELECT * FROM auth_providers WHERE id = ?")
                .bind(&identity_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        info!(
            user_id = %user_id,
            provider = %provider,
            identity_id = %identity.id,
            "Provider identity linked"
        );

        Ok(identity)
    }
}
