use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::warn;

use agora_db::Database;
use agora_db::models::UserRow;
use agora_gateway::{AuthProvider, ConnectionManager, PostPipeline, RetentionPolicy};
use agora_types::UserId;
use agora_types::api::Claims;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub auth: Arc<dyn AuthProvider>,
    pub connections: ConnectionManager,
    pub pipeline: PostPipeline,
    /// Bounds what `recent` returns; eviction itself runs in the server.
    pub retention: RetentionPolicy,
    pub admin_user_id: UserId,
}

/// HS256 bearer tokens issued by the account service, with user rows
/// supplying reputation and display names.
pub struct JwtAuth {
    db: Arc<Database>,
    decoding_key: DecodingKey,
}

impl JwtAuth {
    pub fn new(db: Arc<Database>, secret: &str) -> Self {
        Self {
            db,
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    fn claims(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .ok()
    }

    fn user(&self, user_id: UserId) -> Option<UserRow> {
        match self.db.get_user(user_id) {
            Ok(user) => user,
            Err(e) => {
                warn!("User lookup for {} failed: {}", user_id, e);
                None
            }
        }
    }
}

impl AuthProvider for JwtAuth {
    fn validate(&self, token: &str) -> bool {
        self.claims(token).is_some()
    }

    fn user_id_of(&self, token: &str) -> Option<UserId> {
        self.claims(token)?.sub.parse().ok()
    }

    fn reputation_of(&self, user_id: UserId) -> i64 {
        self.user(user_id)
            .and_then(|user| user.reputation)
            .unwrap_or(0)
    }

    fn display_name_of(&self, user_id: UserId) -> String {
        let user = self.user(user_id);
        let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

        user.as_ref()
            .and_then(|u| non_empty(&u.nickname).or_else(|| non_empty(&u.name)))
            .unwrap_or_else(|| format!("user {}", user_id))
    }
}

/// Mint a token the way the account service does. Used for local tooling and tests.
pub fn issue_token(secret: &str, user_id: UserId, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn auth() -> JwtAuth {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_user(7, Some("Kim Minji"), Some("minji"), Some(640)).unwrap();
        db.upsert_user(8, Some("Lee Jun"), Some("  "), None).unwrap();
        JwtAuth::new(db, SECRET)
    }

    #[test]
    fn test_token_resolution() {
        let auth = auth();
        let token = issue_token(SECRET, 7, chrono::Duration::hours(1)).unwrap();
        assert!(auth.validate(&token));
        assert_eq!(auth.user_id_of(&token), Some(7));

        let forged = issue_token("other-secret", 7, chrono::Duration::hours(1)).unwrap();
        assert!(!auth.validate(&forged));
        assert_eq!(auth.user_id_of(&forged), None);

        let expired = issue_token(SECRET, 7, chrono::Duration::hours(-2)).unwrap();
        assert!(!auth.validate(&expired));
    }

    #[test]
    fn test_non_numeric_subject() {
        let auth = auth();
        let claims = Claims {
            sub: "not-a-number".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        assert!(auth.validate(&token));
        assert_eq!(auth.user_id_of(&token), None);
    }

    #[test]
    fn test_profile_lookups() {
        let auth = auth();
        assert_eq!(auth.reputation_of(7), 640);
        assert_eq!(auth.display_name_of(7), "minji");

        // Blank nickname falls back to the name, missing reputation to zero.
        assert_eq!(auth.reputation_of(8), 0);
        assert_eq!(auth.display_name_of(8), "Lee Jun");

        assert_eq!(auth.reputation_of(99), 0);
        assert_eq!(auth.display_name_of(99), "user 99");
    }
}
