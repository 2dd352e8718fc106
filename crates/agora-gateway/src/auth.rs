use std::sync::Arc;

use agora_types::UserId;

use crate::error::{GatewayError, Result};

/// Credential and reputation lookups owned by the account service.
pub trait AuthProvider: Send + Sync + 'static {
    fn validate(&self, token: &str) -> bool;

    fn user_id_of(&self, token: &str) -> Option<UserId>;

    /// Reputation of a user; 0 when the user is unknown.
    fn reputation_of(&self, user_id: UserId) -> i64;

    fn display_name_of(&self, user_id: UserId) -> String {
        format!("user {}", user_id)
    }
}

/// An authenticated caller, resolved once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
    pub reputation: i64,
}

/// Resolve a bearer credential. Blank, invalid and subject-less tokens are
/// all `Unauthenticated`.
pub fn identify(auth: &dyn AuthProvider, token: Option<&str>) -> Result<Identity> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(GatewayError::Unauthenticated)?;

    if !auth.validate(token) {
        return Err(GatewayError::Unauthenticated);
    }
    let user_id = auth.user_id_of(token).ok_or(GatewayError::Unauthenticated)?;

    Ok(Identity {
        user_id,
        display_name: auth.display_name_of(user_id),
        reputation: auth.reputation_of(user_id),
    })
}

/// `identify` off the async runtime; reputation lookups hit the database.
pub async fn resolve_identity(auth: Arc<dyn AuthProvider>, token: Option<String>) -> Result<Identity> {
    tokio::task::spawn_blocking(move || identify(auth.as_ref(), token.as_deref())).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticAuth;

    #[test]
    fn test_identify() {
        let auth = StaticAuth::new().user("tok-150", 9, 150);

        let identity = identify(&auth, Some("tok-150")).unwrap();
        assert_eq!(identity.user_id, 9);
        assert_eq!(identity.reputation, 150);
        assert_eq!(identity.display_name, "user 9");

        assert!(matches!(identify(&auth, None), Err(GatewayError::Unauthenticated)));
        assert!(matches!(identify(&auth, Some("  ")), Err(GatewayError::Unauthenticated)));
        assert!(matches!(identify(&auth, Some("forged")), Err(GatewayError::Unauthenticated)));
    }
}
