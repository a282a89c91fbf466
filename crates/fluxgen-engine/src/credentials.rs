use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::GenerationError;

/// Provider API token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}

/// Holds the token for exactly one invocation at a time.
///
/// [`CredentialScope::acquire`] locks the slot and stores the token; the
/// returned guard clears the slot when it is dropped, on every exit path.
/// A second `acquire` on the same scope blocks until the first guard is
/// gone, so invocations sharing a scope are serialised.
#[derive(Debug, Default)]
pub struct CredentialScope {
    slot: Mutex<Option<ApiToken>>,
}

impl CredentialScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, raw_token: &str) -> Result<CredentialGuard<'_>, GenerationError> {
        let token = ApiToken::new(raw_token).ok_or(GenerationError::TokenMissing)?;
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(token.clone());
        Ok(CredentialGuard { slot, token })
    }

    /// True when no invocation currently holds a token.
    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

pub struct CredentialGuard<'a> {
    slot: MutexGuard<'a, Option<ApiToken>>,
    token: ApiToken,
}

impl CredentialGuard<'_> {
    pub fn token(&self) -> &ApiToken {
        &self.token
    }

    /// Clears the token now instead of at end of scope.
    pub fn release(self) {}
}

impl Drop for CredentialGuard<'_> {
    fn drop(&mut self) {
        *self.slot = None;
    }
}

impl fmt::Debug for CredentialGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialGuard")
            .field("held", &self.slot.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiToken, CredentialScope};
    use crate::error::GenerationError;

    #[test]
    fn blank_token_is_rejected_and_nothing_is_stored() {
        let scope = CredentialScope::new();
        let err = scope.acquire("   ").err();
        assert!(matches!(err, Some(GenerationError::TokenMissing)));
        assert!(scope.is_empty());
    }

    #[test]
    fn guard_clears_token_on_drop() {
        let scope = CredentialScope::new();
        {
            let guard = scope.acquire(" r8_secret ").ok();
            let token = guard.as_ref().map(|guard| guard.token().expose().to_string());
            assert_eq!(token.as_deref(), Some("r8_secret"));
        }
        assert!(scope.is_empty());
    }

    #[test]
    fn explicit_release_clears_token() {
        let scope = CredentialScope::new();
        if let Ok(guard) = scope.acquire("r8_secret") {
            guard.release();
        }
        assert!(scope.is_empty());
    }

    #[test]
    fn token_is_cleared_when_the_holder_panics() {
        let scope = CredentialScope::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = scope.acquire("r8_secret");
            panic!("provider blew up");
        }));
        assert!(result.is_err());
        assert!(scope.is_empty());
    }

    #[test]
    fn debug_output_redacts_the_secret() {
        let token = ApiToken::new("r8_secret");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("r8_secret"));
    }
}
