//! Bearer tokens for the stream request.
//!
//! The session does not know how tokens are obtained or refreshed; it asks its
//! [`TokenSource`] on every (re)connect and sends whatever comes back.

use std::fmt;

pub trait TokenSource: Send + Sync {
    /// Current token, or `None` to connect anonymously.
    fn bearer_token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn closures_are_consulted_every_time() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let source = move || Some(format!("token-{}", counter.fetch_add(1, Ordering::SeqCst)));

        assert_eq!(source.bearer_token().as_deref(), Some("token-0"));
        assert_eq!(source.bearer_token().as_deref(), Some("token-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn static_token_is_not_printed() {
        let token = StaticToken::new("secret");
        assert_eq!(token.bearer_token().as_deref(), Some("secret"));
        assert_eq!(format!("{token:?}"), "StaticToken(***)");
    }
}
