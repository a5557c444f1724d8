//! Session identity for one running engine instance.
//!
//! Every process that opens a graph gets a session identity: the user name
//! plus a random tag, joined as `user$tag`. The tag distinguishes multiple
//! sessions opened by the same user on the same shared backend. The identity
//! is created once at session start and injected into every operation that
//! needs it, rather than being re-read from ambient process state.

use rand::Rng;

/// Owner token meaning "nobody holds this node".
pub const FREE_OWNER: &str = "free";

/// Owner token mask used in graph snapshots so a restored snapshot can
/// never be edited as if it were live.
pub const LOCKED_MASK: &str = "*locked*";

/// Identity of one engine session.
///
/// # Examples
///
/// ```
/// use mangrove::session::SessionIdentity;
///
/// let session = SessionIdentity::new("rigger");
/// assert!(session.token().starts_with("rigger$"));
/// assert_eq!(session.user(), "rigger");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    user: String,
    token: String,
    endpoint: String,
}

impl SessionIdentity {
    /// Create a fresh identity for `user` with a random session tag.
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();
        let tag: u64 = rand::rng().random_range(0..10_000_000_000);
        let token = format!("{user}${tag}");
        Self {
            user,
            token,
            endpoint: String::new(),
        }
    }

    /// Rebuild an identity from an existing `user$tag` token.
    ///
    /// Used when a token round-trips through the backend and the session
    /// must keep comparing equal to its persisted owner fields.
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let user = token
            .split('$')
            .next()
            .unwrap_or(token.as_str())
            .to_string();
        Self {
            user,
            token,
            endpoint: String::new(),
        }
    }

    /// Advertise the `address:port` this session listens on for unlock
    /// requests. Empty if the session has no listener.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The bare user name, without the session tag.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The full `user$tag` token written into owner fields.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The advertised `address:port` endpoint, or empty.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
