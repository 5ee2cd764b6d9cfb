use nanoid::nanoid;

use roomcast_core::models::Session;

/// Maps the upgrade request's cookie header to a session. Real
/// authentication happens out-of-band; the gateway only consumes the
/// resolved identity.
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, cookie: Option<&str>) -> Session;
}

/// Cookie name carrying the session token
pub const SESSION_COOKIE: &str = "roomcast_session";

/// Resolver that treats every connection as an unregistered guest. The
/// session token is taken from the cookie when present so reconnects keep
/// their identity; otherwise a fresh token is minted.
#[derive(Debug, Default)]
pub struct GuestSessions;

impl SessionResolver for GuestSessions {
    fn resolve(&self, cookie: Option<&str>) -> Session {
        let token = cookie
            .and_then(|header| {
                header.split(';').find_map(|pair| {
                    let (name, value) = pair.trim().split_once('=')?;
                    (name == SESSION_COOKIE && !value.is_empty())
                        .then(|| value.to_string())
                })
            })
            .unwrap_or_else(|| nanoid!(21));
        Session::unregistered(token, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_token_reused() {
        let resolver = GuestSessions;
        let session =
            resolver.resolve(Some("theme=dark; roomcast_session=tok123; lang=en"));
        assert_eq!(session.token_id, "tok123");
        assert!(session.user_id().is_none());
    }

    #[test]
    fn test_missing_cookie_mints_token() {
        let resolver = GuestSessions;
        let a = resolver.resolve(None);
        let b = resolver.resolve(None);
        assert_ne!(a.token_id, b.token_id);
        assert_eq!(a.token_id.len(), 21);
    }
}
