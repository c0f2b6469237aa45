use crate::auth::AuthInfo;
use crate::session::{Session, SessionId};

/// What a route sees while handling one message.
#[derive(Debug)]
pub struct RequestContext {
    /// The caller's session, loaded for the duration of the exchange.
    /// Routes may mutate it; the transport saves it afterwards.
    pub session: Session,
    /// Identity attached by the authorization layer, if any.
    pub auth: Option<AuthInfo>,
}

impl RequestContext {
    pub fn new(session: Session, auth: Option<AuthInfo>) -> Self {
        Self { session, auth }
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }
}
