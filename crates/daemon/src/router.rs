//! Message router for dispatching requests to their handlers.
//!
//! This module provides the [`Router`] that turns one received request into
//! exactly one response. Every message type is looked up in a fixed routing
//! table ([`route`]) giving the permission it requires and the operation that
//! serves it. Types without an entry are answered with `ACCESS_DENIED`
//! whatever the session state.
//!
//! The session is passed in by value and handed back with the response, so
//! `LOGIN` and `LOGOUT` are the only places it changes.

use std::sync::Arc;

use protocol::{Credentials, Message, MessageType, ProtocolError};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, Permission, UserStore};
use crate::files::FileStore;
use crate::handlers::Handlers;
use crate::session::Session;

/// Operation serving a routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Login,
    Logout,
    Download,
    Upload,
    Delete,
    Rename,
}

/// Routing table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Permission the session must hold (or `ROOT`). `None` for operations
    /// that only depend on the authentication state.
    pub required: Option<Permission>,
    pub operation: Operation,
}

/// Look up the routing table entry for a message type.
///
/// Response types have no entry.
pub fn route(message_type: MessageType) -> Option<Route> {
    let (required, operation) = match message_type {
        MessageType::Login => (None, Operation::Login),
        MessageType::Logout => (None, Operation::Logout),
        MessageType::DownloadFile => (Some(Permission::DownloadFile), Operation::Download),
        MessageType::UploadFile => (Some(Permission::UploadFile), Operation::Upload),
        MessageType::DeleteFile => (Some(Permission::DeleteFile), Operation::Delete),
        MessageType::RenameFile => (Some(Permission::RenameFile), Operation::Rename),
        MessageType::Ok | MessageType::Error | MessageType::AccessDenied => return None,
    };
    Some(Route {
        required,
        operation,
    })
}

/// Authorization failures. All of them are answered with `ACCESS_DENIED`
/// and leave the connection open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("Login required")]
    NotLoggedIn,

    #[error("You are not allowed to request such an action!")]
    AccessDenied(MessageType),

    #[error("{0} is not a request")]
    NotARequest(MessageType),

    #[error("invalid credentials")]
    InvalidCredentials,
}

impl RouterError {
    /// Convert the error to an `ACCESS_DENIED` response.
    pub fn to_message(&self) -> Message {
        Message::access_denied(self.to_string())
    }
}

/// Outcome of one dispatch: the next session state and the response to send.
#[derive(Debug)]
pub struct Dispatched {
    pub session: Session,
    pub response: Message,
}

impl Dispatched {
    fn respond(session: Session, response: Message) -> Self {
        Self { session, response }
    }

    fn deny(session: Session, error: RouterError) -> Self {
        info!(user = session.log_name(), reason = %error, "Request denied");
        Self {
            response: error.to_message(),
            session,
        }
    }
}

/// Routes requests to the file handlers and the user store.
pub struct Router<F, U> {
    handlers: Handlers<F>,
    users: Arc<U>,
}

impl<F: FileStore, U: UserStore> Router<F, U> {
    pub fn new(files: Arc<F>, users: Arc<U>) -> Self {
        Self {
            handlers: Handlers::new(files),
            users,
        }
    }

    /// Dispatch one request.
    ///
    /// Returns `Err` only for malformed payloads, which end the connection.
    pub async fn dispatch(
        &self,
        session: Session,
        message: Message,
    ) -> Result<Dispatched, ProtocolError> {
        let message_type = message.message_type;
        debug!(
            user = session.log_name(),
            message_type = %message_type,
            size = message.len(),
            "Dispatching"
        );

        let Some(route) = route(message_type) else {
            return Ok(Dispatched::deny(
                session,
                RouterError::NotARequest(message_type),
            ));
        };

        if route.operation != Operation::Login {
            if let Err(e) = authorize(&session, message_type, &route) {
                return Ok(Dispatched::deny(session, e));
            }
        }

        let response = match route.operation {
            Operation::Login => return Ok(self.login(session, message.payload()).await),
            Operation::Logout => {
                info!(user = session.log_name(), "Logout");
                return Ok(Dispatched::respond(Session::Unauthenticated, Message::ok()));
            }
            Operation::Download => {
                self.handlers
                    .download(&session, message.payload())
                    .await?
            }
            Operation::Upload => {
                self.handlers
                    .upload(&session, message.into_payload())
                    .await?
            }
            Operation::Delete => self.handlers.delete(&session, message.payload()).await?,
            Operation::Rename => self.handlers.rename(&session, message.payload()).await?,
        };

        Ok(Dispatched::respond(session, response))
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// A failed login keeps whatever session was in place.
    async fn login(&self, session: Session, payload: &[u8]) -> Dispatched {
        let credentials = match Credentials::decode(payload) {
            Ok(credentials) => credentials,
            Err(e) => {
                debug!(error = %e, "Unparsable credentials");
                return Dispatched::deny(session, RouterError::InvalidCredentials);
            }
        };

        match self.users.authenticate(&credentials).await {
            Ok(user) => {
                info!(
                    user = %user.username,
                    permissions = %user.permissions,
                    previous = session.log_name(),
                    "Login"
                );
                Dispatched::respond(Session::from(user), Message::ok())
            }
            Err(AuthError::InvalidCredentials) => {
                info!(user = %credentials.username, "Login failed");
                Dispatched::deny(session, RouterError::InvalidCredentials)
            }
            Err(e @ AuthError::Unavailable(_)) => {
                warn!(error = %e, "Login could not be checked");
                Dispatched::respond(session, Message::error(e.to_string()))
            }
        }
    }
}

fn authorize(session: &Session, message_type: MessageType, route: &Route) -> Result<(), RouterError> {
    if !session.is_authenticated() {
        return Err(RouterError::NotLoggedIn);
    }
    match route.required {
        Some(permission) if !session.allows(permission) => {
            Err(RouterError::AccessDenied(message_type))
        }
        _ => Ok(()),
    }
}
