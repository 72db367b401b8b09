//! Session negotiation state machines.
//!
//! Establishing a LIME session walks both peers through a fixed sequence of
//! session envelopes:
//!
//! ```text
//! Client                                  Server
//!    |                                       |
//!    |-- new ------------------------------->|  introduce
//!    |<- negotiating (options) --------------|
//!    |-- negotiating (choice) -------------->|  agree on encryption/compression
//!    |<- authenticating (scheme options) ----|
//!    |-- authenticating (scheme, creds) ---->|  present credentials
//!    |<- established (id, from) ------------ |  or failed (reason)
//!    |                                       |
//!    |-- finishing ------------------------->|  graceful termination
//!    |<- finished ---------------------------|
//! ```
//!
//! | State            | Description                         | Transitions                  |
//! |------------------|-------------------------------------|------------------------------|
//! | `New`            | Client introduced itself            | → Negotiating                |
//! | `Negotiating`    | Agreeing on transport options       | → Authenticating, Failed     |
//! | `Authenticating` | Credentials under validation        | → Established, Failed        |
//! | `Established`    | Envelopes flow                      | → Finishing, Finished, Failed|
//! | `Finishing`      | Graceful termination requested      | → Finished                   |
//! | `Finished`       | Terminated gracefully               | (terminal)                   |
//! | `Failed`         | Terminated with an error            | (terminal)                   |
//!
//! The machines here are pure: they consume and produce [`Session`]
//! envelopes and never touch a transport. The channel layer drives them and
//! enforces the per-step deadline (failure code 12 on expiry). The tie-break
//! for negotiation options is the first entry of the server's advertised
//! list that the other peer supports; an empty intersection fails the
//! session with code 31.

mod client;
mod server;

pub use client::ClientSession;
pub use server::ServerSession;

use async_trait::async_trait;

use crate::envelope::{Authentication, AuthenticationScheme, Identity, Node, Session};
use crate::error::{LimeError, Result};

/// Default deadline for each negotiation step, in seconds
pub const NEGOTIATION_TIMEOUT_SECS: u64 = 60;

/// First entry of `advertised` that `supported` also contains.
pub(crate) fn first_supported<T: PartialEq + Copy>(advertised: &[T], supported: &[T]) -> Option<T> {
    advertised.iter().copied().find(|option| supported.contains(option))
}

/// Validates credentials presented during the `authenticating` round.
///
/// Returning `Ok(node)` accepts the session and assigns the client its
/// fully qualified node; any error rejects it.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        identity: &Identity,
        authentication: &Authentication,
    ) -> Result<Node>;
}

/// Accepts any identity presenting the guest scheme.
pub struct GuestAuthenticator;

#[async_trait]
impl Authenticator for GuestAuthenticator {
    async fn authenticate(
        &self,
        identity: &Identity,
        authentication: &Authentication,
    ) -> Result<Node> {
        match authentication.scheme() {
            AuthenticationScheme::Guest => Ok(identity
                .clone()
                .with_instance(uuid::Uuid::new_v4().to_string())),
            scheme => Err(LimeError::Authentication(format!(
                "Guest authenticator rejects scheme {scheme:?}"
            ))),
        }
    }
}

/// Adapts a closure into an [`Authenticator`].
pub struct FnAuthenticator<F>(pub F);

#[async_trait]
impl<F> Authenticator for FnAuthenticator<F>
where
    F: Fn(&Identity, &Authentication) -> Result<Node> + Send + Sync,
{
    async fn authenticate(
        &self,
        identity: &Identity,
        authentication: &Authentication,
    ) -> Result<Node> {
        (self.0)(identity, authentication)
    }
}

/// Reject an envelope that arrived in a state where it is not valid.
pub(crate) fn unexpected_session(expected: &str, session: &Session) -> LimeError {
    LimeError::Protocol(format!(
        "Expected session state {expected}, received {:?}",
        session.state
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::SessionEncryption;

    #[test]
    fn test_first_supported_uses_advertised_order() {
        let advertised = [SessionEncryption::Tls, SessionEncryption::None];
        let supported = [SessionEncryption::None, SessionEncryption::Tls];
        assert_eq!(
            first_supported(&advertised, &supported),
            Some(SessionEncryption::Tls)
        );
    }

    #[test]
    fn test_first_supported_empty_intersection() {
        let advertised = [SessionEncryption::Tls];
        let supported = [SessionEncryption::None];
        assert_eq!(first_supported(&advertised, &supported), None);
    }

    #[tokio::test]
    async fn test_guest_authenticator() {
        let identity: Identity = "anon@example.org".parse().unwrap();

        let node = GuestAuthenticator
            .authenticate(&identity, &Authentication::Guest {})
            .await
            .unwrap();
        assert_eq!(node.identity(), identity);
        assert!(node.instance.is_some());

        let rejected = GuestAuthenticator
            .authenticate(
                &identity,
                &Authentication::Plain {
                    password: "x".to_string(),
                },
            )
            .await;
        assert!(matches!(rejected, Err(LimeError::Authentication(_))));
    }
}
