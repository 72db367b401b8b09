//! End-to-end session establishment tests.
//!
//! Both peers run in-process over a loopback transport pair, exercising the
//! full negotiation, authentication and termination flows.

use std::sync::Arc;
use std::time::Duration;

use lime::channel::{ClientChannel, ServerChannel};
use lime::config::ChannelConfig;
use lime::envelope::{
    Authentication, Document, Envelope, Message, Reason, SessionEncryption, SessionState,
};
use lime::error::LimeError;
use lime::session::{ClientSession, FnAuthenticator, GuestAuthenticator, ServerSession};
use lime::transport::{MemoryTransport, Transport};

fn server_session() -> ServerSession {
    ServerSession::new("server@example.org/instance".parse().unwrap())
}

fn guest_client() -> ClientSession {
    ClientSession::new(Authentication::Guest {})
        .with_from("alice@example.org/home".parse().unwrap())
}

async fn establish_pair(config: &ChannelConfig) -> (ClientChannel, ServerChannel) {
    let (client_end, server_end) = MemoryTransport::pair();
    let server = {
        let config = config.clone();
        tokio::spawn(async move {
            ServerChannel::establish(
                Arc::new(server_end),
                server_session(),
                &GuestAuthenticator,
                &config,
            )
            .await
        })
    };
    let client = ClientChannel::establish(Arc::new(client_end), guest_client(), config)
        .await
        .expect("client establishment");
    let server = server
        .await
        .expect("server task")
        .expect("server establishment");
    (client, server)
}

/// Both peers converge to Established with a shared, non-empty session id.
#[tokio::test]
async fn test_client_session_establishment() {
    let config = ChannelConfig::default();
    let (client, server) = establish_pair(&config).await;

    assert_eq!(client.state(), SessionState::Established);
    assert_eq!(server.state(), SessionState::Established);
    assert_eq!(client.session_id(), server.session_id());
    assert!(!client.session_id().is_nil());
    assert!(client.remote_node().is_some());
    assert_eq!(
        client.local_node().map(|node| node.identity()),
        Some("alice@example.org".parse().unwrap())
    );
}

/// Server advertising only TLS against a plaintext-only client fails the
/// session with code 31 on both ends.
#[tokio::test]
async fn test_negotiation_without_intersection_fails_with_code_31() {
    let (client_end, server_end) = MemoryTransport::pair();
    let config = ChannelConfig::default();

    let server = {
        let config = config.clone();
        tokio::spawn(async move {
            ServerChannel::establish(
                Arc::new(server_end),
                server_session().with_encryption_options(vec![SessionEncryption::Tls]),
                &GuestAuthenticator,
                &config,
            )
            .await
        })
    };

    let client = ClientChannel::establish(Arc::new(client_end), guest_client(), &config).await;
    assert!(matches!(client, Err(LimeError::Session(_))));

    match server.await.unwrap() {
        Err(LimeError::SessionFailed(reason)) => assert_eq!(reason.code, 31),
        other => panic!("expected SessionFailed(31), got {other:?}"),
    }
}

/// Rejected credentials surface the authentication reason to the client.
#[tokio::test]
async fn test_rejected_credentials_fail_with_code_13() {
    let (client_end, server_end) = MemoryTransport::pair();
    let config = ChannelConfig::default();

    let authenticator = FnAuthenticator(
        |_identity: &lime::envelope::Identity,
         _authentication: &Authentication|
         -> lime::Result<lime::envelope::Node> {
            Err(LimeError::Authentication("invalid credentials".to_string()))
        },
    );
    let server = {
        let config = config.clone();
        tokio::spawn(async move {
            ServerChannel::establish(
                Arc::new(server_end),
                server_session(),
                &authenticator,
                &config,
            )
            .await
        })
    };

    let client = ClientChannel::establish(Arc::new(client_end), guest_client(), &config).await;
    match client {
        Err(LimeError::SessionFailed(reason)) => assert_eq!(reason.code, 13),
        other => panic!("expected SessionFailed(13), got {other:?}"),
    }
    assert!(server.await.unwrap().is_err());
}

/// A silent peer trips the per-step deadline; the peer is told with a
/// `failed` envelope carrying code 12.
#[tokio::test(start_paused = true)]
async fn test_negotiation_step_timeout_fails_with_code_12() {
    let (client_end, server_end) = MemoryTransport::pair();
    let config = ChannelConfig::default().with_negotiation_timeout(Duration::from_secs(5));

    let silent_peer = Arc::new(server_end);
    let client = ClientChannel::establish(Arc::new(client_end), guest_client(), &config).await;
    assert!(matches!(client, Err(LimeError::Timeout(_))));

    // The peer first sees the client's `new`, then the timeout failure.
    let opening = silent_peer.receive().await.unwrap();
    assert!(matches!(
        opening,
        Envelope::Session(ref session) if session.state == SessionState::New
    ));
    match silent_peer.receive().await.unwrap() {
        Envelope::Session(session) => {
            assert_eq!(session.state, SessionState::Failed);
            assert_eq!(session.reason.unwrap().code, 12);
        }
        other => panic!("expected a session envelope, got {other:?}"),
    }
}

/// Envelopes flow both ways once established.
#[tokio::test]
async fn test_established_channel_exchanges_envelopes() {
    let config = ChannelConfig::default();
    let (client, server) = establish_pair(&config).await;

    let message = Message::with_id("bob@example.org".parse().unwrap(), Document::text("hi"));
    client.send_message(message.clone()).await.unwrap();
    let received = server.receive_message().await.unwrap();
    assert_eq!(received, message);

    let notification = lime::envelope::Notification::new(
        message.id.unwrap(),
        lime::envelope::NotificationEvent::Received,
    );
    server.send_notification(notification.clone()).await.unwrap();
    let received = client.receive_notification().await.unwrap();
    assert_eq!(received, notification);
}

/// The graceful finish handshake: after it, sends fail and pending
/// receives complete with `Closed`.
#[tokio::test]
async fn test_finish_closes_both_ends() {
    let config = ChannelConfig::default();
    let (client, server) = establish_pair(&config).await;
    let client = Arc::new(client);

    // A receive blocked before the finish must be unblocked with Closed.
    let blocked = {
        let client = client.clone();
        tokio::spawn(async move { client.receive_message().await })
    };

    let server_task = tokio::spawn(async move {
        server.receive_finishing_session().await?;
        server.send_finished_session().await?;
        Ok::<_, LimeError>(server)
    });

    client.finish().await.unwrap();
    let server = server_task.await.unwrap().unwrap();

    assert_eq!(client.state(), SessionState::Finished);
    assert_eq!(server.state(), SessionState::Finished);

    assert!(matches!(blocked.await.unwrap(), Err(LimeError::Closed)));

    let message = Message::new("bob@example.org".parse().unwrap(), Document::text("late"));
    assert!(matches!(
        client.send_message(message).await,
        Err(LimeError::Closed)
    ));
}

/// A session `failed` received while established closes the channel and
/// unblocks receivers.
#[tokio::test]
async fn test_remote_failure_unblocks_receivers() {
    let (client_end, server_end) = MemoryTransport::pair();
    let config = ChannelConfig::default();
    let server_end = Arc::new(server_end);

    let server = {
        let (config, server_end) = (config.clone(), server_end.clone());
        tokio::spawn(async move {
            ServerChannel::establish(server_end, server_session(), &GuestAuthenticator, &config)
                .await
        })
    };
    let client = ClientChannel::establish(Arc::new(client_end), guest_client(), &config)
        .await
        .unwrap();
    let _server = server.await.unwrap().unwrap();
    let client = Arc::new(client);

    let blocked = {
        let client = client.clone();
        tokio::spawn(async move { client.receive_command().await })
    };

    // Inject the failure from under the server channel.
    server_end
        .send(
            lime::envelope::Session::failed(Reason::new(11, "server going away")).into(),
        )
        .await
        .unwrap();

    assert!(matches!(blocked.await.unwrap(), Err(LimeError::Closed)));
    assert_eq!(client.state(), SessionState::Failed);
}
