//! # LIME - LIghtweight Messaging Engine
//!
//! Core of a LIME node: an asynchronous, envelope-oriented messaging
//! protocol for real-time conversational systems.
//!
//! ## Protocol Overview
//!
//! Two peers exchange four kinds of envelopes over a negotiated session:
//!
//! ```text
//! Client                          Server
//!    |                               |
//!    |------ session: new --------->|  negotiate encryption/compression,
//!    |<----- session: negotiating --|  authenticate, establish
//!    |          ...                  |
//!    |<----- session: established --|
//!    |                               |
//!    |====== message/notification ==|  typed envelope exchange
//!    |====== command ===============|
//!    |                               |
//!    |------ session: finishing --->|  graceful termination
//!    |<----- session: finished -----|
//! ```
//!
//! ## Envelope Kinds
//!
//! | Kind         | Discriminator | Purpose                               |
//! |--------------|---------------|---------------------------------------|
//! | Message      | `content`     | Deliver a document to a node          |
//! | Notification | `event`       | Report the fate of a sent message     |
//! | Command      | `method`      | CRUD-style resource operation         |
//! | Session      | `state`       | Negotiation and termination           |
//!
//! ## Quick Start
//!
//! ### Loopback session
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lime::channel::{ClientChannel, ServerChannel};
//! use lime::config::ChannelConfig;
//! use lime::envelope::{Authentication, Document, Message};
//! use lime::session::{ClientSession, GuestAuthenticator, ServerSession};
//! use lime::transport::MemoryTransport;
//!
//! let (client_end, server_end) = MemoryTransport::pair();
//! let config = ChannelConfig::default();
//!
//! let server = tokio::spawn(ServerChannel::establish(
//!     Arc::new(server_end),
//!     ServerSession::new("server@example.org/instance".parse()?),
//!     &GuestAuthenticator,
//!     &config,
//! ));
//! let client = ClientChannel::establish(
//!     Arc::new(client_end),
//!     ClientSession::new(Authentication::Guest {})
//!         .with_from("alice@example.org/home".parse()?),
//!     &config,
//! )
//! .await?;
//!
//! client
//!     .send_message(Message::new("bob@example.org".parse()?, Document::text("hi")))
//!     .await?;
//! ```
//!
//! ### HTTP emulation
//!
//! ```rust,ignore
//! use lime::config::ListenerConfig;
//! use lime::http::HttpTransportListener;
//!
//! let listener = HttpTransportListener::new(ListenerConfig::default());
//! let router = listener.router();
//! // Serve `router` with the host's HTTP stack; drain
//! // `listener.accept_transport()` and establish a ServerChannel over
//! // each accepted transport.
//! ```
//!
//! ## Modules
//!
//! - [`envelope`]: the four-envelope data model and addressing primitives
//! - [`transport`]: duplex envelope carriers
//! - [`session`]: client/server negotiation state machines
//! - [`channel`]: typed envelope multiplexing over a session
//! - [`http`]: HTTP request/response emulation of the push protocol
//! - [`storage`]: per-identity storage of undelivered envelopes
//! - [`config`]: TOML + environment configuration
//! - [`error`]: error types and result alias

pub mod channel;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod session;
pub mod storage;
pub mod transport;

// Re-exports for convenience
pub use channel::{Channel, ChannelListener, ClientChannel, OnDemandClientChannel, ServerChannel};
pub use config::{ChannelConfig, LimeConfig, ListenerConfig};
pub use envelope::{
    Command, Document, Envelope, Identity, MediaType, Message, Node, Notification, Reason,
    Session, SessionState,
};
pub use error::{LimeError, Result};
pub use http::HttpTransportListener;
pub use session::{Authenticator, ClientSession, GuestAuthenticator, ServerSession};
pub use storage::{EnvelopeStorage, InMemoryEnvelopeStorage};
pub use transport::{MemoryTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// LIME protocol version
pub const PROTOCOL_VERSION: &str = "0.9";
