//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limit)
//!     → demux.rs (peek, classify against ordered matchers)
//!     → connection.rs (MuxedStream replays the peeked bytes)
//!     → MuxListener of the matched protocol
//!     → HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept: a permit is held for the whole connection lifetime
//! - Classification never blocks the accept loop
//! - Unclassifiable connections are closed, never guessed

pub mod connection;
pub mod demux;
pub mod listener;

pub use connection::{ConnectionId, MuxedStream};
pub use demux::{
    classify, AnyMatcher, Classification, Demultiplexer, Http1Matcher, Http2PrefaceMatcher,
    MatchOutcome, Matcher, MuxListener,
};
pub use listener::{ConnectionPermit, Listener, ListenerError};
