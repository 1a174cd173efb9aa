//! # Drawing-and-guessing game server
//!
//! Authoritative server for a turn-based, real-time drawing-and-guessing
//! match over a newline-delimited TCP text protocol. One player draws, the
//! others guess; correct guesses score points, a countdown drives hint
//! reveals and round termination, and the drawer role rotates until every
//! player has drawn their share.
//!
//! ## Architecture
//!
//! Each accepted socket gets its own read loop plus a dedicated writer task
//! draining a per-connection FIFO channel, so producers never block on
//! network I/O and per-client message order is guaranteed. All match state
//! is owned by the orchestrator in [`game`] behind a single lock that is
//! released before any line is sent. A single countdown task per round
//! ([`timer`]) feeds events back into the orchestrator, and cancellation
//! waits out the in-flight tick so round N+1 can start the moment round N
//! ends.
//!
//! ## Module organization
//!
//! - [`lexicon`]: the word list and random not-yet-used selection
//! - [`player`]: identity and cumulative score
//! - [`timer`]: the cancellable per-round countdown
//! - [`connection`]: per-client read loop, send path and teardown
//! - [`game`]: the round state machine, scoring and guess verification
//! - [`network`]: accept loop, connection registry and pre-game countdown
//!
//! The wire protocol lives in the `shared` crate so test clients speak the
//! exact same lines.

pub mod connection;
pub mod game;
pub mod lexicon;
pub mod network;
pub mod player;
pub mod timer;
