//! chunk-relay — a deduplicating content-exchange toolkit's two hard cores.
//!
//! This crate provides two independent, composable components:
//!
//! - [`rope`] and [`split`]: an immutable rope of borrowed byte slices and a
//!   content-defined chunker (CDC) that cuts a rope into variable-length
//!   chunks at data-dependent boundaries, for stable deduplication under
//!   local insertions and deletions.
//!
//! - [`rpc`]: a bidirectional framed RPC engine that multiplexes requests,
//!   responses and notifications as line-delimited JSON-RPC v1 messages over
//!   an asynchronous byte transport.
//!
//! - [`transport`]: a thin accept-with-deadline / dial-with-timeout helper
//!   layer that hands TCP connections to a user callback. Not part of
//!   either core; provided so the engine can be wired up end to end.

pub mod rope;
pub mod rpc;
pub mod split;
pub mod transport;

pub use rope::Rope;
pub use split::Split;
