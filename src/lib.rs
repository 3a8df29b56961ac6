//! Client side of peer-to-peer video rooms.
//!
//! A [`Room`] joins a room via the signalling server, acquires local media
//! and maintains a [`PeerConnection`] with every other participant.
//!
//! [`PeerConnection`]: peer::PeerConnection

#![deny(
    broken_intra_doc_links,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts
)]
#![forbid(unsafe_code)]
#![warn(
    deprecated_in_future,
    missing_copy_implementations,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

#[macro_use]
mod utils;

pub mod conf;
pub mod log;
pub mod media;
pub mod peer;
pub mod platform;
pub mod room;
pub mod rpc;

#[doc(inline)]
pub use playroom_signalling_proto as proto;

#[doc(inline)]
pub use self::{
    conf::Conf,
    room::{Room, RoomError, RoomSnapshot, SessionState},
    rpc::SignallingChannel,
};
