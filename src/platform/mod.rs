//! Platform boundary of the library.
//!
//! Everything the room orchestrates but does not implement itself (the
//! realtime transport, device capture and the WebRTC stack) is described by
//! the traits of this module and provided by the embedding application.

pub mod media_devices;
pub mod media_track;
pub mod peer_connection;
pub mod transport;

use std::{future::Future, time::Duration};

#[doc(inline)]
pub use self::{
    media_devices::{GetUserMediaError, MediaDevices},
    media_track::{MediaKind, MediaTrack},
    peer_connection::{
        RtcPeerConnection, RtcPeerConnectionError, RtcPeerConnectionFactory,
        RtcPeerEvent, SdpType,
    },
    transport::{RpcTransport, TransportError},
};

#[cfg(any(test, feature = "mockable"))]
pub use self::media_track::MockMediaTrack;

/// Spawns the provided [`Future`] on the current thread.
///
/// # Panics
///
/// If called outside of a [`tokio::task::LocalSet`] context.
#[inline]
pub fn spawn<F>(task: F)
where
    F: Future<Output = ()> + 'static,
{
    drop(tokio::task::spawn_local(task));
}

/// [`Future`] which resolves after the provided [`Duration`].
#[inline]
pub async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await;
}
