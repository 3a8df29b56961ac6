//! Access to the local capture devices.

use std::rc::Rc;

use async_trait::async_trait;
use derive_more::Display;

use crate::media::MediaStreamConstraints;

use super::MediaTrack;

/// Errors of a [`MediaDevices::get_user_media()`] call.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum GetUserMediaError {
    /// User or platform policy denied access to the devices.
    #[display(fmt = "permission to use media devices was denied")]
    PermissionDenied,

    /// No device satisfies the requested constraints.
    #[display(fmt = "no matching device found: {}", _0)]
    NotFound(String),

    /// Device exists but cannot be opened, usually because another
    /// application holds it.
    #[display(fmt = "device cannot be read: {}", _0)]
    NotReadable(String),

    /// Any other platform failure.
    #[display(fmt = "{}", _0)]
    Other(String),
}

/// Capture API of the platform (`navigator.mediaDevices`).
#[async_trait(?Send)]
pub trait MediaDevices {
    /// Prompts for and opens the devices satisfying the provided
    /// [`MediaStreamConstraints`], returning one track per requested kind.
    async fn get_user_media(
        &self,
        constraints: MediaStreamConstraints,
    ) -> Result<Vec<Rc<dyn MediaTrack>>, GetUserMediaError>;
}
