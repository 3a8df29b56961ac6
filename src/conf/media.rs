//! Local media capturing settings.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::media::{
    AudioTrackConstraints, MediaStreamConstraints, VideoTrackConstraints,
};

/// Local media capturing settings, used as the [`MediaStreamConstraints`] of
/// joining a `Room`.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Media {
    /// Whether to capture the microphone.
    ///
    /// Defaults to `true`.
    #[default = true]
    pub audio: bool,

    /// Whether to capture the camera.
    ///
    /// Defaults to `true`.
    #[default = true]
    pub video: bool,

    /// ID of the microphone to capture. Any if not set.
    pub audio_device_id: Option<String>,

    /// ID of the camera to capture. Any if not set.
    pub video_device_id: Option<String>,

    /// Ideal video width, in pixels.
    ///
    /// Defaults to `1280`.
    #[default = 1280]
    pub width: u32,

    /// Ideal video height, in pixels.
    ///
    /// Defaults to `720`.
    #[default = 720]
    pub height: u32,
}

impl Media {
    /// Builds [`MediaStreamConstraints`] out of these settings.
    #[must_use]
    pub fn constraints(&self) -> MediaStreamConstraints {
        let mut constraints = MediaStreamConstraints::new();
        if self.audio {
            let mut audio = AudioTrackConstraints::new();
            if let Some(id) = &self.audio_device_id {
                audio = audio.device_id(id.clone());
            }
            constraints = constraints.audio(audio);
        }
        if self.video {
            let mut video =
                VideoTrackConstraints::new().resolution(self.width, self.height);
            if let Some(id) = &self.video_device_id {
                video = video.device_id(id.clone());
            }
            constraints = constraints.video(video);
        }
        constraints
    }
}
