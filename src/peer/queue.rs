//! Sequential execution of the operations on a [`PeerConnection`].

use std::rc::Rc;

use derive_more::{Display, From};
use futures::{channel::mpsc, StreamExt as _};
use playroom_signalling_proto::{
    Command, IceCandidate, OutgoingSignal, Signal,
};
use tracerr::Traced;

use crate::{
    media::LocalMediaStream,
    platform::SdpType,
    rpc::{SignallingChannel, SignallingError},
    utils::{spawn_abortable, TaskHandle},
};

use super::{NegotiationError, PeerConnection, PeerEvent};

/// Operation on a [`PeerConnection`].
#[derive(Debug)]
pub enum PeerTask {
    /// Create an offer and send it to the `Peer`.
    MakeOffer,

    /// Apply the remote offer and send the answer back.
    HandleOffer(String),

    /// Apply the remote answer.
    HandleAnswer(String),

    /// Apply (or buffer) a remote ICE candidate.
    AddIceCandidate(IceCandidate),

    /// Relay a local ICE candidate to the `Peer`.
    SendIceCandidate(IceCandidate),

    /// Switch outgoing tracks to the provided stream, renegotiating if
    /// needed.
    UpdateLocalTracks(Rc<LocalMediaStream>),
}

/// Errors of a [`PeerTask`].
#[derive(Clone, Debug, Display, Eq, From, PartialEq)]
pub enum PeerTaskError {
    /// [`PeerConnection`] operation failed.
    #[display(fmt = "{}", _0)]
    Negotiation(NegotiationError),

    /// Result cannot be relayed to the `Peer`.
    #[display(fmt = "{}", _0)]
    Signalling(SignallingError),
}

type Result<T> = std::result::Result<T, Traced<PeerTaskError>>;

/// Queue of [`PeerTask`]s executed one by one in push order by a dedicated
/// worker.
///
/// The worker stops on the first failure, reporting it as
/// [`PeerEvent::TaskFailed`], and is aborted when the [`TaskQueue`] is
/// dropped.
#[derive(Debug)]
pub struct TaskQueue {
    tasks: mpsc::UnboundedSender<PeerTask>,
    _worker: TaskHandle,
}

impl TaskQueue {
    /// Spawns a worker executing [`PeerTask`]s on the provided
    /// [`PeerConnection`].
    #[must_use]
    pub fn spawn(
        peer: Rc<PeerConnection>,
        channel: Rc<SignallingChannel>,
        peer_events_sender: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        let (tasks, mut rx) = mpsc::unbounded();
        let worker = spawn_abortable(async move {
            while let Some(task) = rx.next().await {
                let err = match execute(&peer, &channel, task).await {
                    Ok(()) => continue,
                    Err(e) => e,
                };
                if peer.is_closed() {
                    log::debug!(
                        "Discarding failure of closed PeerConnection `{}` #{}: \
                         {}",
                        peer.id(),
                        peer.epoch(),
                        err,
                    );
                    break;
                }
                log::error!(
                    "PeerConnection `{}` #{} task failed: {}",
                    peer.id(),
                    peer.epoch(),
                    err,
                );
                let _ = peer_events_sender.unbounded_send(
                    PeerEvent::TaskFailed {
                        peer_id: peer.id().clone(),
                        epoch: peer.epoch(),
                        error: err.into_inner(),
                    },
                );
                break;
            }
        });
        Self {
            tasks,
            _worker: worker,
        }
    }

    /// Enqueues the provided [`PeerTask`].
    pub fn push(&self, task: PeerTask) {
        if let Err(e) = self.tasks.unbounded_send(task) {
            log::debug!("Worker is gone, dropping {:?}", e.into_inner());
        }
    }
}

async fn execute(
    peer: &PeerConnection,
    channel: &SignallingChannel,
    task: PeerTask,
) -> Result<()> {
    match task {
        PeerTask::MakeOffer => make_offer(peer, channel).await?,
        PeerTask::HandleOffer(offer) => {
            let answer = peer
                .create_answer(offer)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> PeerTaskError))?;
            relay(peer, channel, Signal::Answer(answer))?;
        }
        PeerTask::HandleAnswer(answer) => peer
            .apply_remote_description(SdpType::Answer(answer))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> PeerTaskError))?,
        PeerTask::AddIceCandidate(candidate) => peer
            .add_ice_candidate(candidate)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> PeerTaskError))?,
        PeerTask::SendIceCandidate(candidate) => {
            relay(peer, channel, Signal::Candidate(candidate))?;
        }
        PeerTask::UpdateLocalTracks(stream) => {
            let renegotiate = peer
                .update_local_tracks(&stream)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> PeerTaskError))?;
            if renegotiate {
                make_offer(peer, channel).await?;
            }
        }
    }
    Ok(())
}

async fn make_offer(
    peer: &PeerConnection,
    channel: &SignallingChannel,
) -> Result<()> {
    let offer = peer
        .create_offer()
        .await
        .map_err(tracerr::map_from_and_wrap!(=> PeerTaskError))?;
    relay(peer, channel, Signal::Offer(offer))
}

/// Sends the provided [`Signal`] to the `Peer` of the [`PeerConnection`].
fn relay(
    peer: &PeerConnection,
    channel: &SignallingChannel,
    signal: Signal,
) -> Result<()> {
    channel
        .send(&Command::Signal(OutgoingSignal {
            to_peer_id: peer.id().clone(),
            signal,
        }))
        .map_err(tracerr::map_from_and_wrap!())
}
