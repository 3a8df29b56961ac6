use std::rc::Rc;

use futures::{channel::mpsc, StreamExt as _};
use playroom::{
    media::LocalMediaStream,
    peer::{
        Epoch, NegotiationError, NegotiationState, PeerConnection, PeerEvent,
        Role, SignallingState,
    },
    platform::{MediaKind, MediaTrack, RtcPeerConnectionError, SdpType},
    proto::{IceServer, PeerConnectionState},
};
use tokio::task::LocalSet;

use crate::utils::{
    candidate, peer_id, settle, Call, FakeFactory, FakePeerConnection,
    FakeTrack,
};

struct TestPeer {
    peer: Rc<PeerConnection>,
    backend: Rc<FakePeerConnection>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
}

fn new_peer(role: Role, stream: Option<&LocalMediaStream>) -> TestPeer {
    let factory = FakeFactory::new();
    let (tx, events) = mpsc::unbounded();
    let peer = PeerConnection::new(
        peer_id("bob"),
        Epoch(7),
        role,
        &[],
        stream,
        &*factory,
        tx,
    )
    .unwrap();
    TestPeer {
        peer,
        backend: factory.last(),
        events,
    }
}

#[tokio::test]
async fn buffers_candidates_until_remote_description() {
    LocalSet::new()
        .run_until(async {
            let TestPeer { peer, backend, .. } =
                new_peer(Role::Responder, None);

            peer.add_ice_candidate(candidate(1)).await.unwrap();
            peer.add_ice_candidate(candidate(2)).await.unwrap();
            assert_eq!(peer.buffered_candidates_count(), 2);
            assert!(backend.calls().is_empty());

            let answer = peer.create_answer("v=0".into()).await.unwrap();
            assert_eq!(answer, "answer-0");
            assert_eq!(
                backend.calls(),
                vec![
                    Call::SetRemoteDescription(SdpType::Offer("v=0".into())),
                    Call::AddIceCandidate(candidate(1)),
                    Call::AddIceCandidate(candidate(2)),
                    Call::CreateAnswer,
                ],
            );
            assert_eq!(peer.buffered_candidates_count(), 0);
            assert_eq!(peer.state(), NegotiationState::Answering);
            assert_eq!(peer.signalling_state(), SignallingState::Stable);

            peer.add_ice_candidate(candidate(3)).await.unwrap();
            assert_eq!(
                backend.calls().last(),
                Some(&Call::AddIceCandidate(candidate(3))),
            );
        })
        .await;
}

#[tokio::test]
async fn rejects_answer_without_offer() {
    LocalSet::new()
        .run_until(async {
            let TestPeer { peer, backend, .. } =
                new_peer(Role::Responder, None);

            let err = peer
                .apply_remote_description(SdpType::Answer("v=0".into()))
                .await
                .unwrap_err()
                .into_inner();

            assert_eq!(
                err,
                NegotiationError::UnexpectedDescription {
                    kind: "answer",
                    state: SignallingState::Stable,
                },
            );
            assert!(backend.calls().is_empty());
        })
        .await;
}

#[tokio::test]
async fn allows_single_pending_offer() {
    LocalSet::new()
        .run_until(async {
            let TestPeer { peer, .. } = new_peer(Role::Initiator, None);

            assert_eq!(peer.create_offer().await.unwrap(), "offer-0");
            assert_eq!(peer.state(), NegotiationState::Offering);
            assert_eq!(
                peer.signalling_state(),
                SignallingState::HaveLocalOffer,
            );

            let err = peer.create_offer().await.unwrap_err().into_inner();
            assert_eq!(
                err,
                NegotiationError::OfferNotAllowed(
                    SignallingState::HaveLocalOffer,
                ),
            );

            let err = peer
                .apply_remote_description(SdpType::Offer("v=0".into()))
                .await
                .unwrap_err()
                .into_inner();
            assert_eq!(
                err,
                NegotiationError::UnexpectedDescription {
                    kind: "offer",
                    state: SignallingState::HaveLocalOffer,
                },
            );
        })
        .await;
}

#[tokio::test]
async fn connects_and_recovers_from_disconnect() {
    LocalSet::new()
        .run_until(async {
            let TestPeer { peer, .. } = new_peer(Role::Initiator, None);
            let states = peer.on_state_change();
            let _ = peer.create_offer().await.unwrap();
            peer.apply_remote_description(SdpType::Answer("v=0".into()))
                .await
                .unwrap();
            assert_eq!(peer.signalling_state(), SignallingState::Stable);

            assert_eq!(
                peer.handle_connection_state(PeerConnectionState::Connected),
                Some(NegotiationState::Connected),
            );
            assert_eq!(
                peer.handle_connection_state(
                    PeerConnectionState::Disconnected
                ),
                Some(NegotiationState::Disconnected),
            );
            assert_eq!(
                peer.handle_connection_state(PeerConnectionState::Connected),
                Some(NegotiationState::Connected),
            );
            assert_eq!(
                peer.handle_connection_state(PeerConnectionState::Connected),
                None,
            );

            assert_eq!(
                states.take(5).collect::<Vec<_>>().await,
                vec![
                    NegotiationState::New,
                    NegotiationState::Offering,
                    NegotiationState::Connected,
                    NegotiationState::Disconnected,
                    NegotiationState::Connected,
                ],
            );
        })
        .await;
}

#[tokio::test]
async fn treats_backend_close_as_failure() {
    LocalSet::new()
        .run_until(async {
            let TestPeer { peer, backend, .. } =
                new_peer(Role::Initiator, None);

            assert_eq!(
                peer.handle_connection_state(PeerConnectionState::Closed),
                Some(NegotiationState::Failed),
            );
            assert!(backend.is_closed());
            assert!(peer.is_closed());

            peer.close();
            assert_eq!(peer.state(), NegotiationState::Failed);
            assert!(!peer.fail());

            let err = peer
                .add_ice_candidate(candidate(1))
                .await
                .unwrap_err()
                .into_inner();
            assert_eq!(err, NegotiationError::PeerClosed);
        })
        .await;
}

#[tokio::test]
async fn closed_peer_ignores_backend_states() {
    LocalSet::new()
        .run_until(async {
            let TestPeer { peer, backend, .. } =
                new_peer(Role::Responder, None);

            peer.close();
            peer.close();

            assert!(backend.is_closed());
            assert_eq!(peer.state(), NegotiationState::Closed);
            assert!(!peer.fail());
            assert_eq!(
                peer.handle_connection_state(PeerConnectionState::Connected),
                None,
            );
            assert_eq!(peer.state(), NegotiationState::Closed);
        })
        .await;
}

#[tokio::test]
async fn forwards_backend_events_tagged_with_epoch() {
    LocalSet::new()
        .run_until(async {
            let TestPeer {
                peer,
                backend,
                mut events,
            } = new_peer(Role::Responder, None);
            let track = FakeTrack::new("bob-cam", MediaKind::Video);

            backend.discover(candidate(1));
            backend.add_remote_track(Rc::clone(&track));
            backend.add_remote_track(track);
            backend.set_state(PeerConnectionState::Connecting);
            settle().await;

            assert_eq!(
                events.next().await,
                Some(PeerEvent::IceCandidateDiscovered {
                    peer_id: peer_id("bob"),
                    epoch: Epoch(7),
                    candidate: candidate(1),
                }),
            );
            assert_eq!(
                events.next().await,
                Some(PeerEvent::RemoteTrackAdded {
                    peer_id: peer_id("bob"),
                    epoch: Epoch(7),
                }),
            );
            assert_eq!(
                events.next().await,
                Some(PeerEvent::ConnectionStateChanged {
                    peer_id: peer_id("bob"),
                    epoch: Epoch(7),
                    state: PeerConnectionState::Connecting,
                }),
            );
            assert_eq!(peer.remote_stream().tracks().len(), 1);
        })
        .await;
}

#[tokio::test]
async fn stops_forwarding_once_closed() {
    LocalSet::new()
        .run_until(async {
            let TestPeer {
                peer,
                backend,
                mut events,
            } = new_peer(Role::Responder, None);

            peer.close();
            backend.discover(candidate(1));
            settle().await;

            assert_eq!(events.next().await, None);
        })
        .await;
}

#[tokio::test]
async fn updates_local_tracks_in_place_when_possible() {
    LocalSet::new()
        .run_until(async {
            let mic = FakeTrack::new("mic-0", MediaKind::Audio);
            let stream = LocalMediaStream::new(vec![mic as Rc<dyn MediaTrack>]);
            let TestPeer { peer, backend, .. } =
                new_peer(Role::Initiator, Some(&stream));
            assert_eq!(backend.calls(), vec![Call::AddTrack("mic-0".into())]);

            let cam = FakeTrack::new("cam-1", MediaKind::Video);
            let next = LocalMediaStream::new(vec![cam as Rc<dyn MediaTrack>]);
            assert!(!peer.update_local_tracks(&next).await.unwrap());

            backend.set_replaces_tracks(false);
            assert!(peer.update_local_tracks(&next).await.unwrap());
            assert_eq!(backend.count(&Call::AddTrack("cam-1".into())), 1);
        })
        .await;
}

#[tokio::test]
async fn reports_backend_creation_failure() {
    LocalSet::new()
        .run_until(async {
            let factory = FakeFactory::new();
            factory.fail_next();
            let (tx, _rx) = mpsc::unbounded();

            let err = PeerConnection::new(
                peer_id("bob"),
                Epoch(0),
                Role::Initiator,
                &[IceServer {
                    urls: vec!["stun:stun.l.google.com:19302".into()],
                    username: None,
                    credential: None,
                }],
                None,
                &*factory,
                tx,
            )
            .map(drop)
            .unwrap_err()
            .into_inner();

            assert!(matches!(
                err,
                NegotiationError::Platform(
                    RtcPeerConnectionError::CreatePeer(_)
                )
            ));
            assert_eq!(factory.created(), 0);
        })
        .await;
}
