use std::{rc::Rc, time::Duration};

use futures::StreamExt as _;
use playroom::{
    media::{AudioTrackConstraints, MediaAccessError, MediaStreamConstraints},
    peer::{NegotiationError, NegotiationState, SignallingState},
    platform::{GetUserMediaError, MediaKind, MediaTrack as _, TransportError},
    proto::{PeerConnectionState, Signal},
    rpc::SignallingError,
    RoomError, SessionState,
};
use serde_json::json;
use tokio::task::LocalSet;

use crate::utils::{
    answer, candidate, elapse, offer, peer_id, remote_candidate, settle, Call,
    FakeTrack, TestRoom,
};

#[tokio::test]
async fn joins_empty_room() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&[]).await;

            assert_eq!(test.room.state(), SessionState::Joined);
            assert!(test.room.peer_states().is_empty());
            assert!(!test.room.is_connected());
            assert_eq!(
                test.transport.requests(),
                vec![(
                    "join-room".to_owned(),
                    json!({"roomId": "duel-42", "userId": "alice"}),
                )],
            );
            assert!(test.transport.signals().is_empty());
            assert_eq!(test.room.local_stream().unwrap().tracks().len(), 2);
            assert_eq!(test.devices.calls(), 1);
        })
        .await;
}

#[tokio::test]
async fn offers_to_every_present_participant() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob", "alice", "carol"]).await;

            let states = test.room.peer_states();
            assert_eq!(states.len(), 2);
            assert_eq!(states[&peer_id("bob")], NegotiationState::Offering);
            assert_eq!(states[&peer_id("carol")], NegotiationState::Offering);
            assert_eq!(test.factory.created(), 2);
            assert_eq!(test.transport.offers_to("bob"), 1);
            assert_eq!(test.transport.offers_to("carol"), 1);
            assert_eq!(test.transport.offers_to("alice"), 0);

            let backend = test.factory.get(0);
            assert_eq!(
                backend.calls(),
                vec![
                    Call::AddTrack("mic-0".into()),
                    Call::AddTrack("cam-0".into()),
                    Call::CreateOffer,
                ],
            );
            assert_eq!(
                test.factory.ice_servers()[0].urls,
                vec!["stun:stun.l.google.com:19302".to_owned()],
            );
        })
        .await;
}

#[tokio::test]
async fn connects_to_every_present_participant() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob", "carol"]).await;

            test.transport.signal_from("bob", answer("v=0"));
            test.transport.signal_from("carol", answer("v=0"));
            test.factory.get(0).set_state(PeerConnectionState::Connected);
            test.factory.get(1).set_state(PeerConnectionState::Connected);
            settle().await;

            let states = test.room.peer_states();
            assert_eq!(states.len(), 2);
            assert_eq!(states[&peer_id("bob")], NegotiationState::Connected);
            assert_eq!(states[&peer_id("carol")], NegotiationState::Connected);
            assert!(test.room.is_connected());
            assert_eq!(test.room.error(), None);
        })
        .await;
}

#[tokio::test]
async fn leaves_on_denied_media() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::new();
            test.devices.fail_next(GetUserMediaError::PermissionDenied);

            let err = test.room.join().await.unwrap_err().into_inner();

            let expected =
                RoomError::MediaAccess(MediaAccessError::PermissionDenied);
            assert_eq!(err, expected);
            assert_eq!(test.room.error(), Some(expected));
            assert_eq!(test.room.state(), SessionState::Left);
            assert!(test.room.peer_states().is_empty());
            assert!(test.room.local_stream().is_none());
            assert!(test.transport.requests().is_empty());
            assert!(test.transport.emitted().is_empty());
        })
        .await;
}

#[tokio::test]
async fn leaves_on_unacknowledged_join() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::new();
            test.transport.ack(Err(TransportError::Timeout));

            let err = test.room.join().await.unwrap_err().into_inner();

            assert_eq!(err, RoomError::Signalling(SignallingError::Timeout));
            assert_eq!(test.room.state(), SessionState::Left);
            assert!(test.devices.tracks().iter().all(|t| t.is_stopped()));
            assert_eq!(test.channel.handlers_count(), 0);
            assert_eq!(
                test.transport.emitted().last().map(|(n, _)| n.as_str()),
                Some("leave-room"),
            );
        })
        .await;
}

#[tokio::test]
async fn rejects_repeated_join() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&[]).await;

            let err = test.room.join().await.unwrap_err().into_inner();

            assert_eq!(err, RoomError::InvalidState(SessionState::Joined));
            assert_eq!(test.devices.calls(), 1);
        })
        .await;
}

#[tokio::test]
async fn waits_for_offer_of_joined_peer() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&[]).await;

            test.transport.receive("peer-joined", json!({"peerId": "bob"}));
            test.transport.receive("peer-joined", json!({"peerId": "bob"}));
            test.transport.receive("peer-joined", json!({"peerId": "alice"}));
            settle().await;

            assert_eq!(test.factory.created(), 1);
            assert_eq!(
                test.room.peer_states()[&peer_id("bob")],
                NegotiationState::New,
            );
            assert!(test.transport.signals().is_empty());

            test.transport.signal_from("bob", offer("v=0"));
            test.transport.signal_from("bob", remote_candidate(1));
            settle().await;

            assert_eq!(
                test.factory.get(0).calls(),
                vec![
                    Call::AddTrack("mic-0".into()),
                    Call::AddTrack("cam-0".into()),
                    Call::SetRemoteDescription(
                        playroom::platform::SdpType::Offer("v=0".into())
                    ),
                    Call::CreateAnswer,
                    Call::AddIceCandidate(candidate(1)),
                ],
            );
            let signals = test.transport.signals();
            assert_eq!(signals.len(), 1);
            assert_eq!(signals[0].to_peer_id, peer_id("bob"));
            assert_eq!(signals[0].signal, Signal::Answer("answer-0".into()));
            assert_eq!(
                test.room.peer_states()[&peer_id("bob")],
                NegotiationState::Answering,
            );
        })
        .await;
}

#[tokio::test]
async fn answers_offer_of_unknown_peer() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&[]).await;

            test.transport.signal_from("dave", offer("v=0"));
            settle().await;

            let signals = test.transport.signals();
            assert_eq!(signals.len(), 1);
            assert_eq!(signals[0].to_peer_id, peer_id("dave"));
            assert!(matches!(signals[0].signal, Signal::Answer(_)));
        })
        .await;
}

#[tokio::test]
async fn drops_connection_of_left_peer() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;

            test.transport.receive("peer-left", json!({"peerId": "carol"}));
            test.transport.receive("peer-left", json!({"peerId": "bob"}));
            settle().await;

            assert!(test.room.peer_states().is_empty());
            assert!(test.factory.get(0).is_closed());
            assert_eq!(test.room.state(), SessionState::Joined);
        })
        .await;
}

#[tokio::test]
async fn discards_offer_completed_after_leave() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::new();
            test.transport.ack(Ok(json!({ "participants": ["bob"] })));
            let gate = test.factory.hold_next_offer();
            test.room.join().await.unwrap();
            settle().await;

            let backend = test.factory.get(0);
            assert_eq!(backend.count(&Call::CreateOffer), 1);

            test.room.leave();
            let _ = gate.send(());
            settle().await;

            assert!(backend.is_closed());
            assert_eq!(test.transport.offers_to("bob"), 0);
            assert!(test.transport.signals().is_empty());
            assert_eq!(test.room.state(), SessionState::Left);
            assert_eq!(test.room.error(), None);
        })
        .await;
}

#[tokio::test]
async fn discards_answer_completed_after_peer_left() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&[]).await;
            let gate = test.factory.hold_next_answer();

            test.transport.signal_from("bob", offer("v=0"));
            settle().await;
            let backend = test.factory.get(0);
            assert_eq!(backend.count(&Call::CreateAnswer), 1);

            test.transport.receive("peer-left", json!({"peerId": "bob"}));
            settle().await;
            let _ = gate.send(());
            settle().await;

            assert!(backend.is_closed());
            assert!(test.transport.signals().is_empty());
            assert!(test.room.peer_states().is_empty());
            assert_eq!(test.room.error(), None);
        })
        .await;
}

#[tokio::test]
async fn keeps_one_connection_per_present_peer() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;

            test.transport.receive("peer-joined", json!({"peerId": "carol"}));
            test.transport.receive("peer-joined", json!({"peerId": "dave"}));
            test.transport.signal_from("erin", offer("v=0"));
            test.transport.receive("peer-left", json!({"peerId": "bob"}));
            test.transport.signal_from("carol", offer("v=0"));
            test.transport.receive("peer-joined", json!({"peerId": "carol"}));
            test.transport.receive("peer-left", json!({"peerId": "dave"}));
            test.transport.receive("peer-left", json!({"peerId": "frank"}));
            test.transport.receive("peer-joined", json!({"peerId": "bob"}));
            settle().await;

            let mut present: Vec<_> =
                test.room.peer_states().into_iter().map(|(id, _)| id).collect();
            present.sort_by(|a, b| a.0.cmp(&b.0));
            assert_eq!(
                present,
                vec![peer_id("bob"), peer_id("carol"), peer_id("erin")],
            );
            assert_eq!(test.factory.created(), 5);
            assert_eq!(
                (0..5).filter(|n| test.factory.get(*n).is_closed()).count(),
                2,
            );
        })
        .await;
}

#[tokio::test]
async fn relays_local_candidates_after_offer() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::new();
            test.transport.ack(Ok(json!({"participants": ["bob"]})));
            test.room.join().await.unwrap();

            test.factory.last().discover(candidate(1));
            settle().await;

            let signals: Vec<_> = test
                .transport
                .signals()
                .into_iter()
                .map(|s| s.signal)
                .collect();
            assert_eq!(
                signals,
                vec![
                    Signal::Offer("offer-0".into()),
                    Signal::Candidate(candidate(1)),
                ],
            );
        })
        .await;
}

#[tokio::test]
async fn reports_answer_without_offer() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&[]).await;
            let mut errors = test.room.on_error();

            test.transport.receive("peer-joined", json!({"peerId": "bob"}));
            test.transport.signal_from("bob", answer("v=0"));
            settle().await;

            assert_eq!(
                errors.next().await,
                Some(RoomError::Negotiation {
                    peer_id: peer_id("bob"),
                    error: NegotiationError::UnexpectedDescription {
                        kind: "answer",
                        state: SignallingState::Stable,
                    },
                }),
            );
            assert_eq!(
                test.room.peer_states()[&peer_id("bob")],
                NegotiationState::Failed,
            );
            assert_eq!(test.room.state(), SessionState::Joined);
        })
        .await;
}

#[tokio::test]
async fn toggles_media_without_renegotiation() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;
            let calls = test.factory.get(0).calls();
            let signals = test.transport.signals().len();

            assert!(!test.room.toggle_camera());
            assert!(!test.room.toggle_microphone());
            settle().await;

            let stream = test.room.local_stream().unwrap();
            assert!(stream.tracks().iter().all(|t| !t.enabled()));
            assert_eq!(test.factory.get(0).calls(), calls);
            assert_eq!(test.transport.signals().len(), signals);

            assert!(test.room.toggle_camera());
            assert!(stream.tracks_of(MediaKind::Video).all(|t| t.enabled()));
        })
        .await;
}

#[tokio::test]
async fn leave_releases_everything() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::new();
            let states = test.room.on_state_change();
            test.transport.ack(Ok(json!({"participants": ["bob"]})));
            test.room.join().await.unwrap();
            settle().await;

            test.room.leave();
            test.room.leave();

            assert_eq!(test.room.state(), SessionState::Left);
            assert!(test.room.peer_states().is_empty());
            assert!(test.room.local_stream().is_none());
            assert!(test.factory.get(0).is_closed());
            assert!(test.devices.tracks().iter().all(|t| t.stop_count() == 1));
            assert_eq!(test.channel.handlers_count(), 0);
            let leaves: Vec<_> = test
                .transport
                .emitted()
                .into_iter()
                .filter(|(name, _)| name == "leave-room")
                .collect();
            assert_eq!(
                leaves,
                vec![(
                    "leave-room".to_owned(),
                    json!({"roomId": "duel-42", "userId": "alice"}),
                )],
            );
            assert_eq!(
                states.take(5).collect::<Vec<_>>().await,
                vec![
                    SessionState::Idle,
                    SessionState::Joining,
                    SessionState::Joined,
                    SessionState::Leaving,
                    SessionState::Left,
                ],
            );
        })
        .await;
}

#[tokio::test]
async fn leaving_idle_room_skips_signalling() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::new();

            test.room.leave();

            assert_eq!(test.room.state(), SessionState::Left);
            assert!(test.transport.emitted().is_empty());
            let err = test.room.join().await.unwrap_err().into_inner();
            assert_eq!(err, RoomError::InvalidState(SessionState::Left));
        })
        .await;
}

#[tokio::test]
async fn leave_aborts_pending_join_request() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::new();
            let release = test.transport.hold_ack();
            let room = Rc::new(test.room);
            let join = {
                let room = Rc::clone(&room);
                tokio::task::spawn_local(async move { room.join().await })
            };
            settle().await;
            assert_eq!(room.state(), SessionState::Joining);

            room.leave();
            release.send(()).unwrap();
            let err = join.await.unwrap().unwrap_err().into_inner();

            assert_eq!(err, RoomError::Aborted);
            assert_eq!(room.state(), SessionState::Left);
            assert!(test.devices.tracks().iter().all(|t| t.is_stopped()));
            assert!(test
                .transport
                .emitted()
                .iter()
                .any(|(name, _)| name == "leave-room"));
        })
        .await;
}

#[tokio::test]
async fn leave_aborts_pending_media_request() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::new();
            let release = test.devices.hold();
            let room = Rc::new(test.room);
            let join = {
                let room = Rc::clone(&room);
                tokio::task::spawn_local(async move { room.join().await })
            };
            settle().await;

            room.leave();
            release.send(()).unwrap();
            let err = join.await.unwrap().unwrap_err().into_inner();

            assert_eq!(err, RoomError::Aborted);
            assert!(room.local_stream().is_none());
            assert!(test.devices.tracks().iter().all(|t| t.is_stopped()));
            assert!(test.transport.requests().is_empty());
            assert!(test.transport.emitted().is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn retries_failed_connection_once() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;
            let first = test.factory.get(0);

            first.set_state(PeerConnectionState::Failed);
            settle().await;

            assert_eq!(
                test.room.peer_states()[&peer_id("bob")],
                NegotiationState::Failed,
            );
            assert_eq!(
                test.room.error(),
                Some(RoomError::IceFailure(peer_id("bob"))),
            );
            assert!(first.is_closed());

            elapse(Duration::from_secs(2)).await;

            assert_eq!(test.factory.created(), 2);
            assert_eq!(test.transport.offers_to("bob"), 2);
            assert_eq!(
                test.room.peer_states()[&peer_id("bob")],
                NegotiationState::Offering,
            );

            let signals = test.transport.signals().len();
            first.discover(candidate(9));
            first.set_state(PeerConnectionState::Connected);
            settle().await;
            assert_eq!(test.transport.signals().len(), signals);
            assert!(!test.room.is_connected());

            test.factory.get(1).set_state(PeerConnectionState::Failed);
            settle().await;
            assert!(test.room.peer_states().is_empty());

            elapse(Duration::from_secs(2)).await;
            assert_eq!(test.factory.created(), 2);
            assert_eq!(test.room.state(), SessionState::Joined);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn reports_every_failure_of_retried_connection() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;
            let mut errors = test.room.on_error();

            test.factory.get(0).set_state(PeerConnectionState::Failed);
            settle().await;
            elapse(Duration::from_secs(2)).await;
            test.factory.get(1).set_state(PeerConnectionState::Failed);
            settle().await;

            let failure = RoomError::IceFailure(peer_id("bob"));
            assert_eq!(errors.next().await, Some(failure.clone()));
            assert_eq!(errors.next().await, Some(failure.clone()));
            assert!(test.room.peer_states().is_empty());
            assert_eq!(test.room.error(), Some(failure));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn tolerates_short_disconnects() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;
            let backend = test.factory.get(0);
            test.transport.signal_from("bob", answer("v=0"));
            backend.set_state(PeerConnectionState::Connected);
            settle().await;
            assert!(test.room.is_connected());

            backend.set_state(PeerConnectionState::Disconnected);
            settle().await;
            assert!(!test.room.is_connected());
            assert_eq!(
                test.room.peer_states()[&peer_id("bob")],
                NegotiationState::Disconnected,
            );

            elapse(Duration::from_secs(3)).await;
            backend.set_state(PeerConnectionState::Connected);
            settle().await;
            elapse(Duration::from_secs(5)).await;

            assert!(test.room.is_connected());
            assert_eq!(test.room.error(), None);

            backend.set_state(PeerConnectionState::Disconnected);
            settle().await;
            elapse(Duration::from_secs(5)).await;

            assert_eq!(
                test.room.peer_states()[&peer_id("bob")],
                NegotiationState::Failed,
            );
            assert_eq!(
                test.room.error(),
                Some(RoomError::IceFailure(peer_id("bob"))),
            );
        })
        .await;
}

#[tokio::test]
async fn replaces_offer_of_failed_peer() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;
            test.factory.get(0).set_state(PeerConnectionState::Failed);
            settle().await;

            test.transport.signal_from("bob", offer("v=1"));
            settle().await;

            assert_eq!(test.factory.created(), 2);
            assert_eq!(
                test.room.peer_states()[&peer_id("bob")],
                NegotiationState::Answering,
            );
            assert_eq!(
                test.transport.signals().last().map(|s| s.signal.clone()),
                Some(Signal::Answer("answer-1".into())),
            );
        })
        .await;
}

#[tokio::test]
async fn exposes_remote_media() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;
            let mut updates = test.room.on_remote_stream();
            assert!(test.room.remote_streams().is_empty());

            let track = FakeTrack::new("bob-cam", MediaKind::Video);
            test.factory.get(0).add_remote_track(track);
            settle().await;

            let streams = test.room.remote_streams();
            assert_eq!(streams[&peer_id("bob")].tracks().len(), 1);
            let (from, stream) = updates.next().await.unwrap();
            assert_eq!(from, peer_id("bob"));
            assert_eq!(stream.peer_id(), &peer_id("bob"));
            assert_eq!(stream.tracks()[0].id(), "bob-cam");
        })
        .await;
}

#[tokio::test]
async fn replaces_local_media_in_place() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;
            let backend = test.factory.get(0);
            test.transport.signal_from("bob", answer("v=0"));
            settle().await;
            let audio_only = MediaStreamConstraints::new()
                .audio(AudioTrackConstraints::new());

            test.room
                .replace_local_media(audio_only.clone())
                .await
                .unwrap();
            settle().await;

            assert_eq!(backend.count(&Call::ReplaceTrack("mic-1".into())), 1);
            assert_eq!(test.transport.offers_to("bob"), 1);
            let old = test.devices.tracks();
            assert!(old[0].is_stopped() && old[1].is_stopped());
            assert!(!old[2].is_stopped());
            let local = test.room.local_stream().unwrap();
            assert!(local.has(MediaKind::Audio));
            assert!(!local.has(MediaKind::Video));

            backend.set_replaces_tracks(false);
            test.room.replace_local_media(audio_only).await.unwrap();
            settle().await;

            assert_eq!(backend.count(&Call::AddTrack("mic-2".into())), 1);
            assert_eq!(test.transport.offers_to("bob"), 2);
        })
        .await;
}

#[tokio::test]
async fn keeps_local_media_if_replacement_fails() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;
            test.devices.fail_next(GetUserMediaError::NotReadable(
                "camera is busy".into(),
            ));

            let err = test
                .room
                .replace_local_media(MediaStreamConstraints::new().audio(
                    AudioTrackConstraints::new(),
                ))
                .await
                .unwrap_err()
                .into_inner();

            assert_eq!(
                err,
                RoomError::MediaAccess(MediaAccessError::DeviceInUse(
                    "camera is busy".into()
                )),
            );
            assert_eq!(test.room.local_stream().unwrap().tracks().len(), 2);
            assert!(test.devices.tracks().iter().all(|t| !t.is_stopped()));
        })
        .await;
}

#[tokio::test]
async fn rejects_media_replacement_before_join() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::new();

            let err = test
                .room
                .replace_local_media(MediaStreamConstraints::new())
                .await
                .unwrap_err()
                .into_inner();

            assert_eq!(err, RoomError::InvalidState(SessionState::Idle));
        })
        .await;
}

#[tokio::test]
async fn snapshots_read_model() {
    LocalSet::new()
        .run_until(async {
            let test = TestRoom::joined(&["bob"]).await;
            test.transport.signal_from("bob", answer("v=0"));
            test.factory.get(0).set_state(PeerConnectionState::Connected);
            settle().await;

            let snapshot = test.room.snapshot();

            assert_eq!(snapshot.state, SessionState::Joined);
            assert!(snapshot.is_connected);
            assert_eq!(
                snapshot.peer_states[&peer_id("bob")],
                NegotiationState::Connected,
            );
            assert!(snapshot.local_stream.is_some());
            assert!(snapshot.remote_streams.is_empty());
            assert_eq!(snapshot.error, None);

            let debug = format!("{:?}", test.room);
            assert!(debug.contains("\"duel-42\""));
            assert!(debug.contains("Connected"));
        })
        .await;
}

#[tokio::test]
async fn dropping_room_leaves_it() {
    LocalSet::new()
        .run_until(async {
            let TestRoom {
                room,
                transport,
                devices,
                factory,
                ..
            } = TestRoom::joined(&["bob"]).await;

            drop(room);

            assert!(factory.get(0).is_closed());
            assert!(devices.tracks().iter().all(|t| t.is_stopped()));
            assert_eq!(
                transport.emitted().last().map(|(n, _)| n.as_str()),
                Some("leave-room"),
            );
        })
        .await;
}
