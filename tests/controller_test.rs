use peercall::calls::{CallSessionController, NegotiationState};
use peercall::config::{CallConfig, EngineConfig};
use peercall::error::CallError;
use peercall::media::{FacingMode, MediaConstraints, MediaTrack, TrackKind, TransportEvent};
use peercall::store::InMemoryDocumentStore;
use peercall::testing::{FakeMediaDevices, FakeTransportFactory, TransportCall};
use peercall::types::{CallId, IceCandidate, Role};
use std::sync::Arc;
use std::time::Duration;

fn config() -> CallConfig {
    CallConfig {
        engine: EngineConfig {
            negotiation_timeout: None,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn controller(
    store: &Arc<InMemoryDocumentStore>,
    factory: &Arc<FakeTransportFactory>,
) -> CallSessionController {
    CallSessionController::new(
        Arc::new(FakeMediaDevices::new()),
        store.clone(),
        factory.clone(),
        config(),
    )
    .await
    .expect("controller should build")
}

async fn wait_for(controller: &CallSessionController, state: NegotiationState) {
    tokio::time::timeout(
        Duration::from_secs(5),
        controller.engine().wait_for_state(state),
    )
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"))
    .expect("engine stopped");
}

#[tokio::test]
async fn test_media_unavailable_is_surfaced() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let devices = Arc::new(FakeMediaDevices::unavailable());
    let result = CallSessionController::new(
        devices.clone(),
        store,
        Arc::new(FakeTransportFactory::new("A")),
        config(),
    )
    .await;

    assert!(matches!(result, Err(CallError::MediaUnavailable(_))));
    assert_eq!(devices.acquisitions(), 1);
}

#[tokio::test]
async fn test_media_is_acquired_once() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let devices = Arc::new(FakeMediaDevices::new());
    let controller = CallSessionController::new(
        devices.clone(),
        store,
        Arc::new(FakeTransportFactory::new("A")),
        config(),
    )
    .await
    .unwrap();

    controller.start_call(Role::Initiator, None).await.unwrap();
    controller.hangup().await.unwrap();
    controller.start_call(Role::Initiator, None).await.unwrap();
    assert_eq!(devices.acquisitions(), 1);
}

#[tokio::test]
async fn test_responder_needs_call_id() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let factory = Arc::new(FakeTransportFactory::new("B"));
    let controller = controller(&store, &factory).await;

    let err = controller
        .start_call(Role::Responder, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::MissingCallId));
    assert_eq!(controller.state(), NegotiationState::Idle);
}

#[tokio::test]
async fn test_initiator_generates_call_id_and_attaches_tracks() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let factory = Arc::new(FakeTransportFactory::new("A"));
    let controller = controller(&store, &factory).await;

    let id = controller.start_call(Role::Initiator, None).await.unwrap();
    assert!(!id.as_str().is_empty());
    assert_eq!(
        controller.state(),
        NegotiationState::AwaitingLocalDescription
    );

    let transport = factory.latest().unwrap();
    assert_eq!(transport.tracks(), vec!["mic-0", "cam-0"]);
    let calls = transport.calls();
    let last_track = calls
        .iter()
        .rposition(|c| matches!(c, TransportCall::AddTrack(_)))
        .unwrap();
    let offer = calls
        .iter()
        .position(|c| matches!(c, TransportCall::CreateOffer))
        .unwrap();
    assert!(last_track < offer);
}

#[tokio::test]
async fn test_toggles_flip_track_flags() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let factory = Arc::new(FakeTransportFactory::new("A"));
    let controller = controller(&store, &factory).await;
    controller.start_call(Role::Initiator, None).await.unwrap();

    assert!(!controller.is_muted());
    assert!(controller.toggle_mute());
    assert!(controller.is_muted());
    let mic = controller.local_tracks().audio_tracks().next().unwrap();
    assert!(!mic.is_enabled());
    assert!(!controller.toggle_mute());
    assert!(mic.is_enabled());

    assert!(controller.is_camera_enabled());
    assert!(!controller.toggle_camera());
    assert!(!controller.local_tracks().video_tracks().next().unwrap().is_enabled());

    // Toggling never touches the transport.
    let transport = factory.latest().unwrap();
    assert_eq!(
        transport
            .calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::AddTrack(_)))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_audio_only_controller() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let factory = Arc::new(FakeTransportFactory::new("A"));
    let controller = CallSessionController::new(
        Arc::new(FakeMediaDevices::new()),
        store,
        factory.clone(),
        CallConfig {
            constraints: MediaConstraints {
                audio: true,
                video: None,
            },
            ..config()
        },
    )
    .await
    .unwrap();

    assert!(!controller.is_camera_enabled());
    assert!(!controller.toggle_camera());
    assert!(!controller.toggle_camera());
    controller.start_call(Role::Initiator, None).await.unwrap();
    assert_eq!(factory.latest().unwrap().tracks(), vec!["mic-0"]);
}

#[tokio::test]
async fn test_video_only_controller_reports_muted() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let controller = CallSessionController::new(
        Arc::new(FakeMediaDevices::new()),
        store,
        Arc::new(FakeTransportFactory::new("A")),
        CallConfig {
            constraints: MediaConstraints {
                audio: false,
                video: Some(FacingMode::User),
            },
            ..config()
        },
    )
    .await
    .unwrap();

    assert!(controller.is_muted());
    assert!(controller.toggle_mute());
    assert!(controller.toggle_mute());
    assert!(controller.is_camera_enabled());
}

#[tokio::test]
async fn test_hangup_returns_to_idle_with_fresh_transport() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let factory = Arc::new(FakeTransportFactory::new("A"));
    let controller = controller(&store, &factory).await;
    let id = controller.start_call(Role::Initiator, None).await.unwrap();

    controller.hangup().await.unwrap();
    assert_eq!(controller.state(), NegotiationState::Idle);
    assert_eq!(store.listener_count(&format!("calls/{id}")), 0);

    let transports = factory.transports();
    assert_eq!(transports.len(), 2);
    assert!(transports[0].is_closed());
    assert!(transports[1].calls().is_empty());
    assert_eq!(controller.view().await.call_id, None);
}

#[tokio::test]
async fn test_restart_keeps_role() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let factory = Arc::new(FakeTransportFactory::new("B"));
    let controller = controller(&store, &factory).await;

    let err = controller.restart(None).await.unwrap_err();
    assert!(matches!(err, CallError::NoActiveCall));

    let id = CallId::new("4321");
    controller
        .start_call(Role::Responder, Some(id.clone()))
        .await
        .unwrap();
    let err = controller.restart(None).await.unwrap_err();
    assert!(matches!(err, CallError::MissingCallId));
    assert_eq!(
        controller.state(),
        NegotiationState::AwaitingRemoteDescription
    );
    assert_eq!(factory.transports().len(), 1);

    let rejoined = controller.restart(Some(id.clone())).await.unwrap();

    assert_eq!(rejoined, id);
    assert_eq!(
        controller.state(),
        NegotiationState::AwaitingRemoteDescription
    );
    assert_eq!(controller.engine().role().await, Some(Role::Responder));
    assert_eq!(factory.transports().len(), 2);
    assert_eq!(factory.latest().unwrap().tracks(), vec!["mic-0", "cam-0"]);
}

#[tokio::test]
async fn test_initiator_restart_opens_new_channel() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let factory = Arc::new(FakeTransportFactory::new("A"));
    let controller = controller(&store, &factory).await;

    let first = controller
        .start_call(Role::Initiator, Some(CallId::new("first-call")))
        .await
        .unwrap();
    let second = controller.restart(None).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(controller.engine().call_id().await, Some(second));
}

#[tokio::test]
async fn test_failed_start_leaves_controller_ready() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let factory = Arc::new(FakeTransportFactory::new("A"));
    let controller = controller(&store, &factory).await;

    store.set_available(false);
    let err = controller
        .start_call(Role::Initiator, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::StoreUnavailable(_)));
    assert_eq!(controller.state(), NegotiationState::Idle);

    store.set_available(true);
    controller.start_call(Role::Initiator, None).await.unwrap();
}

#[tokio::test]
async fn test_call_view_projection() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let initiator_factory = Arc::new(
        FakeTransportFactory::new("A")
            .with_candidates(vec![IceCandidate::new("host-a")])
            .with_auto_connect(),
    );
    let responder_factory = Arc::new(
        FakeTransportFactory::new("B")
            .with_candidates(vec![IceCandidate::new("host-b")])
            .with_auto_connect(),
    );
    let initiator = controller(&store, &initiator_factory).await;
    let responder = controller(&store, &responder_factory).await;

    let id = initiator
        .start_call(Role::Initiator, Some(CallId::new("1234")))
        .await
        .unwrap();
    responder
        .start_call(Role::Responder, Some(id.clone()))
        .await
        .unwrap();
    wait_for(&initiator, NegotiationState::Connected).await;
    wait_for(&responder, NegotiationState::Connected).await;

    responder_factory
        .latest()
        .unwrap()
        .emit(TransportEvent::Track(MediaTrack::new(
            "peer-mic",
            TrackKind::Audio,
        )));
    for _ in 0..500 {
        if !responder.remote_tracks().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    responder.toggle_mute();

    let view = responder.view().await;
    assert_eq!(view.call_id, Some(id));
    assert_eq!(view.role, Some(Role::Responder));
    assert_eq!(view.state, NegotiationState::Connected);
    assert!(view.muted);
    assert!(view.camera_enabled);
    assert_eq!(view.remote_tracks, vec!["peer-mic"]);

    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["callId"], "1234");
    assert_eq!(json["role"], "responder");
    assert_eq!(json["state"], "Connected");
    assert_eq!(json["localTracks"], serde_json::json!(["mic-0", "cam-0"]));
}

#[tokio::test]
async fn test_both_peers_restart_onto_new_channel() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let initiator_factory = Arc::new(FakeTransportFactory::new("A"));
    let responder_factory = Arc::new(FakeTransportFactory::new("B"));
    let initiator = controller(&store, &initiator_factory).await;
    let responder = controller(&store, &responder_factory).await;

    let first = initiator
        .start_call(Role::Initiator, Some(CallId::new("first-call")))
        .await
        .unwrap();
    responder
        .start_call(Role::Responder, Some(first.clone()))
        .await
        .unwrap();
    wait_for(&initiator, NegotiationState::Negotiating).await;
    wait_for(&responder, NegotiationState::Negotiating).await;

    let second = initiator.restart(None).await.unwrap();
    assert_ne!(second, first);
    assert!(matches!(
        responder.restart(None).await,
        Err(CallError::MissingCallId)
    ));
    responder.restart(Some(second.clone())).await.unwrap();

    wait_for(&initiator, NegotiationState::Negotiating).await;
    wait_for(&responder, NegotiationState::Negotiating).await;
    assert_eq!(responder.engine().call_id().await, Some(second));

    let remote: Vec<_> = responder_factory
        .latest()
        .unwrap()
        .calls()
        .into_iter()
        .filter(|c| matches!(c, TransportCall::SetRemoteDescription(_)))
        .collect();
    assert_eq!(remote.len(), 1);
    assert_eq!(initiator_factory.transports().len(), 2);
}
