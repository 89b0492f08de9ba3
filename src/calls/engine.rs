//! Negotiation engine: one participant's side of the offer/answer handshake
//! and candidate trickling.
//!
//! Every input (caller commands, channel snapshots, remote candidates,
//! transport callbacks, the negotiation timer) is funnelled into a single
//! queue owned by one actor task, so two transitions of the same engine never
//! interleave. Subscriptions only forward into that queue.
//!
//! Each transport instance belongs to one *attempt*, identified by a
//! generation number. Notifications are tagged with the generation that
//! produced them and dropped if the engine has since moved on, so a listener
//! that outlives `close()` cannot mutate the next attempt.

use super::state::{InvalidTransition, NegotiationState, NegotiationTransition};
use crate::config::EngineConfig;
use crate::error::CallError;
use crate::media::{
    MediaTrack, MediaTrackSet, PeerConnectionState, PeerTransport, TransportError, TransportEvent,
    TransportFactory,
};
use crate::signaling::{CandidateFeed, CandidateRelay, ChannelFeed, ChannelSnapshot, SessionChannel};
use crate::store::{DocumentStore, SubscriptionGuard};
use crate::types::{CallId, EventBus, IceCandidate, Role, SdpType, SessionDescription, StateChange};
use log::{debug, info, trace, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

type Reply<T> = oneshot::Sender<Result<T, CallError>>;

enum Command {
    AttachTracks {
        tracks: Vec<MediaTrack>,
        reply: Reply<()>,
    },
    Start {
        role: Role,
        call_id: CallId,
        reply: Reply<()>,
    },
    Close {
        reply: Reply<()>,
    },
    Reset {
        reply: Reply<()>,
    },
    Shutdown,
}

enum Notification {
    Snapshot(ChannelSnapshot),
    RemoteCandidate(IceCandidate),
    Transport(TransportEvent),
    TimedOut,
}

enum EngineInput {
    Command(Command),
    Notification {
        generation: u64,
        notification: Notification,
    },
}

#[derive(Debug, Clone, Copy)]
enum CloseReason {
    Hangup,
    StartFailed,
    NegotiationFailed,
    TransportFailed,
    TimedOut,
    Shutdown,
}

/// State readable from outside the actor.
struct Shared {
    events: EventBus,
    remote_tracks: RwLock<MediaTrackSet>,
    binding: RwLock<Option<(Role, CallId)>>,
    generation: AtomicU64,
}

/// Drives one negotiation attempt at a time over a [`SessionChannel`] and
/// [`CandidateRelay`].
///
/// The engine owns the transport. Callers attach tracks and observe remote
/// tracks through the engine and never keep a transport handle of their own.
pub struct NegotiationEngine {
    inputs: mpsc::UnboundedSender<EngineInput>,
    state: watch::Receiver<NegotiationState>,
    shared: Arc<Shared>,
}

impl NegotiationEngine {
    /// Build an idle engine with a fresh transport.
    pub async fn new(
        store: Arc<dyn DocumentStore>,
        factory: Arc<dyn TransportFactory>,
        config: EngineConfig,
    ) -> Result<Self, CallError> {
        let (inputs, queue) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(NegotiationState::Idle);
        let shared = Arc::new(Shared {
            events: EventBus::new(),
            remote_tracks: RwLock::new(MediaTrackSet::new()),
            binding: RwLock::new(None),
            generation: AtomicU64::new(1),
        });

        let attempt = Attempt::build(factory.as_ref(), 1, &inputs).await?;
        let actor = EngineActor {
            relay: CandidateRelay::new(store.clone(), config.channel_root.clone()),
            channel: SessionChannel::new(store, config.channel_root.clone()),
            config,
            factory,
            shared: shared.clone(),
            state_tx,
            inputs: inputs.clone(),
            attempt,
        };
        tokio::spawn(actor.run(queue));

        Ok(Self {
            inputs,
            state,
            shared,
        })
    }

    /// Add local tracks to the current transport. Only valid while idle.
    pub async fn attach_local_tracks(&self, tracks: &MediaTrackSet) -> Result<(), CallError> {
        let tracks = tracks.tracks().to_vec();
        self.request(|reply| Command::AttachTracks { tracks, reply })
            .await
    }

    /// Bind to `call_id` and run the role's entry actions.
    ///
    /// Returns once the local side of the handshake has been written (or, for
    /// a responder whose offer is not there yet, once it is waiting for it).
    /// On failure the attempt is closed and the error returned.
    pub async fn start(&self, role: Role, call_id: CallId) -> Result<(), CallError> {
        self.request(|reply| Command::Start {
            role,
            call_id,
            reply,
        })
        .await
    }

    /// Cancel subscriptions and release the transport. Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), CallError> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Leave `Closed` for `Idle` with a newly built transport.
    pub async fn reset(&self) -> Result<(), CallError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<NegotiationState> {
        self.state.clone()
    }

    pub async fn wait_for_state(&self, target: NegotiationState) -> Result<(), CallError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map_err(|_| CallError::EngineStopped)?;
        Ok(())
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub async fn remote_tracks(&self) -> MediaTrackSet {
        self.shared.remote_tracks.read().await.clone()
    }

    pub async fn call_id(&self) -> Option<CallId> {
        self.shared
            .binding
            .read()
            .await
            .as_ref()
            .map(|(_, id)| id.clone())
    }

    pub async fn role(&self) -> Option<Role> {
        self.shared.binding.read().await.as_ref().map(|(role, _)| *role)
    }

    /// Generation of the current transport; bumped by every reset.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, CallError> {
        let (reply, response) = oneshot::channel();
        self.inputs
            .send(EngineInput::Command(command(reply)))
            .map_err(|_| CallError::EngineStopped)?;
        response.await.map_err(|_| CallError::EngineStopped)?
    }
}

impl Drop for NegotiationEngine {
    fn drop(&mut self) {
        let _ = self.inputs.send(EngineInput::Command(Command::Shutdown));
    }
}

/// Everything bound to one transport instance.
struct Attempt {
    generation: u64,
    transport: Arc<dyn PeerTransport>,
    role: Option<Role>,
    call_id: Option<CallId>,
    local_description_set: bool,
    remote_description_set: bool,
    /// Type of the description we wrote, used to ignore our own echo.
    written: Option<SdpType>,
    known_remote: HashSet<IceCandidate>,
    /// Remote candidates that arrived before the remote description.
    pending_remote: Vec<IceCandidate>,
    local_tracks: MediaTrackSet,
    listeners: Vec<SubscriptionGuard>,
    tasks: Vec<JoinHandle<()>>,
}

impl Attempt {
    async fn build(
        factory: &dyn TransportFactory,
        generation: u64,
        inputs: &mpsc::UnboundedSender<EngineInput>,
    ) -> Result<Self, CallError> {
        let (transport, mut events) = factory.create_transport().await?;
        let tx = inputs.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let input = EngineInput::Notification {
                    generation,
                    notification: Notification::Transport(event),
                };
                if tx.send(input).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            generation,
            transport,
            role: None,
            call_id: None,
            local_description_set: false,
            remote_description_set: false,
            written: None,
            known_remote: HashSet::new(),
            pending_remote: Vec::new(),
            local_tracks: MediaTrackSet::new(),
            listeners: Vec::new(),
            tasks: vec![forwarder],
        })
    }
}

struct EngineActor {
    config: EngineConfig,
    relay: CandidateRelay,
    channel: SessionChannel,
    factory: Arc<dyn TransportFactory>,
    shared: Arc<Shared>,
    state_tx: watch::Sender<NegotiationState>,
    inputs: mpsc::UnboundedSender<EngineInput>,
    attempt: Attempt,
}

impl EngineActor {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<EngineInput>) {
        debug!("negotiation engine started");
        while let Some(input) = queue.recv().await {
            match input {
                EngineInput::Command(command) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                EngineInput::Notification {
                    generation,
                    notification,
                } => {
                    if generation != self.attempt.generation || self.state().is_closed() {
                        debug!(
                            "dropping notification from generation {generation} (current {}, {:?})",
                            self.attempt.generation,
                            self.state()
                        );
                        continue;
                    }
                    self.handle_notification(notification).await;
                }
            }
        }
        debug!("negotiation engine stopped");
    }

    /// Returns false when the engine should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::AttachTracks { tracks, reply } => {
                let _ = reply.send(self.attach_tracks(tracks).await);
            }
            Command::Start {
                role,
                call_id,
                reply,
            } => {
                let _ = reply.send(self.start(role, call_id).await);
            }
            Command::Close { reply } => {
                self.close(CloseReason::Hangup).await;
                let _ = reply.send(Ok(()));
            }
            Command::Reset { reply } => {
                let _ = reply.send(self.reset().await);
            }
            Command::Shutdown => {
                self.close(CloseReason::Shutdown).await;
                return false;
            }
        }
        true
    }

    async fn handle_notification(&mut self, notification: Notification) {
        match notification {
            Notification::Snapshot(snapshot) => self.on_snapshot(snapshot).await,
            Notification::RemoteCandidate(candidate) => self.on_remote_candidate(candidate).await,
            Notification::Transport(event) => self.on_transport_event(event).await,
            Notification::TimedOut => self.on_timeout().await,
        }
    }

    fn state(&self) -> NegotiationState {
        *self.state_tx.borrow()
    }

    fn label(&self) -> String {
        match &self.attempt.call_id {
            Some(id) => format!("{id}#{}", self.attempt.generation),
            None => format!("-#{}", self.attempt.generation),
        }
    }

    fn transition(
        &mut self,
        transition: NegotiationTransition,
    ) -> Result<NegotiationState, InvalidTransition> {
        let from = self.state();
        let to = from.apply(transition)?;
        self.state_tx.send_replace(to);
        info!("negotiation {}: {:?} -> {:?}", self.label(), from, to);
        let _ = self.shared.events.state_changed.send(StateChange {
            call_id: self.attempt.call_id.clone(),
            generation: self.attempt.generation,
            from,
            to,
        });
        Ok(to)
    }

    fn report(&self, err: CallError) {
        warn!("negotiation {}: {err}", self.label());
        let _ = self.shared.events.error.send(Arc::new(err));
    }

    /// Report a failure raised while handling a notification. Protocol
    /// violations only discard the notification; anything else ends the attempt.
    async fn fail(&mut self, err: CallError) {
        let fatal = !matches!(err, CallError::ProtocolViolation(_));
        self.report(err);
        if fatal {
            self.close(CloseReason::NegotiationFailed).await;
        }
    }

    async fn attach_tracks(&mut self, tracks: Vec<MediaTrack>) -> Result<(), CallError> {
        let state = self.state();
        if state != NegotiationState::Idle {
            return Err(InvalidTransition {
                current_state: format!("{:?}", state),
                attempted: "AttachTracks".to_string(),
            }
            .into());
        }
        for track in tracks {
            if self.attempt.local_tracks.contains(track.id()) {
                continue;
            }
            self.attempt.transport.add_track(&track).await?;
            debug!("attached local {:?} track {}", track.kind(), track.id());
            self.attempt.local_tracks.add(track);
        }
        Ok(())
    }

    async fn start(&mut self, role: Role, call_id: CallId) -> Result<(), CallError> {
        let transition = match role {
            Role::Initiator => NegotiationTransition::StartAsInitiator,
            Role::Responder => NegotiationTransition::StartAsResponder,
        };
        self.state().apply(transition)?;

        self.attempt.role = Some(role);
        self.attempt.call_id = Some(call_id.clone());
        *self.shared.binding.write().await = Some((role, call_id.clone()));
        self.transition(transition)?;
        self.arm_timeout();

        let result = match role {
            Role::Initiator => self.start_initiator(&call_id).await,
            Role::Responder => self.start_responder(&call_id).await,
        };
        if let Err(e) = &result {
            warn!("starting {role:?} on {call_id} failed: {e}");
            self.close(CloseReason::StartFailed).await;
        }
        result
    }

    async fn start_initiator(&mut self, call_id: &CallId) -> Result<(), CallError> {
        match self.channel.create(call_id).await {
            Ok(()) => {}
            Err(CallError::AlreadyExists(path)) => {
                // An answer left by an earlier attempt would otherwise come
                // back in the echo of our own offer.
                debug!("{path} already exists, clearing its answer");
                self.channel.clear_answer(call_id).await?;
            }
            Err(e) => return Err(e),
        }
        // The answer cannot exist before our offer, so nothing is missed by
        // subscribing first.
        let feed = self.channel.subscribe(call_id).await?;
        self.forward_snapshots(feed);
        let feed = self
            .relay
            .subscribe(call_id, Role::Initiator.remote_candidates())
            .await?;
        self.forward_candidates(feed);

        let transport = self.attempt.transport.clone();
        let offer = transport.create_offer().await?;
        transport.set_local_description(&offer).await?;
        self.attempt.local_description_set = true;

        self.channel.write_offer(call_id, &offer).await?;
        self.attempt.written = Some(SdpType::Offer);
        Ok(())
    }

    async fn start_responder(&mut self, call_id: &CallId) -> Result<(), CallError> {
        let remote = Role::Responder.remote_candidates();
        let feed = self.channel.subscribe(call_id).await?;
        self.forward_snapshots(feed);
        let feed = self.relay.subscribe(call_id, remote).await?;
        self.forward_candidates(feed);

        // Feeds do not replay; pick up what the initiator trickled before we
        // subscribed. Overlap with the feed is removed by deduplication.
        for candidate in self.relay.list(call_id, remote).await? {
            self.on_remote_candidate(candidate).await;
        }

        match self.channel.read(call_id).await? {
            Some(ChannelSnapshot {
                offer: Some(offer), ..
            }) => self.accept_offer(call_id, offer).await?,
            Some(_) => debug!("{call_id} has no offer yet, waiting for it"),
            None => debug!("{call_id} does not exist yet, waiting for the offer"),
        }
        Ok(())
    }

    /// Responder: offer in, answer out.
    async fn accept_offer(
        &mut self,
        call_id: &CallId,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        if offer.sdp_type != SdpType::Offer {
            return Err(CallError::ProtocolViolation(format!(
                "expected an offer, found an {}",
                offer.sdp_type
            )));
        }
        let transport = self.attempt.transport.clone();
        transport.set_remote_description(&offer).await?;
        self.attempt.remote_description_set = true;
        self.flush_pending_candidates().await;

        let answer = transport.create_answer().await?;
        transport.set_local_description(&answer).await?;
        self.attempt.local_description_set = true;

        self.channel.write_answer(call_id, &answer).await?;
        self.attempt.written = Some(SdpType::Answer);
        self.transition(NegotiationTransition::LocalAnswerWritten)?;
        Ok(())
    }

    /// Initiator: apply the answer to the offer we already set.
    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), CallError> {
        if answer.sdp_type != SdpType::Answer {
            return Err(CallError::ProtocolViolation(format!(
                "expected an answer, found an {}",
                answer.sdp_type
            )));
        }
        if !self.attempt.local_description_set {
            return Err(CallError::ProtocolViolation(
                "answer observed before the local offer was set".into(),
            ));
        }
        self.attempt
            .transport
            .set_remote_description(&answer)
            .await?;
        self.attempt.remote_description_set = true;
        self.flush_pending_candidates().await;
        self.transition(NegotiationTransition::RemoteAnswerApplied)?;
        Ok(())
    }

    async fn on_snapshot(&mut self, snapshot: ChannelSnapshot) {
        let (Some(role), Some(call_id)) = (self.attempt.role, self.attempt.call_id.clone()) else {
            debug!("snapshot with no call bound, ignoring");
            return;
        };
        let remote_type = role.remote_description_type();
        let Some(desc) = snapshot.description(remote_type).cloned() else {
            trace!("snapshot of {call_id} has no {remote_type} yet");
            return;
        };
        if self.attempt.remote_description_set {
            trace!("remote {remote_type} for {call_id} already applied");
            return;
        }
        if Some(desc.sdp_type) == self.attempt.written {
            debug!("ignoring our own {} echoed back on {call_id}", desc.sdp_type);
            return;
        }

        let result = match role {
            Role::Initiator => self.apply_answer(desc).await,
            Role::Responder => self.accept_offer(&call_id, desc).await,
        };
        if let Err(e) = result {
            self.fail(e).await;
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        if !self.attempt.known_remote.insert(candidate.clone()) {
            trace!("duplicate remote candidate {}", candidate.candidate);
            return;
        }
        if self.attempt.remote_description_set {
            self.apply_remote_candidate(&candidate).await;
        } else {
            debug!(
                "queueing remote candidate until the remote description is set ({} pending)",
                self.attempt.pending_remote.len() + 1
            );
            self.attempt.pending_remote.push(candidate);
        }
    }

    async fn apply_remote_candidate(&mut self, candidate: &IceCandidate) {
        if let Err(e) = self.attempt.transport.add_ice_candidate(candidate).await {
            self.report(CallError::ProtocolViolation(format!(
                "transport rejected remote candidate {}: {e}",
                candidate.candidate
            )));
        }
    }

    async fn flush_pending_candidates(&mut self) {
        let pending = std::mem::take(&mut self.attempt.pending_remote);
        if !pending.is_empty() {
            debug!("applying {} queued remote candidates", pending.len());
        }
        for candidate in pending {
            self.apply_remote_candidate(&candidate).await;
        }
    }

    async fn on_local_candidate(&mut self, candidate: IceCandidate) {
        if !self.attempt.local_description_set {
            self.report(CallError::ProtocolViolation(format!(
                "local candidate {} gathered before the local description was set",
                candidate.candidate
            )));
            return;
        }
        let (Some(role), Some(call_id)) = (self.attempt.role, self.attempt.call_id.clone()) else {
            return;
        };
        let _ = self
            .shared
            .events
            .ice_candidate
            .send(Arc::new(candidate.clone()));
        if let Err(e) = self
            .relay
            .publish(&call_id, role.local_candidates(), &candidate)
            .await
        {
            self.report(e);
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IceCandidate(candidate) => self.on_local_candidate(candidate).await,
            TransportEvent::Track(track) => {
                let added = self.shared.remote_tracks.write().await.add(track.clone());
                if added {
                    info!("remote {:?} track {} added", track.kind(), track.id());
                    let _ = self.shared.events.track_added.send(track);
                }
            }
            TransportEvent::ConnectionStateChanged(PeerConnectionState::Connected) => {
                if self.state() == NegotiationState::Negotiating {
                    let _ = self.transition(NegotiationTransition::TransportConnected);
                } else {
                    debug!("transport connected while {:?}", self.state());
                }
            }
            TransportEvent::ConnectionStateChanged(
                state @ (PeerConnectionState::Failed | PeerConnectionState::Closed),
            ) => {
                self.report(CallError::TransportFatal(TransportError::Failed(format!(
                    "connection {state:?}"
                ))));
                self.close(CloseReason::TransportFailed).await;
            }
            TransportEvent::ConnectionStateChanged(state) => {
                debug!("transport for {} is {state:?}", self.label());
            }
        }
    }

    async fn on_timeout(&mut self) {
        let Some(timeout) = self.config.negotiation_timeout else {
            return;
        };
        if !self.state().is_active() || self.state().is_connected() {
            return;
        }
        self.report(CallError::NegotiationTimeout(timeout));
        self.close(CloseReason::TimedOut).await;
    }

    fn arm_timeout(&mut self) {
        let Some(timeout) = self.config.negotiation_timeout else {
            return;
        };
        let tx = self.inputs.clone();
        let generation = self.attempt.generation;
        self.attempt.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(EngineInput::Notification {
                generation,
                notification: Notification::TimedOut,
            });
        }));
    }

    fn forward_snapshots(&mut self, mut feed: ChannelFeed) {
        let tx = self.inputs.clone();
        let generation = self.attempt.generation;
        self.attempt.listeners.push(feed.guard());
        self.attempt.tasks.push(tokio::spawn(async move {
            while let Some(snapshot) = feed.next().await {
                let input = EngineInput::Notification {
                    generation,
                    notification: Notification::Snapshot(snapshot),
                };
                if tx.send(input).is_err() {
                    break;
                }
            }
        }));
    }

    fn forward_candidates(&mut self, mut feed: CandidateFeed) {
        let tx = self.inputs.clone();
        let generation = self.attempt.generation;
        self.attempt.listeners.push(feed.guard());
        self.attempt.tasks.push(tokio::spawn(async move {
            while let Some(candidate) = feed.next().await {
                let input = EngineInput::Notification {
                    generation,
                    notification: Notification::RemoteCandidate(candidate),
                };
                if tx.send(input).is_err() {
                    break;
                }
            }
        }));
    }

    /// Entry action of `Closed`. Subscriptions go first so nothing can reach
    /// the transport after it is released.
    async fn close(&mut self, reason: CloseReason) {
        if self.state().is_closed() {
            debug!("negotiation {} already closed ({reason:?})", self.label());
            return;
        }
        for listener in self.attempt.listeners.drain(..) {
            listener.cancel();
        }
        for task in self.attempt.tasks.drain(..) {
            task.abort();
        }
        self.attempt.transport.close().await;
        self.attempt.pending_remote.clear();
        self.attempt.local_tracks.clear();
        self.shared.remote_tracks.write().await.clear();
        *self.shared.binding.write().await = None;

        info!("negotiation {} closing ({reason:?})", self.label());
        if let Err(e) = self.transition(NegotiationTransition::Close) {
            warn!("negotiation {}: {e}", self.label());
        }
    }

    async fn reset(&mut self) -> Result<(), CallError> {
        let state = self.state();
        if state == NegotiationState::Idle {
            return Ok(());
        }
        state.apply(NegotiationTransition::Reset)?;

        let generation = self.attempt.generation + 1;
        self.attempt = Attempt::build(self.factory.as_ref(), generation, &self.inputs).await?;
        self.shared.generation.store(generation, Ordering::SeqCst);
        self.transition(NegotiationTransition::Reset)?;
        Ok(())
    }
}
