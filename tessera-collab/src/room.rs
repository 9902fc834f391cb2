//! Connection state machine for one room.
//!
//! `Room` performs no I/O. Callers feed it inputs (auth results, socket
//! events, inbound frames, the current time) and drain the [`Effect`]s it
//! asks for. Timers are deadlines: poll [`Room::next_deadline`] and call
//! [`Room::handle_timeout`] once it passes.
//!
//! ```text
//!            connect                auth ok             socket open
//!  Closed ───────────▶ Authenticating ──────▶ Connecting ──────────▶ Open
//!    ▲                     │   ▲                  │                  │
//!    │ clean close         │   │ backoff timer    │ unclean close    │
//!    │                     ▼   │                  ▼                  ▼
//!    └──────────────── Unavailable ◀─────────────────────────────────┘
//!                                      close code 4000..=4100 ──▶ Failed
//! ```
//!
//! Every connection attempt gets a new generation number. Auth and socket
//! results tagged with an older generation are dropped.

use log::{debug, info, trace, warn};
use serde_json::Value;
use std::time::Instant;
use tessera_core::{Document, NodeId, Op};
use tokio::sync::mpsc;

use crate::auth::parse_token;
use crate::config::{Presence, RoomConfig, REJECTION_CODES};
use crate::error::{AuthError, RoomError};
use crate::presence::{merge_presence, Others, OthersEvent};
use crate::protocol::{decode_frame, encode_frame, ClientMessage, ServerMessage, PING, PONG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Authenticating,
    Connecting,
    Open,
    /// Lost or never reached; a reconnect is scheduled.
    Unavailable,
    /// Rejected by the server. Only `disconnect` leaves this state.
    Failed,
}

/// Work the caller must perform on behalf of the room.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Obtain a token and report it with `auth_succeeded`/`auth_failed`.
    Authenticate { generation: u64 },
    OpenSocket { generation: u64, url: String },
    /// Send one text frame on the open socket.
    Send(String),
    CloseSocket,
}

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Connection(ConnectionState),
    MyPresence(Presence),
    Others(OthersEvent),
    /// Payload broadcast by another participant.
    Event { actor: u64, event: Value },
    Error(RoomError),
    StorageLoaded,
    /// Nodes changed by a batch of remote ops.
    StorageUpdated(Vec<NodeId>),
}

/// Identity granted by the last successful authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub actor: u64,
    pub id: Option<String>,
    pub info: Option<Value>,
}

/// Outgoing messages waiting for the next flush.
#[derive(Debug, Default)]
struct Buffer {
    /// Presence delta accumulated since the last flush.
    presence: Option<Presence>,
    messages: Vec<ClientMessage>,
    storage_ops: Vec<Op>,
}

impl Buffer {
    fn is_empty(&self) -> bool {
        self.presence.is_none() && self.messages.is_empty() && self.storage_ops.is_empty()
    }

    fn has_fetch(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m, ClientMessage::FetchStorage))
    }

    fn take(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 2);
        if let Some(data) = self.presence.take() {
            out.push(ClientMessage::UpdatePresence {
                data,
                target_actor: None,
            });
        }
        out.append(&mut self.messages);
        if !self.storage_ops.is_empty() {
            out.push(ClientMessage::UpdateStorage {
                ops: std::mem::take(&mut self.storage_ops),
            });
        }
        out
    }
}

#[derive(Debug, Default)]
struct Timers {
    flush: Option<Instant>,
    heartbeat: Option<Instant>,
    pong: Option<Instant>,
    reconnect: Option<Instant>,
}

impl Timers {
    fn clear(&mut self) {
        *self = Self::default();
    }

    fn next(&self) -> Option<Instant> {
        [self.flush, self.heartbeat, self.pong, self.reconnect]
            .into_iter()
            .flatten()
            .min()
    }
}

fn due(timer: Option<Instant>, now: Instant) -> bool {
    timer.is_some_and(|at| at <= now)
}

pub struct Room {
    config: RoomConfig,
    state: ConnectionState,
    generation: u64,
    retries: usize,
    session: Option<Session>,
    me: Presence,
    others: Others,
    buffer: Buffer,
    last_flush: Option<Instant>,
    timers: Timers,
    document: Option<Document>,
    storage_requested: bool,
    effects: Vec<Effect>,
    event_tx: mpsc::UnboundedSender<RoomEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<RoomEvent>>,
}

impl Room {
    pub fn new(config: RoomConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            me: config.initial_presence.clone(),
            config,
            state: ConnectionState::Closed,
            generation: 0,
            retries: 0,
            session: None,
            others: Others::new(),
            buffer: Buffer::default(),
            last_flush: None,
            timers: Timers::default(),
            document: None,
            storage_requested: false,
            effects: Vec::new(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<RoomEvent>> {
        self.event_rx.take()
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Failed attempts since the socket was last open.
    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn presence(&self) -> &Presence {
        &self.me
    }

    pub fn others(&self) -> &Others {
        &self.others
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn connect(&mut self, _now: Instant) {
        if !matches!(
            self.state,
            ConnectionState::Closed | ConnectionState::Unavailable
        ) {
            debug!("connect ignored in state {:?}", self.state);
            return;
        }
        self.generation += 1;
        self.timers.reconnect = None;
        self.set_state(ConnectionState::Authenticating);
        self.effects.push(Effect::Authenticate {
            generation: self.generation,
        });
    }

    pub fn auth_succeeded(&mut self, generation: u64, token: &str, now: Instant) {
        if !self.is_current(generation, ConnectionState::Authenticating) {
            debug!("dropping late auth result for generation {generation}");
            return;
        }
        let claims = match parse_token(token) {
            Ok(claims) => claims,
            Err(e) => return self.fail_auth(e, now),
        };
        info!("authenticated as actor {}", claims.actor);
        if let Some(doc) = self.document.as_mut() {
            doc.set_actor(claims.actor);
        }
        self.session = Some(Session {
            actor: claims.actor,
            id: claims.id,
            info: claims.info,
        });
        self.set_state(ConnectionState::Connecting);
        self.effects.push(Effect::OpenSocket {
            generation,
            url: self.config.socket_url(token),
        });
    }

    pub fn auth_failed(&mut self, generation: u64, error: AuthError, now: Instant) {
        if !self.is_current(generation, ConnectionState::Authenticating) {
            debug!("dropping late auth failure for generation {generation}");
            return;
        }
        self.fail_auth(error, now);
    }

    fn fail_auth(&mut self, error: AuthError, now: Instant) {
        warn!("authentication failed: {error}");
        self.schedule_reconnect(now);
    }

    pub fn socket_opened(&mut self, generation: u64, now: Instant) {
        if !self.is_current(generation, ConnectionState::Connecting) {
            debug!("dropping late socket for generation {generation}");
            return;
        }
        self.set_state(ConnectionState::Open);
        self.retries = 0;
        self.timers.heartbeat = Some(now + self.config.heartbeat_interval);
        // Replaces any pending delta.
        self.buffer.presence = Some(self.me.clone());
        if self.storage_requested && self.document.is_none() && !self.buffer.has_fetch() {
            self.buffer.messages.push(ClientMessage::FetchStorage);
        }
        self.flush(now);
    }

    pub fn socket_closed(
        &mut self,
        generation: u64,
        code: u16,
        reason: &str,
        clean: bool,
        now: Instant,
    ) {
        if generation != self.generation {
            debug!("ignoring close of stale socket (generation {generation})");
            return;
        }
        self.timers.clear();
        self.reset_others();
        if REJECTION_CODES.contains(&code) {
            warn!("room rejected connection ({code}): {reason}");
            self.set_state(ConnectionState::Failed);
            self.emit(RoomEvent::Error(RoomError::Rejected {
                code,
                reason: reason.to_string(),
            }));
        } else if !clean {
            warn!("socket closed uncleanly ({code}): {reason}");
            self.schedule_reconnect(now);
        } else {
            info!("socket closed ({code})");
            self.set_state(ConnectionState::Closed);
        }
    }

    /// Closes the socket on purpose. Pending results of the current attempt
    /// are dropped.
    pub fn disconnect(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            self.effects.push(Effect::CloseSocket);
        }
        self.generation += 1;
        self.retries = 0;
        self.timers.clear();
        self.reset_others();
        self.set_state(ConnectionState::Closed);
    }

    /// Network came back.
    pub fn network_online(&mut self, now: Instant) {
        if self.state == ConnectionState::Unavailable {
            self.connect(now);
        }
    }

    /// The application became visible again.
    pub fn page_visible(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Unavailable => self.connect(now),
            ConnectionState::Open => self.heartbeat(now),
            _ => {}
        }
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        if due(self.timers.reconnect, now) {
            self.timers.reconnect = None;
            self.connect(now);
        }
        if due(self.timers.pong, now) {
            warn!("no pong within {:?}, reconnecting", self.config.pong_timeout);
            self.timers.pong = None;
            self.reconnect_now(now);
        }
        if due(self.timers.heartbeat, now) {
            self.heartbeat(now);
        }
        if due(self.timers.flush, now) {
            self.timers.flush = None;
            self.flush(now);
        }
    }

    fn heartbeat(&mut self, now: Instant) {
        if self.state != ConnectionState::Open {
            return;
        }
        trace!("ping");
        self.effects.push(Effect::Send(PING.to_string()));
        self.timers.pong = Some(now + self.config.pong_timeout);
        self.timers.heartbeat = Some(now + self.config.heartbeat_interval);
    }

    fn reconnect_now(&mut self, now: Instant) {
        self.effects.push(Effect::CloseSocket);
        self.timers.clear();
        self.reset_others();
        self.set_state(ConnectionState::Unavailable);
        self.connect(now);
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        let delay = self.config.backoff_delay(self.retries);
        self.retries += 1;
        info!("reconnecting in {delay:?} (attempt {})", self.retries);
        self.timers.reconnect = Some(now + delay);
        self.set_state(ConnectionState::Unavailable);
    }

    fn is_current(&self, generation: u64, state: ConnectionState) -> bool {
        generation == self.generation && self.state == state
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!("room {}: {:?} -> {:?}", self.config.room_id, self.state, state);
            self.state = state;
            self.emit(RoomEvent::Connection(state));
        }
    }

    fn reset_others(&mut self) {
        let event = self.others.clear();
        self.emit(RoomEvent::Others(event));
    }

    fn emit(&self, event: RoomEvent) {
        // The receiver may have been dropped; events are best effort.
        let _ = self.event_tx.send(event);
    }

    // ------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------

    pub fn socket_message(&mut self, generation: u64, text: &str, now: Instant) {
        if !self.is_current(generation, ConnectionState::Open) {
            debug!("dropping frame from stale socket (generation {generation})");
            return;
        }
        if text == PONG {
            self.timers.pong = None;
            return;
        }
        let messages = match decode_frame(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("malformed frame: {e}");
                self.emit(RoomEvent::Error(RoomError::Protocol(e.to_string())));
                return;
            }
        };
        for message in messages {
            self.handle_message(message);
        }
        self.flush(now);
    }

    fn own_actor(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.actor)
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::UpdatePresence { actor, data, .. } => {
                let event = self.others.update_presence(actor, data);
                self.emit(RoomEvent::Others(event));
            }
            ServerMessage::UserJoined { actor, id, info } => {
                let event = self.others.join(actor, id, info);
                self.emit(RoomEvent::Others(event));
                self.buffer.messages.push(ClientMessage::UpdatePresence {
                    data: self.me.clone(),
                    target_actor: Some(actor),
                });
            }
            ServerMessage::UserLeft { actor } => {
                if let Some(event) = self.others.leave(actor) {
                    self.emit(RoomEvent::Others(event));
                }
            }
            ServerMessage::Event { actor, event } => {
                self.emit(RoomEvent::Event { actor, event });
            }
            ServerMessage::RoomState { users } => {
                let me = self.own_actor();
                let mut roster = Vec::with_capacity(users.len());
                for (key, user) in users {
                    match key.parse::<u64>() {
                        Ok(actor) if Some(actor) == me => {}
                        Ok(actor) => roster.push((actor, user.id, user.info)),
                        Err(_) => warn!("room state lists non-numeric actor {key:?}"),
                    }
                }
                let event = self.others.reset(roster);
                self.emit(RoomEvent::Others(event));
            }
            ServerMessage::InitialStorageState { items } => self.load_storage(items),
            ServerMessage::UpdateStorage { ops } => self.apply_storage(ops),
        }
    }

    fn load_storage(&mut self, items: Vec<tessera_core::SnapshotItem>) {
        if self.document.is_some() {
            debug!("storage already loaded, ignoring initial state");
            return;
        }
        let actor = self.own_actor().unwrap_or_default();
        match Document::load(actor, items) {
            Ok(doc) => {
                info!("storage loaded ({} nodes)", doc.len());
                self.document = Some(doc);
                self.emit(RoomEvent::StorageLoaded);
            }
            Err(e) => {
                warn!("invalid storage snapshot: {e}");
                self.emit(RoomEvent::Error(RoomError::Crdt(e)));
            }
        }
    }

    fn apply_storage(&mut self, ops: Vec<Op>) {
        let Some(doc) = self.document.as_mut() else {
            debug!("storage not loaded, dropping {} ops", ops.len());
            return;
        };
        match doc.apply_remote(ops) {
            Ok(modified) => {
                if !modified.is_empty() {
                    self.emit(RoomEvent::StorageUpdated(modified));
                }
            }
            Err(e) => {
                warn!("remote ops rejected: {e}");
                self.emit(RoomEvent::Error(RoomError::Crdt(e)));
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Shallow-merges `patch` into this client's presence and queues it.
    pub fn update_presence(&mut self, patch: Presence, now: Instant) {
        merge_presence(&mut self.me, &patch);
        match self.buffer.presence.as_mut() {
            Some(pending) => merge_presence(pending, &patch),
            None => self.buffer.presence = Some(patch),
        }
        self.emit(RoomEvent::MyPresence(self.me.clone()));
        self.flush(now);
    }

    pub fn broadcast_event(&mut self, event: Value, now: Instant) {
        self.buffer.messages.push(ClientMessage::ClientEvent { event });
        self.flush(now);
    }

    /// Asks the server for the storage snapshot, once.
    pub fn fetch_storage(&mut self, now: Instant) {
        if self.document.is_some() || self.storage_requested {
            return;
        }
        self.storage_requested = true;
        self.buffer.messages.push(ClientMessage::FetchStorage);
        self.flush(now);
    }

    /// Runs `f` against the loaded document and queues the ops it produced.
    pub fn with_storage<R>(
        &mut self,
        now: Instant,
        f: impl FnOnce(&mut Document) -> R,
    ) -> Result<R, RoomError> {
        let doc = self.document.as_mut().ok_or(RoomError::StorageNotLoaded)?;
        let result = f(doc);
        let ops = doc.take_outbox();
        if !ops.is_empty() {
            self.buffer.storage_ops.extend(ops);
            self.flush(now);
        }
        Ok(result)
    }

    /// Sends the buffer if the throttle window has passed, otherwise arms
    /// the flush timer. Does nothing unless open.
    fn flush(&mut self, now: Instant) {
        if self.state != ConnectionState::Open || self.buffer.is_empty() {
            return;
        }
        if let Some(last) = self.last_flush {
            let ready_at = last + self.config.throttle;
            if now < ready_at {
                self.timers.flush = Some(ready_at);
                return;
            }
        }
        let messages = self.buffer.take();
        match encode_frame(&messages) {
            Ok(text) => {
                trace!("flushing {} messages", messages.len());
                self.effects.push(Effect::Send(text));
            }
            Err(e) => warn!("failed to encode outgoing frame: {e}"),
        }
        self.last_flush = Some(now);
        self.timers.flush = None;
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("room_id", &self.config.room_id)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("retries", &self.retries)
            .field("others", &self.others.len())
            .field("storage_loaded", &self.document.is_some())
            .finish()
    }
}
