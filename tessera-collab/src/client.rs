//! Tokio runtime for a [`Room`].
//!
//! One driver task owns the room. It selects over application commands,
//! results from the auth and socket tasks, and the room's next deadline,
//! then performs whatever effects the room asked for.
//!
//! ```text
//!  RoomClient ──commands──▶ driver ──Effect::Authenticate──▶ auth task
//!                             ▲  │
//!                             │  └──Effect::OpenSocket──▶ socket task ──▶ writer task
//!                             └────────── Transport (tagged with generation)
//! ```

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tessera_core::Document;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::auth::Authenticator;
use crate::config::{Presence, RoomConfig};
use crate::error::{AuthError, RoomError};
use crate::presence::User;
use crate::room::{ConnectionState, Effect, Room, RoomEvent};

type RoomTask = Box<dyn FnOnce(&mut Room, Instant) + Send>;
type StorageReply = oneshot::Sender<Result<Value, RoomError>>;

enum Command {
    Run(RoomTask),
    GetStorage(StorageReply),
    Shutdown,
}

/// Results reported back by spawned auth and socket tasks.
enum Transport {
    Authenticated {
        generation: u64,
        result: Result<String, AuthError>,
    },
    Opened {
        generation: u64,
        out: mpsc::UnboundedSender<Message>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
        code: u16,
        reason: String,
        clean: bool,
    },
}

/// Handle to a room running on the tokio runtime.
pub struct RoomClient {
    commands: mpsc::UnboundedSender<Command>,
    event_rx: Option<mpsc::UnboundedReceiver<RoomEvent>>,
    task: JoinHandle<()>,
}

impl RoomClient {
    /// Starts the driver task. Must be called from within a tokio runtime.
    /// The room stays closed until [`RoomClient::connect`].
    pub fn spawn(config: RoomConfig, auth: Arc<dyn Authenticator>) -> Self {
        let mut room = Room::new(config);
        let event_rx = room.take_event_rx();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            room,
            auth,
            transport_tx,
            socket: None,
            storage_waiters: Vec::new(),
        };
        let task = tokio::spawn(driver.run(command_rx, transport_rx));

        Self {
            commands,
            event_rx,
            task,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<RoomEvent>> {
        self.event_rx.take()
    }

    fn run(&self, f: impl FnOnce(&mut Room, Instant) + Send + 'static) -> Result<(), RoomError> {
        self.commands
            .send(Command::Run(Box::new(f)))
            .map_err(|_| RoomError::Closed)
    }

    async fn query<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Room, Instant) -> R + Send + 'static,
    ) -> Result<R, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.run(move |room, now| {
            let _ = tx.send(f(room, now));
        })?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    pub fn connect(&self) -> Result<(), RoomError> {
        self.run(|room, now| room.connect(now))
    }

    pub fn disconnect(&self) -> Result<(), RoomError> {
        self.run(|room, _| room.disconnect())
    }

    pub fn update_presence(&self, patch: Presence) -> Result<(), RoomError> {
        self.run(move |room, now| room.update_presence(patch, now))
    }

    pub fn broadcast_event(&self, event: Value) -> Result<(), RoomError> {
        self.run(move |room, now| room.broadcast_event(event, now))
    }

    pub fn network_online(&self) -> Result<(), RoomError> {
        self.run(|room, now| room.network_online(now))
    }

    pub fn page_visible(&self) -> Result<(), RoomError> {
        self.run(|room, now| room.page_visible(now))
    }

    pub async fn connection_state(&self) -> Result<ConnectionState, RoomError> {
        self.query(|room, _| room.state()).await
    }

    pub async fn presence(&self) -> Result<Presence, RoomError> {
        self.query(|room, _| room.presence().clone()).await
    }

    pub async fn others(&self) -> Result<Vec<User>, RoomError> {
        self.query(|room, _| room.others().to_vec()).await
    }

    /// Fetches storage if needed and resolves with its JSON view once loaded.
    pub async fn get_storage(&self) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::GetStorage(tx))
            .map_err(|_| RoomError::Closed)?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    /// Runs `f` on the loaded document; the ops it produces are sent.
    pub async fn with_storage<R, F>(&self, f: F) -> Result<R, RoomError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Document) -> R + Send + 'static,
    {
        self.query(move |room, now| room.with_storage(now, f)).await?
    }

    /// Disconnects and waits for the driver task to finish.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!("room task ended abnormally: {e}");
        }
    }
}

struct Driver {
    room: Room,
    auth: Arc<dyn Authenticator>,
    transport_tx: mpsc::UnboundedSender<Transport>,
    socket: Option<mpsc::UnboundedSender<Message>>,
    storage_waiters: Vec<StorageReply>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport: mpsc::UnboundedReceiver<Transport>,
    ) {
        loop {
            let deadline = self.room.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Run(task)) => task(&mut self.room, Instant::now()),
                    Some(Command::GetStorage(reply)) => self.get_storage(reply),
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = transport.recv() => self.handle_transport(event),
                _ = timer => self.room.handle_timeout(Instant::now()),
            }

            self.perform_effects();
            self.resolve_storage_waiters();
        }

        self.room.disconnect();
        self.perform_effects();
        for waiter in self.storage_waiters.drain(..) {
            let _ = waiter.send(Err(RoomError::Closed));
        }
        info!("room {} shut down", self.room.config().room_id);
    }

    fn get_storage(&mut self, reply: StorageReply) {
        match self.room.document() {
            Some(doc) => {
                let _ = reply.send(Ok(doc.to_json()));
            }
            None => {
                self.room.fetch_storage(Instant::now());
                self.storage_waiters.push(reply);
            }
        }
    }

    fn resolve_storage_waiters(&mut self) {
        if self.storage_waiters.is_empty() {
            return;
        }
        if let Some(doc) = self.room.document() {
            let json = doc.to_json();
            for waiter in self.storage_waiters.drain(..) {
                let _ = waiter.send(Ok(json.clone()));
            }
        }
    }

    fn handle_transport(&mut self, event: Transport) {
        let now = Instant::now();
        match event {
            Transport::Authenticated { generation, result } => match result {
                Ok(token) => self.room.auth_succeeded(generation, &token, now),
                Err(e) => self.room.auth_failed(generation, e, now),
            },
            Transport::Opened { generation, out } => {
                if generation == self.room.generation()
                    && self.room.state() == ConnectionState::Connecting
                {
                    self.socket = Some(out);
                    self.room.socket_opened(generation, now);
                } else {
                    debug!("closing socket opened for stale generation {generation}");
                    let _ = out.send(Message::Close(None));
                }
            }
            Transport::Frame { generation, text } => {
                self.room.socket_message(generation, &text, now);
            }
            Transport::Closed {
                generation,
                code,
                reason,
                clean,
            } => {
                if generation == self.room.generation() {
                    self.socket = None;
                }
                self.room.socket_closed(generation, code, &reason, clean, now);
            }
        }
    }

    fn perform_effects(&mut self) {
        for effect in self.room.take_effects() {
            match effect {
                Effect::Authenticate { generation } => {
                    let auth = Arc::clone(&self.auth);
                    let room_id = self.room.config().room_id.clone();
                    let tx = self.transport_tx.clone();
                    tokio::spawn(async move {
                        let result = auth.authenticate(&room_id).await;
                        let _ = tx.send(Transport::Authenticated { generation, result });
                    });
                }
                Effect::OpenSocket { generation, url } => {
                    tokio::spawn(open_socket(generation, url, self.transport_tx.clone()));
                }
                Effect::Send(text) => match &self.socket {
                    Some(out) => {
                        if out.send(Message::Text(text.into())).is_err() {
                            debug!("socket writer gone, frame dropped");
                        }
                    }
                    None => debug!("no socket, frame dropped"),
                },
                Effect::CloseSocket => {
                    if let Some(out) = self.socket.take() {
                        let _ = out.send(Message::Close(None));
                    }
                }
            }
        }
    }
}

/// Connects, then pumps inbound frames into `tx` until the socket ends.
async fn open_socket(generation: u64, url: String, tx: mpsc::UnboundedSender<Transport>) {
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!("failed to open socket: {e}");
            let _ = tx.send(Transport::Closed {
                generation,
                code: 1006,
                reason: e.to_string(),
                clean: false,
            });
            return;
        }
    };
    let (mut writer, mut reader) = stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = writer.send(message).await {
                debug!("socket write failed: {e}");
                break;
            }
            if closing {
                break;
            }
        }
    });
    if tx.send(Transport::Opened { generation, out: out_tx }).is_err() {
        return;
    }

    let (code, reason, clean) = loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame = Transport::Frame {
                    generation,
                    text: text.as_str().to_owned(),
                };
                if tx.send(frame).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned(), true),
                    None => (1005, String::new(), true),
                };
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("socket error: {e}");
                break (1006, e.to_string(), false);
            }
            None => break (1006, String::new(), false),
        }
    };
    let _ = tx.send(Transport::Closed {
        generation,
        code,
        reason,
        clean,
    });
}
