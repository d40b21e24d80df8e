//! Connection registry: who is connected and which room they sit in.
//!
//! # Architecture
//!
//! ```text
//!   register / unregister          join_room / leave_room / lookups
//!          │ (bounded queues)                │ (synchronous)
//!          ▼                                 ▼
//!   ┌──────────────┐   apply     ┌───────────────────────────────┐
//!   │ worker pool  │ ──────────▶ │ HubState (one RwLock)         │
//!   └──────────────┘             │  clients:  ClientId → Client  │
//!                                │  users:    UserId   → ClientId│
//!                                │  rooms:    RoomId   → {Client}│
//!                                └───────────────────────────────┘
//! ```
//!
//! [`Hub::register_and_wait`] resolves once a worker has applied the
//! registration, so a caller can serve the connection knowing that room
//! operations on it will find it.
//!
//! A user has at most one live connection. Registering a newer connection
//! for the same user evicts the older one (removed from its room, then
//! closed). Rooms exist only while they have members.
//!
//! The lock guards connection bookkeeping only and is never held across an
//! `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::domain::foundation::{ClientId, RoomId, UserId};

use super::client::Client;

/// Sizing of the register/unregister pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Number of worker tasks draining the queues.
    pub workers: usize,
    /// Capacity of each of the register and unregister queues.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

#[derive(Default)]
struct HubState {
    clients: HashMap<ClientId, Arc<Client>>,
    users: HashMap<UserId, ClientId>,
    rooms: HashMap<RoomId, HashSet<ClientId>>,
    client_rooms: HashMap<ClientId, RoomId>,
}

impl HubState {
    /// Removes a client from its room, deleting the room if it empties.
    fn detach_from_room(&mut self, client_id: ClientId) -> Option<RoomId> {
        let room_id = self.client_rooms.remove(&client_id)?;
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.remove(&client_id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
        Some(room_id)
    }

    /// Drops every trace of a client. Returns the handle if it was registered.
    fn remove_client(&mut self, client_id: ClientId) -> Option<Arc<Client>> {
        let client = self.clients.remove(&client_id)?;
        self.detach_from_room(client_id);
        if self.users.get(&client.user_id()) == Some(&client_id) {
            self.users.remove(&client.user_id());
        }
        Some(client)
    }

    fn publish_gauges(&self) {
        gauge!("hub_connections").set(self.clients.len() as f64);
        gauge!("hub_rooms").set(self.rooms.len() as f64);
    }
}

/// A queued registration and, when the caller waits, where to report it.
struct PendingRegistration {
    client: Arc<Client>,
    applied: Option<oneshot::Sender<bool>>,
}

/// Registry of live connections and room membership.
pub struct Hub {
    state: Arc<RwLock<HubState>>,
    register_tx: mpsc::Sender<PendingRegistration>,
    unregister_tx: mpsc::Sender<Arc<Client>>,
}

impl Hub {
    /// Creates the hub and spawns its worker pool.
    ///
    /// Workers exit when `shutdown` is cancelled. Must be called inside a
    /// Tokio runtime.
    pub fn start(config: HubConfig, shutdown: CancellationToken) -> Arc<Self> {
        let capacity = config.queue_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);

        let state = Arc::new(RwLock::new(HubState::default()));
        let register_rx = Arc::new(Mutex::new(register_rx));
        let unregister_rx = Arc::new(Mutex::new(unregister_rx));

        for worker in 0..config.workers.max(1) {
            tokio::spawn(run_worker(
                worker,
                state.clone(),
                register_rx.clone(),
                unregister_rx.clone(),
                shutdown.clone(),
            ));
        }

        tracing::debug!(
            workers = config.workers.max(1),
            queue_capacity = capacity,
            "Hub started"
        );

        Arc::new(Self {
            state,
            register_tx,
            unregister_tx,
        })
    }

    /// Submits a connection for registration without waiting.
    ///
    /// Returns `false` when the queue is full; the caller must then close
    /// the connection.
    pub fn register(&self, client: Arc<Client>) -> bool {
        self.enqueue(PendingRegistration { client, applied: None })
    }

    /// Submits a connection and waits until a worker has applied it.
    ///
    /// Returns `false` when the queue is full, when the hub shuts down
    /// first, or when the worker dropped the registration because the
    /// connection was already closed or superseded.
    pub async fn register_and_wait(&self, client: Arc<Client>) -> bool {
        let (applied_tx, applied_rx) = oneshot::channel();
        let pending = PendingRegistration {
            client,
            applied: Some(applied_tx),
        };
        if !self.enqueue(pending) {
            return false;
        }
        applied_rx.await.unwrap_or(false)
    }

    fn enqueue(&self, pending: PendingRegistration) -> bool {
        match self.register_tx.try_send(pending) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(PendingRegistration { client, .. })) => {
                counter!("hub_queue_rejections_total", "queue" => "register").increment(1);
                tracing::warn!(
                    client_id = %client.id(),
                    user_id = %client.user_id(),
                    "Register queue full, rejecting connection"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(PendingRegistration { client, .. })) => {
                tracing::warn!(client_id = %client.id(), "Hub is shut down, rejecting connection");
                false
            }
        }
    }

    /// Submits a connection for removal and closes it.
    ///
    /// When the queue is full the removal is applied inline; it only
    /// touches the maps, so the caller is never blocked on the workers.
    pub fn unregister(&self, client: &Arc<Client>) {
        client.close();
        match self.unregister_tx.try_send(client.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(client))
            | Err(mpsc::error::TrySendError::Closed(client)) => {
                counter!("hub_queue_rejections_total", "queue" => "unregister").increment(1);
                apply_unregister(&self.state, &client);
            }
        }
    }

    /// Moves a registered connection into `room_id`, leaving its previous room.
    ///
    /// Returns `false` if the connection is not (or no longer) registered.
    pub fn join_room(&self, client: &Client, room_id: RoomId) -> bool {
        let mut state = self.write();
        if !state.clients.contains_key(&client.id()) {
            return false;
        }

        state.detach_from_room(client.id());
        state
            .rooms
            .entry(room_id.clone())
            .or_default()
            .insert(client.id());
        state.client_rooms.insert(client.id(), room_id.clone());
        state.publish_gauges();

        tracing::debug!(client_id = %client.id(), room_id = %room_id, "Client joined room");
        true
    }

    /// Removes a connection from its room. Returns the room it left.
    pub fn leave_room(&self, client: &Client) -> Option<RoomId> {
        let mut state = self.write();
        let left = state.detach_from_room(client.id());
        state.publish_gauges();

        if let Some(room_id) = &left {
            tracing::debug!(client_id = %client.id(), room_id = %room_id, "Client left room");
        }
        left
    }

    /// The live connection of a user, if any.
    pub fn client_for_user(&self, user_id: UserId) -> Option<Arc<Client>> {
        let state = self.read();
        state
            .users
            .get(&user_id)
            .and_then(|client_id| state.clients.get(client_id))
            .cloned()
    }

    /// Every connection currently in a room.
    pub fn clients_in_room(&self, room_id: &RoomId) -> Vec<Arc<Client>> {
        let state = self.read();
        state
            .rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|client_id| state.clients.get(client_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every registered connection.
    pub fn all_clients(&self) -> Vec<Arc<Client>> {
        self.read().clients.values().cloned().collect()
    }

    /// The room a connection is in.
    pub fn room_of(&self, client_id: ClientId) -> Option<RoomId> {
        self.read().client_rooms.get(&client_id).cloned()
    }

    pub fn is_registered(&self, client_id: ClientId) -> bool {
        self.read().clients.contains_key(&client_id)
    }

    pub fn client_count(&self) -> usize {
        self.read().clients.len()
    }

    pub fn room_count(&self) -> usize {
        self.read().rooms.len()
    }

    /// Number of connections in a room (0 if the room does not exist).
    pub fn room_size(&self, room_id: &RoomId) -> usize {
        self.read().rooms.get(room_id).map(HashSet::len).unwrap_or(0)
    }

    /// True when at least one local connection is in the room.
    pub fn has_local_members(&self, room_id: &RoomId) -> bool {
        self.room_size(room_id) > 0
    }

    /// All rooms with at least one member (for monitoring/debugging).
    pub fn active_rooms(&self) -> Vec<RoomId> {
        self.read().rooms.keys().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, HubState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HubState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_worker(
    worker: usize,
    state: Arc<RwLock<HubState>>,
    register_rx: Arc<Mutex<mpsc::Receiver<PendingRegistration>>>,
    unregister_rx: Arc<Mutex<mpsc::Receiver<Arc<Client>>>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            next = async { unregister_rx.lock().await.recv().await } => match next {
                Some(client) => apply_unregister(&state, &client),
                None => break,
            },

            next = async { register_rx.lock().await.recv().await } => match next {
                Some(PendingRegistration { client, applied }) => {
                    let registered = apply_register(&state, client);
                    if let Some(applied) = applied {
                        let _ = applied.send(registered);
                    }
                }
                None => break,
            },
        }
    }

    tracing::debug!(worker, "Hub worker stopped");
}

/// Returns whether the connection ended up in the registry.
fn apply_register(state: &RwLock<HubState>, client: Arc<Client>) -> bool {
    let mut state = state.write().unwrap_or_else(PoisonError::into_inner);

    // Unregistered before the worker got to it.
    if client.is_closed() {
        return false;
    }

    let user_id = client.user_id();
    if let Some(existing_id) = state.users.get(&user_id).copied() {
        if let Some(existing) = state.clients.get(&existing_id).cloned() {
            if existing.sequence() > client.sequence() {
                // A newer connection for this user already won.
                drop(state);
                tracing::debug!(client_id = %client.id(), user_id = %user_id, "Stale registration dropped");
                client.close();
                return false;
            }
        }
        if let Some(evicted) = state.remove_client(existing_id) {
            tracing::info!(
                user_id = %user_id,
                old_client_id = %evicted.id(),
                new_client_id = %client.id(),
                "Superseding existing connection"
            );
            evicted.close();
        }
    }

    state.users.insert(user_id, client.id());
    state.clients.insert(client.id(), client.clone());
    state.publish_gauges();

    tracing::debug!(client_id = %client.id(), user_id = %user_id, "Client registered");
    true
}

fn apply_unregister(state: &RwLock<HubState>, client: &Arc<Client>) {
    let mut state = state.write().unwrap_or_else(PoisonError::into_inner);

    // Only remove the entry if it is this exact connection; a newer one for
    // the same user may already have replaced it.
    if state.remove_client(client.id()).is_some() {
        state.publish_gauges();
        tracing::debug!(client_id = %client.id(), user_id = %client.user_id(), "Client unregistered");
    }
    client.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::client::Frame;
    use std::time::Duration;

    fn user(id: u64) -> UserId {
        UserId::from_raw(id).unwrap()
    }

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn hub() -> Arc<Hub> {
        Hub::start(HubConfig { workers: 2, queue_capacity: 16 }, CancellationToken::new())
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    async fn connect(hub: &Hub, user_id: u64) -> (Arc<Client>, mpsc::Receiver<Frame>) {
        let (client, rx) = Client::new(user(user_id), 8);
        assert!(hub.register(client.clone()));
        let id = client.id();
        eventually(|| hub.is_registered(id)).await;
        (client, rx)
    }

    #[tokio::test]
    async fn register_then_lookup_by_user() {
        let hub = hub();
        let (client, _rx) = connect(&hub, 1).await;

        let found = hub.client_for_user(user(1)).unwrap();
        assert_eq!(found.id(), client.id());
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn second_connection_evicts_first() {
        let hub = hub();
        let (first, _rx1) = connect(&hub, 1).await;
        assert!(hub.join_room(&first, room("R1")));

        let (second, _rx2) = connect(&hub, 1).await;

        assert!(first.is_closed());
        assert!(!hub.is_registered(first.id()));
        assert_eq!(hub.client_for_user(user(1)).unwrap().id(), second.id());
        assert_eq!(hub.room_size(&room("R1")), 0);
        assert_eq!(hub.room_count(), 0);
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn older_registration_never_replaces_newer() {
        let hub = hub();
        let (older, _a) = Client::new(user(1), 8);
        let (newer, _rx) = connect(&hub, 1).await;

        assert!(!apply_register(&hub.state, older.clone()));

        assert!(older.is_closed());
        assert_eq!(hub.client_for_user(user(1)).unwrap().id(), newer.id());
    }

    #[tokio::test]
    async fn joining_new_room_leaves_old_one() {
        let hub = hub();
        let (client, _rx) = connect(&hub, 1).await;

        hub.join_room(&client, room("R1"));
        hub.join_room(&client, room("R2"));

        assert_eq!(hub.room_of(client.id()), Some(room("R2")));
        assert!(!hub.has_local_members(&room("R1")));
        assert_eq!(hub.active_rooms(), vec![room("R2")]);
    }

    #[tokio::test]
    async fn leave_room_deletes_empty_room() {
        let hub = hub();
        let (a, _ra) = connect(&hub, 1).await;
        let (b, _rb) = connect(&hub, 2).await;
        hub.join_room(&a, room("R1"));
        hub.join_room(&b, room("R1"));

        assert_eq!(hub.leave_room(&a), Some(room("R1")));
        assert_eq!(hub.room_size(&room("R1")), 1);

        hub.leave_room(&b);
        assert_eq!(hub.room_count(), 0);
        assert_eq!(hub.leave_room(&b), None);
    }

    #[tokio::test]
    async fn join_requires_registration() {
        let hub = hub();
        let (client, _rx) = Client::new(user(1), 8);
        assert!(!hub.join_room(&client, room("R1")));
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn unregister_removes_everything_and_closes() {
        let hub = hub();
        let (client, _rx) = connect(&hub, 1).await;
        hub.join_room(&client, room("R1"));

        hub.unregister(&client);
        let id = client.id();
        eventually(|| !hub.is_registered(id)).await;

        assert!(client.is_closed());
        assert!(hub.client_for_user(user(1)).is_none());
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_connection() {
        let hub = hub();
        let (first, _rx1) = connect(&hub, 1).await;
        let (second, _rx2) = connect(&hub, 1).await;

        apply_unregister(&hub.state, &first);

        assert_eq!(hub.client_for_user(user(1)).unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn unregister_before_register_is_applied() {
        let hub = hub();
        let (client, _rx) = Client::new(user(1), 8);
        client.close();

        assert!(!apply_register(&hub.state, client.clone()));

        assert!(!hub.is_registered(client.id()));
    }

    #[tokio::test]
    async fn acknowledged_registration_is_visible_immediately() {
        let hub = hub();
        let (client, _rx) = Client::new(user(1), 8);

        assert!(hub.register_and_wait(client.clone()).await);

        assert!(hub.is_registered(client.id()));
        assert!(hub.join_room(&client, room("R1")));
    }

    #[tokio::test]
    async fn acknowledged_registration_of_closed_client_fails() {
        let hub = hub();
        let (client, _rx) = Client::new(user(1), 8);
        client.close();

        assert!(!hub.register_and_wait(client.clone()).await);
        assert!(!hub.is_registered(client.id()));
    }

    #[tokio::test]
    async fn acknowledged_registration_fails_after_shutdown() {
        let shutdown = CancellationToken::new();
        let hub = Hub::start(HubConfig { workers: 1, queue_capacity: 4 }, shutdown.clone());
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (client, _rx) = Client::new(user(1), 8);
        assert!(!hub.register_and_wait(client).await);
    }

    #[tokio::test]
    async fn full_register_queue_rejects() {
        // Single-threaded runtime: workers cannot drain until we yield.
        let hub = Hub::start(HubConfig { workers: 1, queue_capacity: 1 }, CancellationToken::new());

        let (a, _ra) = Client::new(user(1), 1);
        let (b, _rb) = Client::new(user(2), 1);

        assert!(hub.register(a));
        assert!(!hub.register(b));
    }

    #[tokio::test]
    async fn clients_in_room_only_lists_members() {
        let hub = hub();
        let (a, _ra) = connect(&hub, 1).await;
        let (b, _rb) = connect(&hub, 2).await;
        let (_c, _rc) = connect(&hub, 3).await;
        hub.join_room(&a, room("R1"));
        hub.join_room(&b, room("R1"));

        let mut members: Vec<UserId> =
            hub.clients_in_room(&room("R1")).iter().map(|c| c.user_id()).collect();
        members.sort();

        assert_eq!(members, vec![user(1), user(2)]);
        assert_eq!(hub.all_clients().len(), 3);
        assert!(hub.clients_in_room(&room("nowhere")).is_empty());
    }
}
