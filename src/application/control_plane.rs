//! Server-to-server notifications from the room and game services.
//!
//! The room service and the rules engine call `POST /internal/notify` after
//! they change something. This module turns each notification into the
//! right set of envelopes:
//!
//! | action                                   | audience                                          |
//! |------------------------------------------|---------------------------------------------------|
//! | `room_created`, `room_deleted`           | every connection (lobby)                          |
//! | `room_joined`, `room_left`, `room_updated` | the room, plus each player in the snapshot      |
//! | game lifecycle actions                   | each player (own view), then the rest of the room |

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::adapters::websocket::Broadcaster;
use crate::domain::foundation::{DomainError, ErrorCode, RoomId, UserId};
use crate::domain::game::GameState;
use crate::domain::realtime::{room_snapshot_player_ids, Envelope, GameEvent};
use crate::ports::{lock_key, GameStateManager, LockProvider, RetryPolicy};

use super::locking::with_lock_policy;

/// Body of `POST /internal/notify`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub room_id: String,
    /// The acting user; `0` or absent means none.
    #[serde(default)]
    pub user_id: Option<u64>,
    /// Room snapshot as known by the room service.
    #[serde(default)]
    pub room: Option<Value>,
    /// Timer details for `timer_start`.
    #[serde(default)]
    pub timer: Option<Value>,
}

/// Notification actions understood by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    RoomCreated,
    RoomDeleted,
    RoomJoined,
    RoomLeft,
    RoomUpdated,
    GameStateUpdate,
    GameStarted,
    GameEnd,
    TimerStart,
    TimerStop,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::RoomCreated => "room_created",
            ControlAction::RoomDeleted => "room_deleted",
            ControlAction::RoomJoined => "room_joined",
            ControlAction::RoomLeft => "room_left",
            ControlAction::RoomUpdated => "room_updated",
            ControlAction::GameStateUpdate => "game_state_update",
            ControlAction::GameStarted => "game_started",
            ControlAction::GameEnd => "game_end",
            ControlAction::TimerStart => "timer_start",
            ControlAction::TimerStop => "timer_stop",
        }
    }

    /// Whether the request must name the acting user.
    pub fn requires_user(&self) -> bool {
        !matches!(
            self,
            ControlAction::GameEnd | ControlAction::RoomCreated | ControlAction::RoomDeleted
        )
    }

    fn is_lobby(&self) -> bool {
        matches!(self, ControlAction::RoomCreated | ControlAction::RoomDeleted)
    }
}

impl FromStr for ControlAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "room_created" => ControlAction::RoomCreated,
            "room_deleted" => ControlAction::RoomDeleted,
            "room_joined" => ControlAction::RoomJoined,
            "room_left" => ControlAction::RoomLeft,
            "room_updated" => ControlAction::RoomUpdated,
            "game_state_update" => ControlAction::GameStateUpdate,
            "game_started" => ControlAction::GameStarted,
            "game_end" => ControlAction::GameEnd,
            "timer_start" => ControlAction::TimerStart,
            "timer_stop" => ControlAction::TimerStop,
            other => {
                return Err(DomainError::new(
                    ErrorCode::UnknownAction,
                    format!("unknown action '{}'", other),
                ))
            }
        })
    }
}

/// Summary of one handled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyReport {
    pub action: ControlAction,
    /// Frames queued on local connections.
    pub delivered: usize,
}

/// Routes control-plane notifications to local connections.
pub struct ControlPlane {
    broadcaster: Arc<Broadcaster>,
    game_state: Arc<dyn GameStateManager>,
    locks: Arc<dyn LockProvider>,
    lock_ttl: Duration,
    lock_policy: RetryPolicy,
}

impl ControlPlane {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        game_state: Arc<dyn GameStateManager>,
        locks: Arc<dyn LockProvider>,
        lock_ttl: Duration,
        lock_policy: RetryPolicy,
    ) -> Self {
        Self {
            broadcaster,
            game_state,
            locks,
            lock_ttl,
            lock_policy,
        }
    }

    /// Handles one notification.
    ///
    /// # Errors
    ///
    /// - `UnknownAction` for an action name not listed in [`ControlAction`]
    /// - `ValidationFailed` for a missing room id or a missing acting user
    /// - `GameStateNotFound` when a game action names a room without a game
    /// - `LockTimeout` when the settlement lock is contended
    pub async fn handle(&self, request: ControlRequest) -> Result<NotifyReport, DomainError> {
        let action: ControlAction = request.action.parse()?;
        let user_id = request.user_id.and_then(UserId::from_raw);

        if action.requires_user() && user_id.is_none() {
            return Err(DomainError::validation(
                "user_id",
                format!("user_id is required for {}", action.as_str()),
            ));
        }

        counter!("control_plane_requests_total", "action" => action.as_str()).increment(1);

        let delivered = if action.is_lobby() {
            self.lobby_event(action, &request).await
        } else {
            let room_id = RoomId::new(request.room_id.clone())?;
            match action {
                ControlAction::RoomJoined | ControlAction::RoomLeft | ControlAction::RoomUpdated => {
                    self.room_event(action, room_id, user_id, request.room).await
                }
                _ => self.game_event(action, room_id, user_id, request.timer).await?,
            }
        };

        tracing::debug!(action = action.as_str(), room_id = %request.room_id, delivered, "Handled notification");
        Ok(NotifyReport { action, delivered })
    }

    async fn lobby_event(&self, action: ControlAction, request: &ControlRequest) -> usize {
        let room = request
            .room
            .clone()
            .or_else(|| (!request.room_id.is_empty()).then(|| json!({ "id": request.room_id })));
        let event = match action {
            ControlAction::RoomCreated => GameEvent::RoomCreated { room },
            _ => GameEvent::RoomDeleted { room },
        };

        self.broadcaster.publish(&Envelope::global(event)).await.delivered
    }

    async fn room_event(
        &self,
        action: ControlAction,
        room_id: RoomId,
        user_id: Option<UserId>,
        room: Option<Value>,
    ) -> usize {
        let players = room.as_ref().map(room_snapshot_player_ids).unwrap_or_default();
        let event = match action {
            ControlAction::RoomJoined => GameEvent::RoomJoined { room },
            ControlAction::RoomLeft => GameEvent::RoomLeft { room },
            _ => GameEvent::RoomUpdated { room },
        };
        let envelope = Envelope::to_room(room_id.clone(), event).with_user(user_id);

        let mut delivered = self.broadcaster.publish(&envelope).await.delivered;

        // Players listed in the snapshot but sitting elsewhere (or in the
        // lobby) still need to hear about the room.
        let hub = self.broadcaster.hub();
        for player in players {
            let in_room = hub
                .client_for_user(player)
                .and_then(|client| hub.room_of(client.id()))
                .is_some_and(|current| current == room_id);
            if !in_room {
                delivered += self.broadcaster.deliver_to_user(player, &envelope).await.delivered;
            }
        }
        delivered
    }

    async fn game_event(
        &self,
        action: ControlAction,
        room_id: RoomId,
        user_id: Option<UserId>,
        timer: Option<Value>,
    ) -> Result<usize, DomainError> {
        let state = self.game_state.load(&room_id).await?.ok_or_else(|| {
            DomainError::new(ErrorCode::GameStateNotFound, format!("no game state for room {}", room_id))
                .with_detail("room_id", room_id.as_str())
        })?;

        let event = match action {
            ControlAction::GameStateUpdate => GameEvent::GameStateUpdate { game_state: state.clone() },
            ControlAction::GameStarted => GameEvent::GameStarted { game_state: state.clone() },
            ControlAction::TimerStart => GameEvent::TimerStart { game_state: state.clone(), timer },
            ControlAction::TimerStop => GameEvent::TimerStop { game_state: state.clone() },
            _ => GameEvent::GameEnd {
                game_state: state.clone(),
                settlement: self.settlement(&room_id, &state).await?,
            },
        };

        Ok(self.deliver_game_event(&room_id, user_id, &state, event).await)
    }

    /// Reads the room's settlement under the `game:<room_id>` lock, which the
    /// rules engine also holds while it writes the result.
    ///
    /// The read is idempotent: every instance broadcasting this `game_end`,
    /// and any retried notification, attaches the same payload until its
    /// TTL retires it.
    async fn settlement(&self, room_id: &RoomId, state: &GameState) -> Result<Option<Value>, DomainError> {
        if !state.status.is_ended() {
            tracing::warn!(room_id = %room_id, status = ?state.status, "game_end for a game that has not ended");
            return Ok(None);
        }

        let key = lock_key("game", room_id.as_str());
        let game_state = self.game_state.clone();
        let settlement = with_lock_policy(
            self.locks.as_ref(),
            &key,
            self.lock_ttl,
            self.lock_policy,
            &tokio_util::sync::CancellationToken::new(),
            || async move { game_state.settlement(room_id).await },
        )
        .await?;

        if settlement.is_none() {
            tracing::debug!(room_id = %room_id, "No settlement to attach (not written yet or expired)");
        }
        Ok(settlement)
    }

    /// Each player gets their own filtered view; everyone else in the room
    /// gets the fully redacted one.
    async fn deliver_game_event(
        &self,
        room_id: &RoomId,
        user_id: Option<UserId>,
        state: &GameState,
        event: GameEvent,
    ) -> usize {
        let mut delivered = 0;
        let mut players = HashSet::new();

        for player in state.player_ids() {
            players.insert(player);
            let view = event.clone().with_game_state(state.filtered_for(Some(player)));
            let envelope = Envelope::to_room(room_id.clone(), view).with_user(user_id);
            delivered += self.broadcaster.deliver_to_user(player, &envelope).await.delivered;
        }

        let spectators = Envelope::to_room(room_id.clone(), event.with_game_state(state.filtered_for(None)))
            .with_user(user_id);
        delivered += self
            .broadcaster
            .publish_local_except(&spectators, &players)
            .await
            .delivered;
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::game_state::InMemoryGameStateStore;
    use crate::adapters::lock::LocalLockProvider;
    use crate::adapters::websocket::{BroadcasterConfig, Client, Frame, Hub, HubConfig};
    use crate::domain::foundation::InstanceId;
    use crate::domain::game::{GameStatus, PlayerState};
    use serde_json::Map;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        plane: ControlPlane,
        hub: Arc<Hub>,
        store: Arc<InMemoryGameStateStore>,
        locks: Arc<LocalLockProvider>,
    }

    fn fixture() -> Fixture {
        let hub = Hub::start(HubConfig::default(), CancellationToken::new());
        let broadcaster = Arc::new(Broadcaster::new(
            hub.clone(),
            None,
            InstanceId::new("test"),
            BroadcasterConfig::default(),
        ));
        let store = Arc::new(InMemoryGameStateStore::new());
        let locks = Arc::new(LocalLockProvider::new());
        let plane = ControlPlane::new(
            broadcaster,
            store.clone(),
            locks.clone(),
            Duration::from_secs(2),
            RetryPolicy::new(3, Duration::from_millis(10)),
        );
        Fixture { plane, hub, store, locks }
    }

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    fn user(id: u64) -> UserId {
        UserId::from_raw(id).unwrap()
    }

    async fn connect(hub: &Hub, user_id: u64, room_id: Option<&str>) -> (Arc<Client>, mpsc::Receiver<Frame>) {
        let (client, rx) = Client::new(user(user_id), 16);
        assert!(hub.register(client.clone()));
        for _ in 0..200 {
            if hub.is_registered(client.id()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if let Some(room_id) = room_id {
            assert!(hub.join_room(&client, room(room_id)));
        }
        (client, rx)
    }

    fn frames(rx: &mut mpsc::Receiver<Frame>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn request(action: &str, room_id: &str, user_id: Option<u64>) -> ControlRequest {
        ControlRequest {
            action: action.into(),
            room_id: room_id.into(),
            user_id,
            ..Default::default()
        }
    }

    fn game(status: GameStatus, players: &[u64]) -> GameState {
        let mut state = GameState::new(room("R1"), status);
        for id in players {
            state.players.push(PlayerState {
                user_id: user(*id),
                hand: Some(vec![json!(format!("card-{}", id))]),
                hand_count: None,
                private: None,
                public: Map::new(),
            });
        }
        state
    }

    #[test]
    fn actions_parse_and_unknown_is_rejected() {
        assert_eq!("timer_start".parse::<ControlAction>().unwrap(), ControlAction::TimerStart);
        let err = "shuffle".parse::<ControlAction>().unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownAction);
    }

    #[test]
    fn only_end_created_deleted_may_omit_user() {
        assert!(!ControlAction::GameEnd.requires_user());
        assert!(!ControlAction::RoomCreated.requires_user());
        assert!(!ControlAction::RoomDeleted.requires_user());
        assert!(ControlAction::GameStateUpdate.requires_user());
        assert!(ControlAction::RoomUpdated.requires_user());
    }

    #[tokio::test]
    async fn missing_user_is_validation_error() {
        let f = fixture();
        let err = f.plane.handle(request("room_updated", "R1", None)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);

        let err = f.plane.handle(request("room_updated", "R1", Some(0))).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn missing_room_is_validation_error() {
        let f = fixture();
        let err = f.plane.handle(request("room_updated", "", Some(1))).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn room_created_reaches_the_lobby() {
        let f = fixture();
        let (_a, mut rx_a) = connect(&f.hub, 1, None).await;
        let (_b, mut rx_b) = connect(&f.hub, 2, Some("R9")).await;

        let report = f.plane.handle(request("room_created", "R5", None)).await.unwrap();

        assert_eq!(report.delivered, 2);
        let frame = &frames(&mut rx_a)[0];
        assert_eq!(frame["type"], "room_created");
        assert_eq!(frame["room"]["id"], "R5");
        assert_eq!(frames(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn room_update_reaches_room_and_listed_players_elsewhere() {
        let f = fixture();
        let (_a, mut rx_a) = connect(&f.hub, 1, Some("R1")).await;
        let (_b, mut rx_b) = connect(&f.hub, 2, None).await;
        let (_c, mut rx_c) = connect(&f.hub, 3, Some("R2")).await;

        let mut req = request("room_updated", "R1", Some(1));
        req.room = Some(json!({"id": "R1", "players": [{"user_id": 1}, {"user_id": 2}]}));
        f.plane.handle(req).await.unwrap();

        assert_eq!(frames(&mut rx_a).len(), 1);
        let to_b = frames(&mut rx_b);
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0]["room_id"], "R1");
        assert!(frames(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn game_update_is_filtered_per_player() {
        let f = fixture();
        f.store.put_state(game(GameStatus::Playing, &[1, 2]));
        let (_p1, mut rx1) = connect(&f.hub, 1, Some("R1")).await;
        let (_p2, mut rx2) = connect(&f.hub, 2, Some("R1")).await;
        let (_s, mut rx_spectator) = connect(&f.hub, 3, Some("R1")).await;

        f.plane.handle(request("game_state_update", "R1", Some(1))).await.unwrap();

        let to_1 = frames(&mut rx1);
        assert_eq!(to_1.len(), 1);
        assert_eq!(to_1[0]["game_state"]["players"][0]["hand"], json!(["card-1"]));
        assert!(to_1[0]["game_state"]["players"][1].get("hand").is_none());

        let to_2 = frames(&mut rx2);
        assert_eq!(to_2.len(), 1);
        assert!(to_2[0]["game_state"]["players"][0].get("hand").is_none());
        assert_eq!(to_2[0]["game_state"]["players"][1]["hand"], json!(["card-2"]));

        let to_spectator = frames(&mut rx_spectator);
        assert_eq!(to_spectator.len(), 1);
        assert!(to_spectator[0]["game_state"]["players"]
            .as_array()
            .unwrap()
            .iter()
            .all(|p| p.get("hand").is_none()));
    }

    #[tokio::test]
    async fn game_action_without_state_is_not_found() {
        let f = fixture();
        let err = f.plane.handle(request("game_started", "R1", Some(1))).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::GameStateNotFound);
    }

    #[tokio::test]
    async fn game_end_attaches_settlement_to_every_player() {
        let f = fixture();
        f.store.put_state(game(GameStatus::Ended, &[1, 2]));
        f.store
            .put_settlement(room("R1"), json!({"winner": 2, "pot": 40}), Duration::from_secs(30));
        let (_p1, mut rx1) = connect(&f.hub, 1, Some("R1")).await;
        let (_p2, mut rx2) = connect(&f.hub, 2, None).await;
        let (_other, mut rx_other) = connect(&f.hub, 7, None).await;

        f.plane.handle(request("game_end", "R1", None)).await.unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let received = frames(rx);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0]["type"], "game_end");
            assert_eq!(received[0]["settlement"], json!({"winner": 2, "pot": 40}));
        }
        assert!(frames(&mut rx_other).is_empty());

        f.plane.handle(request("game_end", "R1", None)).await.unwrap();
        assert_eq!(frames(&mut rx1)[0]["settlement"], json!({"winner": 2, "pot": 40}));
        assert!(f.store.has_settlement(&room("R1")));
    }

    #[tokio::test]
    async fn contended_settlement_lock_is_retryable() {
        let f = fixture();
        f.store.put_state(game(GameStatus::Ended, &[1]));
        f.store.put_settlement(room("R1"), json!(1), Duration::from_secs(30));
        f.locks.try_lock("game:R1", Duration::from_secs(5)).await.unwrap().unwrap();

        let err = f.plane.handle(request("game_end", "R1", None)).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::LockTimeout);
        assert!(f.store.has_settlement(&room("R1")));
    }

    #[tokio::test]
    async fn timer_start_carries_timer_details() {
        let f = fixture();
        f.store.put_state(game(GameStatus::Playing, &[1]));
        let (_p1, mut rx1) = connect(&f.hub, 1, Some("R1")).await;

        let mut req = request("timer_start", "R1", Some(1));
        req.timer = Some(json!({"seconds": 15}));
        f.plane.handle(req).await.unwrap();

        let received = frames(&mut rx1);
        assert_eq!(received[0]["type"], "timer_start");
        assert_eq!(received[0]["timer"]["seconds"], 15);
    }
}
