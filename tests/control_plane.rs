//! Control-plane notifications against two instances that share their
//! lock provider and game-state store, the way two processes share Redis.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cardroom_realtime::adapters::bus::InMemoryMessageBus;
use cardroom_realtime::adapters::game_state::InMemoryGameStateStore;
use cardroom_realtime::adapters::lock::LocalLockProvider;
use cardroom_realtime::adapters::websocket::{Client, Frame};
use cardroom_realtime::application::{with_lock_policy, AppContext, AppContextBuilder, ControlRequest};
use cardroom_realtime::config::AppConfig;
use cardroom_realtime::domain::foundation::{ErrorCode, InstanceId, RoomId, UserId};
use cardroom_realtime::domain::game::{GameState, GameStatus, PlayerState};
use cardroom_realtime::ports::{lock_key, LockProvider, RetryPolicy};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Cluster {
    a: Arc<AppContext>,
    b: Arc<AppContext>,
    store: Arc<InMemoryGameStateStore>,
    locks: Arc<LocalLockProvider>,
}

impl Cluster {
    async fn start() -> Self {
        let bus = Arc::new(InMemoryMessageBus::new());
        let store = Arc::new(InMemoryGameStateStore::new());
        let locks = Arc::new(LocalLockProvider::new());

        let mut instances = Vec::new();
        for name in ["a", "b"] {
            let mut config = AppConfig::default();
            config.auth.jwt_secret = "integration-secret".into();
            let ctx = AppContextBuilder::new(config)
                .instance_id(InstanceId::new(name))
                .bus(bus.clone())
                .locks(locks.clone())
                .game_state(store.clone())
                .build();
            ctx.start().await.unwrap();
            instances.push(ctx);
        }

        let b = instances.pop().unwrap();
        let a = instances.pop().unwrap();
        Self { a, b, store, locks }
    }

    async fn stop(self) {
        self.a.shutdown().await;
        self.b.shutdown().await;
    }
}

fn user(id: u64) -> UserId {
    UserId::from_raw(id).unwrap()
}

fn room(id: &str) -> RoomId {
    RoomId::new(id).unwrap()
}

async fn connect(ctx: &AppContext, user_id: u64, room_id: Option<&str>) -> (Arc<Client>, mpsc::Receiver<Frame>) {
    let (client, frames) = Client::new(user(user_id), 64);
    assert!(ctx.hub().register_and_wait(client.clone()).await);
    if let Some(room_id) = room_id {
        assert!(ctx.hub().join_room(&client, room(room_id)));
    }
    (client, frames)
}

fn drain(frames: &mut mpsc::Receiver<Frame>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(frame) = frames.try_recv() {
        out.push(serde_json::from_str(&frame).unwrap());
    }
    out
}

fn game_ends(frames: &mut mpsc::Receiver<Frame>) -> Vec<Value> {
    let ends: Vec<Value> = drain(frames)
        .into_iter()
        .filter(|frame| frame["type"] == "game_end")
        .collect();
    assert_eq!(ends.len(), 1);
    ends
}

fn game(room_id: &str, status: GameStatus, players: &[u64]) -> GameState {
    let mut state = GameState::new(room(room_id), status);
    for id in players {
        state.players.push(PlayerState {
            user_id: user(*id),
            hand: Some(vec![json!(format!("card-{id}"))]),
            hand_count: None,
            private: None,
            public: Map::new(),
        });
    }
    state
}

fn notify(action: &str, room_id: &str, user_id: Option<u64>) -> ControlRequest {
    ControlRequest {
        action: action.to_string(),
        room_id: room_id.to_string(),
        user_id,
        ..ControlRequest::default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn game_end_carries_the_same_settlement_on_every_instance() {
    let cluster = Cluster::start().await;
    cluster.store.put_state(game("R1", GameStatus::Ended, &[1, 2]));
    cluster
        .store
        .put_settlement(room("R1"), json!({"winner": 1}), Duration::from_secs(60));

    let (_alice, mut alice_frames) = connect(&cluster.a, 1, Some("R1")).await;
    let (_bob, mut bob_frames) = connect(&cluster.b, 2, Some("R1")).await;

    let (on_a, on_b) = tokio::join!(
        cluster.a.control_plane().handle(notify("game_end", "R1", None)),
        cluster.b.control_plane().handle(notify("game_end", "R1", None)),
    );
    assert_eq!(on_a.unwrap().delivered, 1);
    assert_eq!(on_b.unwrap().delivered, 1);

    let alice_end = &game_ends(&mut alice_frames)[0];
    let bob_end = &game_ends(&mut bob_frames)[0];
    assert_eq!(alice_end["settlement"], json!({"winner": 1}));
    assert_eq!(bob_end["settlement"], alice_end["settlement"]);

    assert_eq!(alice_end["game_state"]["players"][0]["hand"], json!(["card-1"]));
    assert!(alice_end["game_state"]["players"][1]["hand"].is_null());
    assert_eq!(bob_end["game_state"]["players"][1]["hand"], json!(["card-2"]));
    assert!(bob_end["game_state"]["players"][0]["hand"].is_null());

    let retried = cluster
        .a
        .control_plane()
        .handle(notify("game_end", "R1", None))
        .await
        .unwrap();
    assert_eq!(retried.delivered, 1);
    assert_eq!(game_ends(&mut alice_frames)[0]["settlement"], json!({"winner": 1}));

    cluster.stop().await;
}

#[tokio::test]
async fn game_end_waits_out_a_busy_lock_then_times_out() {
    let cluster = Cluster::start().await;
    cluster.store.put_state(game("R1", GameStatus::Ended, &[1]));
    cluster
        .store
        .put_settlement(room("R1"), json!({"winner": 1}), Duration::from_secs(60));

    let key = lock_key("game", "R1");
    let lease = cluster
        .locks
        .try_lock(&key, Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let err = cluster
        .a
        .control_plane()
        .handle(notify("game_end", "R1", None))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::LockTimeout);
    assert!(cluster.store.has_settlement(&room("R1")));

    cluster.locks.unlock(&lease).await.unwrap();
    cluster.stop().await;
}

#[tokio::test]
async fn each_player_sees_only_their_own_hand() {
    let cluster = Cluster::start().await;
    cluster.store.put_state(game("R1", GameStatus::Playing, &[1, 2]));

    let (_alice, mut alice_frames) = connect(&cluster.a, 1, Some("R1")).await;
    let (_bob, mut bob_frames) = connect(&cluster.a, 2, Some("R1")).await;
    let (_watcher, mut watcher_frames) = connect(&cluster.a, 9, Some("R1")).await;

    let report = cluster
        .a
        .control_plane()
        .handle(notify("game_state_update", "R1", Some(1)))
        .await
        .unwrap();
    assert_eq!(report.delivered, 3);

    let alice_view = &drain(&mut alice_frames)[0];
    assert_eq!(alice_view["game_state"]["players"][0]["hand"], json!(["card-1"]));
    assert!(alice_view["game_state"]["players"][1]["hand"].is_null());
    assert_eq!(alice_view["game_state"]["players"][1]["hand_count"], 1);

    let bob_view = &drain(&mut bob_frames)[0];
    assert!(bob_view["game_state"]["players"][0]["hand"].is_null());
    assert_eq!(bob_view["game_state"]["players"][1]["hand"], json!(["card-2"]));

    let watcher = drain(&mut watcher_frames);
    assert_eq!(watcher.len(), 1);
    assert!(watcher[0]["game_state"]["players"][0]["hand"].is_null());
    assert!(watcher[0]["game_state"]["players"][1]["hand"].is_null());

    cluster.stop().await;
}

#[tokio::test]
async fn room_joined_reaches_listed_player_outside_the_room() {
    let cluster = Cluster::start().await;

    let (_host, mut host_frames) = connect(&cluster.a, 1, Some("R1")).await;
    let (_guest, mut guest_frames) = connect(&cluster.a, 2, None).await;

    let mut request = notify("room_joined", "R1", Some(2));
    request.room = Some(json!({"id": "R1", "players": [{"user_id": 1}, {"user_id": 2}]}));
    cluster.a.control_plane().handle(request).await.unwrap();

    assert_eq!(drain(&mut host_frames).len(), 1);
    let guest = drain(&mut guest_frames);
    assert_eq!(guest.len(), 1);
    assert_eq!(guest[0]["type"], "room_joined");
    assert_eq!(guest[0]["room_id"], "R1");

    cluster.stop().await;
}

#[tokio::test]
async fn locked_sections_do_not_overlap_across_instances() {
    let cluster = Cluster::start().await;
    let inside = Arc::new(AtomicUsize::new(0));
    let key = lock_key("room", "R1");
    let policy = RetryPolicy::new(500, Duration::from_millis(5));

    let mut tasks = Vec::new();
    for i in 0..6 {
        let ctx = if i % 2 == 0 { cluster.a.clone() } else { cluster.b.clone() };
        let inside = inside.clone();
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            with_lock_policy(
                ctx.locks().as_ref(),
                &key,
                Duration::from_secs(5),
                policy,
                &CancellationToken::new(),
                move || async move {
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    cluster.stop().await;
}
