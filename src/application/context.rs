//! Application context - every long-lived component, built once.
//!
//! Production code calls [`AppContext::connect`], which builds the Redis
//! backed components the configuration asks for and fails fast when one is
//! unavailable. Tests use [`AppContextBuilder`] to substitute in-memory
//! adapters.
//!
//! ```ignore
//! let ctx = AppContext::connect(config).await?;
//! ctx.start().await?;
//! axum::serve(listener, router(&ctx)).await?;
//! ctx.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapters::bus::RedisMessageBus;
use crate::adapters::discovery::RedisServiceDiscovery;
use crate::adapters::game_state::{InMemoryGameStateStore, RedisGameStateStore};
use crate::adapters::lock::{LocalLockProvider, RedisLockProvider};
use crate::adapters::websocket::{
    Broadcaster, BroadcasterConfig, CrossInstanceBridge, Hub, HubConfig, WebSocketState,
};
use crate::config::{AppConfig, ConfigError, LockBackend, ValidationError};
use crate::domain::foundation::InstanceId;
use crate::ports::{
    BusError, BusMessage, DiscoveryError, GameStateManager, LockError, LockProvider, MessageBus,
    RetryPolicy, ServiceDiscovery, ServiceInstance, SystemNotice, SYSTEM_NOTIFY_TOPIC,
};

use super::{ControlPlane, TokenVerifier};

/// Errors that stop the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("redis unavailable: {0}")]
    Redis(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("failed to bind server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared handles for the whole service.
pub struct AppContext {
    config: AppConfig,
    instance_id: InstanceId,
    shutdown: CancellationToken,
    hub: Arc<Hub>,
    broadcaster: Arc<Broadcaster>,
    bridge: Arc<CrossInstanceBridge>,
    locks: Arc<dyn LockProvider>,
    local_locks: Option<Arc<LocalLockProvider>>,
    game_state: Arc<dyn GameStateManager>,
    bus: Option<Arc<dyn MessageBus>>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    tokens: Arc<TokenVerifier>,
    control_plane: Arc<ControlPlane>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppContext {
    /// Builds the context for `config`, connecting to Redis when needed.
    ///
    /// The configuration is validated first; a Redis-backed component
    /// without a reachable Redis is a startup error.
    pub async fn connect(config: AppConfig) -> Result<Arc<Self>, StartupError> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let mut builder = AppContextBuilder::new(config.clone()).shutdown(shutdown.clone());

        let Some(redis_config) = &config.redis else {
            tracing::info!("No Redis configured; running as a single instance");
            return Ok(builder.build());
        };

        let client = redis_config.client()?;
        let conn = tokio::time::timeout(redis_config.timeout(), client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| StartupError::Redis("connection timed out".to_string()))?
            .map_err(|e| StartupError::Redis(e.to_string()))?;

        builder = builder
            .game_state(Arc::new(RedisGameStateStore::new(conn.clone())))
            .discovery(Arc::new(RedisServiceDiscovery::new(conn.clone())));

        if config.lock.backend == LockBackend::Redis {
            builder = builder.locks(Arc::new(RedisLockProvider::new(
                conn.clone(),
                config.lock.key_prefix.clone(),
            )));
        }

        if config.realtime.bus_enabled {
            let bus = RedisMessageBus::connect(client, shutdown).await?;
            builder = builder.bus(Arc::new(bus));
        }

        Ok(builder.build())
    }

    /// Starts background work: bus subscription, discovery heartbeat and
    /// the local lock sweeper. Calling it twice is a no-op.
    pub async fn start(&self) -> Result<(), StartupError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(bus) = &self.bus {
            self.bridge.register(bus.as_ref()).await?;
            self.announce(SystemNotice::InstanceUp {
                instance_id: self.instance_id.clone(),
                address: self.advertised_address(),
            })
            .await;
        }

        if let Some(discovery) = &self.discovery {
            let instance = self.service_instance();
            discovery
                .register(&instance, self.config.instance.registration_ttl())
                .await?;
            let heartbeat = spawn_heartbeat(
                discovery.clone(),
                instance,
                &self.config,
                self.shutdown.clone(),
            );
            self.track(heartbeat);
        }

        if let Some(local) = &self.local_locks {
            let sweeper = local.clone().spawn_sweeper(
                self.config.lock.sweep_interval(),
                self.config.lock.retention(),
                self.shutdown.clone(),
            );
            self.track(sweeper);
        }

        tracing::info!(
            instance_id = %self.instance_id,
            locks = self.locks.name(),
            bus = self.bus.is_some(),
            discovery = self.discovery.is_some(),
            "Realtime core started"
        );
        Ok(())
    }

    /// Leaves discovery, tells peers, and stops every background task.
    pub async fn shutdown(&self) {
        if let Some(discovery) = &self.discovery {
            if let Err(e) = discovery
                .deregister(&self.config.instance.service_name, &self.instance_id)
                .await
            {
                tracing::warn!(error = %e, "Failed to deregister instance");
            }
        }

        if self.bus.is_some() {
            self.announce(SystemNotice::InstanceDown {
                instance_id: self.instance_id.clone(),
            })
            .await;
        }

        self.shutdown.cancel();

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!(instance_id = %self.instance_id, "Realtime core stopped");
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn bridge(&self) -> &Arc<CrossInstanceBridge> {
        &self.bridge
    }

    pub fn locks(&self) -> &Arc<dyn LockProvider> {
        &self.locks
    }

    pub fn game_state(&self) -> &Arc<dyn GameStateManager> {
        &self.game_state
    }

    pub fn bus(&self) -> Option<&Arc<dyn MessageBus>> {
        self.bus.as_ref()
    }

    pub fn discovery(&self) -> Option<&Arc<dyn ServiceDiscovery>> {
        self.discovery.as_ref()
    }

    pub fn tokens(&self) -> &Arc<TokenVerifier> {
        &self.tokens
    }

    pub fn control_plane(&self) -> &Arc<ControlPlane> {
        &self.control_plane
    }

    /// Lock retry policy from configuration.
    pub fn lock_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.lock.max_retries, self.config.lock.retry_interval())
    }

    /// State for the `/ws` route.
    pub fn websocket_state(&self) -> WebSocketState {
        WebSocketState::new(
            self.broadcaster.clone(),
            self.tokens.clone(),
            self.config.realtime.send_queue_capacity,
        )
    }

    fn advertised_address(&self) -> String {
        format!("{}:{}", self.config.instance.advertise_host, self.config.server.port)
    }

    fn service_instance(&self) -> ServiceInstance {
        ServiceInstance::new(
            self.config.instance.service_name.clone(),
            self.instance_id.clone(),
            self.config.instance.advertise_host.clone(),
            self.config.server.port,
        )
        .with_metadata("version", env!("CARGO_PKG_VERSION"))
    }

    async fn announce(&self, notice: SystemNotice) {
        let Some(bus) = &self.bus else { return };

        let payload = serde_json::to_value(&notice)
            .map_err(BusError::from)
            .and_then(|value| BusMessage::new(self.instance_id.clone(), value).to_bytes());
        let result = match payload {
            Ok(bytes) => bus.publish(SYSTEM_NOTIFY_TOPIC, bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to publish system notice");
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}

/// Re-registers the instance every heartbeat interval until shutdown.
fn spawn_heartbeat(
    discovery: Arc<dyn ServiceDiscovery>,
    instance: ServiceInstance,
    config: &AppConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let interval = config.instance.heartbeat_interval();
    let ttl = config.instance.registration_ttl();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = discovery.register(&instance, ttl).await {
                        tracing::warn!(instance_id = %instance.instance_id, error = %e, "Discovery heartbeat failed");
                    }
                }
            }
        }
    })
}

/// Assembles an [`AppContext`] from explicit parts.
///
/// Unset parts default to single-instance, in-memory implementations:
/// local locks, an in-memory game-state store, no bus and no discovery.
pub struct AppContextBuilder {
    config: AppConfig,
    instance_id: Option<InstanceId>,
    shutdown: CancellationToken,
    locks: Option<Arc<dyn LockProvider>>,
    game_state: Option<Arc<dyn GameStateManager>>,
    bus: Option<Arc<dyn MessageBus>>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
}

impl AppContextBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            instance_id: None,
            shutdown: CancellationToken::new(),
            locks: None,
            game_state: None,
            bus: None,
            discovery: None,
        }
    }

    pub fn instance_id(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn locks(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn game_state(mut self, game_state: Arc<dyn GameStateManager>) -> Self {
        self.game_state = Some(game_state);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Builds the context. Spawns the hub workers, so it must run inside a
    /// Tokio runtime.
    pub fn build(self) -> Arc<AppContext> {
        let config = self.config;
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| config.instance.resolve_instance_id());

        let hub = Hub::start(
            HubConfig {
                workers: config.realtime.hub_workers,
                queue_capacity: config.realtime.hub_queue_capacity,
            },
            self.shutdown.clone(),
        );
        let broadcaster = Arc::new(Broadcaster::new(
            hub.clone(),
            self.bus.clone(),
            instance_id.clone(),
            BroadcasterConfig {
                parallel_threshold: config.realtime.fanout_parallel_threshold,
                max_concurrency: config.realtime.fanout_max_concurrency,
            },
        ));
        let bridge = CrossInstanceBridge::new_shared(broadcaster.clone());

        let (locks, local_locks) = match self.locks {
            Some(locks) => (locks, None),
            None => {
                let local = Arc::new(LocalLockProvider::new());
                (local.clone() as Arc<dyn LockProvider>, Some(local))
            }
        };
        let game_state = self
            .game_state
            .unwrap_or_else(|| Arc::new(InMemoryGameStateStore::new()) as Arc<dyn GameStateManager>);

        let tokens = Arc::new(TokenVerifier::from_config(&config.auth));
        let control_plane = Arc::new(ControlPlane::new(
            broadcaster.clone(),
            game_state.clone(),
            locks.clone(),
            config.lock.default_ttl(),
            RetryPolicy::new(config.lock.max_retries, config.lock.retry_interval()),
        ));

        Arc::new(AppContext {
            config,
            instance_id,
            shutdown: self.shutdown,
            hub,
            broadcaster,
            bridge,
            locks,
            local_locks,
            game_state,
            bus: self.bus,
            discovery: self.discovery,
            tokens,
            control_plane,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }
}
