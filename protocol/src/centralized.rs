//! # Centralized Backend
//!
//! The simple detector that fixes the backend contract: the member at
//! index 0 of the initial view is the *primary* and holds the
//! authoritative view; everyone else is a passive secondary with a cached
//! copy.
//!
//! The primary pings one secondary per tick, on an interval drawn
//! uniformly from a configured range so a fleet of groups does not
//! synchronize. A secondary that misses `ping_max_num_timeouts`
//! consecutive pings is declared dead, removed, and the removal is
//! broadcast to the remaining secondaries. Graceful departure is a `leave`
//! RPC to the primary, which broadcasts it the same way.
//!
//! Each ping carries the primary's view digest; a secondary whose cached
//! digest differs pulls a fresh view. That keeps secondaries convergent
//! without the primary ever pushing full views on the hot path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, trace, warn};

use crate::backend::{BackendArgs, GroupBackend};
use crate::config::{
    DEFAULT_CENTRALIZED_PING_INTERVAL_MS, DEFAULT_CENTRALIZED_PING_TIMEOUT_MS,
    DEFAULT_PING_MAX_NUM_TIMEOUTS, METADATA_CONFIG_KEY, METADATA_TYPE_KEY,
};
use crate::error::GroupError;
use crate::observer::{MembershipUpdate, ObserverRegistry};
use crate::serialize::WireView;
use crate::transport::{handler, RpcTransport};
use crate::view::GroupView;

/// Primary-to-secondary liveness probe.
pub const PING_RPC: &str = "roster_centralized_ping";
/// Secondary-to-primary view fetch.
pub const GET_VIEW_RPC: &str = "roster_centralized_get_view";
/// Primary-to-secondary membership change notification.
pub const MEMBERSHIP_UPDATE_RPC: &str = "roster_centralized_membership_update";
/// Secondary-to-primary graceful departure.
pub const LEAVE_RPC: &str = "roster_centralized_leave";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for the centralized backend.
#[derive(Debug, Clone)]
pub struct CentralizedConfig {
    /// Timeout on a single ping.
    pub ping_timeout: Duration,
    /// Interval between pings to the same secondary, drawn uniformly from
    /// this (min, max) range each tick.
    pub ping_interval: (Duration, Duration),
    /// Consecutive timeouts before a secondary is declared dead.
    pub ping_max_num_timeouts: u32,
}

impl Default for CentralizedConfig {
    fn default() -> Self {
        let interval = Duration::from_millis(DEFAULT_CENTRALIZED_PING_INTERVAL_MS);
        Self {
            ping_timeout: Duration::from_millis(DEFAULT_CENTRALIZED_PING_TIMEOUT_MS),
            ping_interval: (interval, interval),
            ping_max_num_timeouts: DEFAULT_PING_MAX_NUM_TIMEOUTS,
        }
    }
}

impl CentralizedConfig {
    /// Parses the backend configuration. `ping_interval_ms` accepts either
    /// a single number or a `[min, max]` pair.
    pub fn from_json(config: &Value) -> Result<Self, GroupError> {
        let mut out = Self::default();
        if config.is_null() {
            return Ok(out);
        }
        let object = config.as_object().ok_or_else(|| {
            GroupError::InvalidConfig("centralized configuration must be a JSON object".into())
        })?;

        if let Some(value) = object.get("ping_timeout_ms") {
            let ms = value.as_f64().ok_or_else(|| {
                GroupError::InvalidConfig("\"ping_timeout_ms\" should be a number".into())
            })?;
            if ms <= 0.0 {
                return Err(GroupError::InvalidConfig(
                    "\"ping_timeout_ms\" should be positive".into(),
                ));
            }
            out.ping_timeout = Duration::from_secs_f64(ms / 1000.0);
        }

        if let Some(value) = object.get("ping_interval_ms") {
            out.ping_interval = match value {
                Value::Number(n) => {
                    let ms = n.as_f64().unwrap_or(-1.0);
                    if ms <= 0.0 {
                        return Err(GroupError::InvalidConfig(
                            "\"ping_interval_ms\" should be positive".into(),
                        ));
                    }
                    let interval = Duration::from_secs_f64(ms / 1000.0);
                    (interval, interval)
                }
                Value::Array(pair) if pair.len() == 2 => {
                    let min = pair[0].as_f64();
                    let max = pair[1].as_f64();
                    match (min, max) {
                        (Some(min), Some(max)) if min > 0.0 && max >= min => (
                            Duration::from_secs_f64(min / 1000.0),
                            Duration::from_secs_f64(max / 1000.0),
                        ),
                        _ => {
                            return Err(GroupError::InvalidConfig(
                                "invalid values or order in \"ping_interval_ms\" array".into(),
                            ))
                        }
                    }
                }
                _ => {
                    return Err(GroupError::InvalidConfig(
                        "\"ping_interval_ms\" should be a number or an array of two numbers"
                            .into(),
                    ))
                }
            };
        }

        if let Some(value) = object.get("ping_max_num_timeouts") {
            let n = value.as_u64().ok_or_else(|| {
                GroupError::InvalidConfig("\"ping_max_num_timeouts\" should be an integer".into())
            })?;
            if n < 1 {
                return Err(GroupError::InvalidConfig(
                    "\"ping_max_num_timeouts\" should be at least 1".into(),
                ));
            }
            out.ping_max_num_timeouts = n as u32;
        }

        Ok(out)
    }

    /// Effective configuration for the `__config__` metadata key.
    pub fn to_json(&self) -> Value {
        let (min, max) = self.ping_interval;
        let interval = if min == max {
            json!(min.as_millis() as u64)
        } else {
            json!([min.as_millis() as u64, max.as_millis() as u64])
        };
        json!({
            "ping_timeout_ms": self.ping_timeout.as_millis() as u64,
            "ping_interval_ms": interval,
            "ping_max_num_timeouts": self.ping_max_num_timeouts,
        })
    }
}

// ---------------------------------------------------------------------------
// RPC payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PingMessage {
    /// The primary's current view digest; secondaries use it as a
    /// cache-freshness token.
    digest: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MembershipUpdateMessage {
    update: MembershipUpdate,
    address: String,
    provider_id: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaveMessage {
    address: String,
    provider_id: u16,
}

/// Per-member bookkeeping. Only the primary reads it.
#[derive(Debug, Default)]
struct MemberHealth {
    consecutive_timeouts: u32,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// The centralized membership backend.
pub struct CentralizedBackend {
    transport: Arc<dyn RpcTransport>,
    provider_id: u16,
    self_address: String,
    is_primary: bool,
    primary: (String, u16),
    view: Mutex<GroupView<MemberHealth>>,
    config: CentralizedConfig,
    config_json: Value,
    observers: Arc<ObserverRegistry>,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    ping_task: Mutex<Option<JoinHandle<()>>>,
}

impl CentralizedBackend {
    /// Brings the backend up. The initial view must be non-empty; its
    /// first (sorted) member becomes the primary.
    pub async fn start(args: BackendArgs) -> Result<Arc<Self>, GroupError> {
        let config = CentralizedConfig::from_json(&args.config)?;
        let config_json = config.to_json();
        let self_address = args.transport.local_address().to_string();
        let provider_id = args.provider_id;

        // Bootstrap views arrive in whatever order the caller wrote them;
        // the primary is defined by position in the *sorted* view, so
        // sort before any index-0 read or every process could elect a
        // different member.
        let mut initial_view = args.initial_view;
        initial_view.sort_members();
        if args.join && !initial_view.members.is_empty() {
            // A joining secondary only knows the primary; pull the real
            // view before building local state.
            let primary = initial_view.members[0].clone();
            match fetch_view(
                args.transport.as_ref(),
                &primary.address,
                primary.provider_id,
                config.ping_timeout,
            )
            .await
            {
                Ok(view) => {
                    initial_view = view;
                    initial_view.sort_members();
                }
                Err(e) => {
                    warn!(error = %e, "could not fetch view from primary at join, using bootstrap view");
                }
            }
        }
        if initial_view.members.is_empty() {
            return Err(GroupError::InvalidArgument(
                "centralized backend needs a non-empty initial view".into(),
            ));
        }

        let primary_member = &initial_view.members[0];
        let primary = (primary_member.address.clone(), primary_member.provider_id);
        let is_primary = primary.0 == self_address && primary.1 == provider_id;

        let mut view = GroupView::from_wire(&initial_view, |_, _| MemberHealth::default());
        view.set_metadata(METADATA_CONFIG_KEY, &config_json.to_string());
        view.set_metadata(METADATA_TYPE_KEY, "centralized");

        let initial_members: Vec<(String, u16)> = view
            .members()
            .iter()
            .filter(|m| !(m.address == self_address && m.provider_id == provider_id))
            .map(|m| (m.address.clone(), m.provider_id))
            .collect();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let backend = Arc::new(Self {
            transport: args.transport,
            provider_id,
            self_address,
            is_primary,
            primary,
            view: Mutex::new(view),
            config,
            config_json,
            observers: args.observers,
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
            ping_task: Mutex::new(None),
        });
        Self::register_rpcs(&backend)?;

        for (address, member_provider_id) in initial_members {
            backend
                .observers
                .notify_membership(MembershipUpdate::Joined, &address, member_provider_id);
        }

        if backend.is_primary {
            let task = tokio::spawn(Self::ping_loop(Arc::clone(&backend), shutdown_rx));
            *backend.ping_task.lock() = Some(task);
        }

        debug!(
            address = %backend.self_address,
            provider_id,
            primary = backend.is_primary,
            "centralized backend started"
        );
        Ok(backend)
    }

    /// Whether this member is the designated primary.
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    // -----------------------------------------------------------------------
    // RPC handlers
    // -----------------------------------------------------------------------

    fn register_rpcs(this: &Arc<Self>) -> Result<(), GroupError> {
        let result = (|| {
            let backend = Arc::clone(this);
            this.transport.register(
                this.provider_id,
                PING_RPC,
                handler(move |body| {
                    let backend = Arc::clone(&backend);
                    async move { backend.handle_ping(body).await }
                }),
            )?;

            let backend = Arc::clone(this);
            this.transport.register(
                this.provider_id,
                GET_VIEW_RPC,
                handler(move |_body| {
                    let backend = Arc::clone(&backend);
                    async move {
                        serde_json::to_vec(&backend.view.lock().to_wire())
                            .expect("view snapshot encodes")
                    }
                }),
            )?;

            let backend = Arc::clone(this);
            this.transport.register(
                this.provider_id,
                MEMBERSHIP_UPDATE_RPC,
                handler(move |body| {
                    let backend = Arc::clone(&backend);
                    async move { backend.handle_membership_update(body) }
                }),
            )?;

            let backend = Arc::clone(this);
            this.transport.register(
                this.provider_id,
                LEAVE_RPC,
                handler(move |body| {
                    let backend = Arc::clone(&backend);
                    async move { backend.handle_leave(body).await }
                }),
            )
        })();

        if result.is_err() {
            this.transport.deregister(this.provider_id, PING_RPC);
            this.transport.deregister(this.provider_id, GET_VIEW_RPC);
            this.transport.deregister(this.provider_id, MEMBERSHIP_UPDATE_RPC);
            this.transport.deregister(this.provider_id, LEAVE_RPC);
        }
        result.map_err(Into::into)
    }

    async fn handle_ping(self: Arc<Self>, body: Vec<u8>) -> Vec<u8> {
        if let Ok(ping) = serde_json::from_slice::<PingMessage>(&body) {
            let stale = ping.digest != self.view.lock().digest();
            if stale && !self.is_primary {
                // Refresh off the response path; the primary only cares
                // that we answered.
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    match fetch_view(
                        this.transport.as_ref(),
                        &this.primary.0,
                        this.primary.1,
                        this.config.ping_timeout,
                    )
                    .await
                    {
                        Ok(wire) => this.replace_view(&wire),
                        Err(e) => trace!(error = %e, "view refresh after stale ping failed"),
                    }
                });
            }
        } else {
            warn!("failed to decode centralized ping");
        }
        b"{}".to_vec()
    }

    fn handle_membership_update(&self, body: Vec<u8>) -> Vec<u8> {
        match serde_json::from_slice::<MembershipUpdateMessage>(&body) {
            Ok(message) => {
                let applied = {
                    let mut view = self.view.lock();
                    match message.update {
                        MembershipUpdate::Joined => {
                            view.add_member(
                                &message.address,
                                message.provider_id,
                                MemberHealth::default(),
                            );
                            true
                        }
                        _ => view.remove_member(&message.address, message.provider_id),
                    }
                };
                if applied {
                    self.observers.notify_membership(
                        message.update,
                        &message.address,
                        message.provider_id,
                    );
                }
            }
            Err(e) => warn!(error = %e, "failed to decode membership update"),
        }
        b"{}".to_vec()
    }

    async fn handle_leave(&self, body: Vec<u8>) -> Vec<u8> {
        match serde_json::from_slice::<LeaveMessage>(&body) {
            Ok(message) => {
                let removed = self
                    .view
                    .lock()
                    .remove_member(&message.address, message.provider_id);
                if removed {
                    debug!(address = %message.address, provider_id = message.provider_id,
                           "member left the group");
                    self.observers.notify_membership(
                        MembershipUpdate::Left,
                        &message.address,
                        message.provider_id,
                    );
                    self.broadcast_update(
                        MembershipUpdate::Left,
                        &message.address,
                        message.provider_id,
                    )
                    .await;
                } else {
                    warn!(address = %message.address,
                          "leave request from a process that is not a member");
                }
            }
            Err(e) => warn!(error = %e, "failed to decode leave request"),
        }
        b"{}".to_vec()
    }

    // -----------------------------------------------------------------------
    // Primary ping driver
    // -----------------------------------------------------------------------

    async fn ping_loop(backend: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut cursor = 0usize;
        loop {
            let interval = backend.random_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => return,
            }
            if backend.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            backend.ping_round(&mut cursor).await;
            if backend.shutting_down.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// One tick of the primary: ping the next secondary round-robin and
    /// account the outcome.
    async fn ping_round(&self, cursor: &mut usize) {
        let (target, digest) = {
            let view = self.view.lock();
            let secondaries: Vec<(String, u16)> = view
                .members()
                .iter()
                .filter(|m| !(m.address == self.self_address && m.provider_id == self.provider_id))
                .map(|m| (m.address.clone(), m.provider_id))
                .collect();
            if secondaries.is_empty() {
                return;
            }
            let target = secondaries[*cursor % secondaries.len()].clone();
            *cursor = cursor.wrapping_add(1);
            (target, view.digest())
        };

        let (address, provider_id) = target;
        let ping = PingMessage { digest };
        let result = self
            .transport
            .call(
                &address,
                provider_id,
                PING_RPC,
                serde_json::to_vec(&ping).expect("ping encodes"),
                self.config.ping_timeout,
            )
            .await;

        let dead = {
            let mut view = self.view.lock();
            match view.find_member_mut(&address, provider_id) {
                Some(member) => match result {
                    Ok(_) => {
                        member.extra.consecutive_timeouts = 0;
                        false
                    }
                    Err(_) => {
                        member.extra.consecutive_timeouts += 1;
                        trace!(
                            %address, provider_id,
                            timeouts = member.extra.consecutive_timeouts,
                            "secondary missed a ping"
                        );
                        member.extra.consecutive_timeouts >= self.config.ping_max_num_timeouts
                    }
                },
                None => false, // removed concurrently (leave raced the ping)
            }
        };

        if dead {
            debug!(%address, provider_id, "secondary declared dead after repeated timeouts");
            self.view.lock().remove_member(&address, provider_id);
            self.observers
                .notify_membership(MembershipUpdate::Died, &address, provider_id);
            self.broadcast_update(MembershipUpdate::Died, &address, provider_id)
                .await;
        }
    }

    fn random_interval(&self) -> Duration {
        let (min, max) = self.config.ping_interval;
        if min == max {
            return min;
        }
        let ms = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
        Duration::from_secs_f64(ms)
    }

    /// Tells every remaining secondary about a membership change,
    /// concurrently and best-effort.
    async fn broadcast_update(&self, update: MembershipUpdate, address: &str, provider_id: u16) {
        let targets: Vec<(String, u16)> = {
            let view = self.view.lock();
            view.members()
                .iter()
                .filter(|m| {
                    !(m.address == self.self_address && m.provider_id == self.provider_id)
                        && !(m.address == address && m.provider_id == provider_id)
                })
                .map(|m| (m.address.clone(), m.provider_id))
                .collect()
        };
        let message = MembershipUpdateMessage {
            update,
            address: address.to_string(),
            provider_id,
        };
        let body = serde_json::to_vec(&message).expect("membership update encodes");

        let sends = targets.into_iter().map(|(target_address, target_pid)| {
            let body = body.clone();
            async move {
                let _ = self
                    .transport
                    .call(
                        &target_address,
                        target_pid,
                        MEMBERSHIP_UPDATE_RPC,
                        body,
                        self.config.ping_timeout,
                    )
                    .await;
            }
        });
        futures::future::join_all(sends).await;
    }

    /// Replaces the cached view wholesale with the primary's. Observer
    /// notifications ride the membership_update RPC, not this path.
    fn replace_view(&self, wire: &WireView) {
        let mut fresh = GroupView::from_wire(wire, |_, _| MemberHealth::default());
        let mut view = self.view.lock();
        std::mem::swap(&mut *view, &mut fresh);
    }
}

async fn fetch_view(
    transport: &dyn RpcTransport,
    primary_address: &str,
    primary_provider_id: u16,
    timeout: Duration,
) -> Result<WireView, GroupError> {
    let raw = transport
        .call(
            primary_address,
            primary_provider_id,
            GET_VIEW_RPC,
            b"{}".to_vec(),
            timeout,
        )
        .await?;
    Ok(serde_json::from_slice(&raw)?)
}

#[async_trait::async_trait]
impl GroupBackend for CentralizedBackend {
    fn kind(&self) -> &'static str {
        "centralized"
    }

    fn config(&self) -> Value {
        self.config_json.clone()
    }

    fn view_snapshot(&self) -> WireView {
        self.view.lock().to_wire()
    }

    fn digest(&self) -> u64 {
        self.view.lock().digest()
    }

    async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(address = %self.self_address, "centralized backend shutting down");

        if !self.is_primary {
            let message = LeaveMessage {
                address: self.self_address.clone(),
                provider_id: self.provider_id,
            };
            let _ = self
                .transport
                .call(
                    &self.primary.0,
                    self.primary.1,
                    LEAVE_RPC,
                    serde_json::to_vec(&message).expect("leave encodes"),
                    self.config.ping_timeout,
                )
                .await;
        }

        let _ = self.shutdown_tx.send(true);
        let task = self.ping_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.transport.deregister(self.provider_id, PING_RPC);
        self.transport.deregister(self.provider_id, GET_VIEW_RPC);
        self.transport.deregister(self.provider_id, MEMBERSHIP_UPDATE_RPC);
        self.transport.deregister(self.provider_id, LEAVE_RPC);

        self.view.lock().clear();
    }
}
