//! # SWIM Protocol Engine
//!
//! The engine owns the peer view, the gossip buffer, one protocol timer,
//! and the three RPC endpoints. Everything the protocol does happens in
//! one of two places: the periodic tick (probe rounds, suspicion sweep)
//! and the RPC handlers (gossip absorption, indirect probes, join/leave
//! announcements).
//!
//! ## Locking
//!
//! One mutex guards the view together with the probe schedule; the gossip
//! buffer has its own. Lock order is view < gossip < observers, and no
//! lock is ever held across an RPC forward — the tick copies what it needs
//! out of the view, awaits the probe, and re-acquires to apply the result.
//!
//! ## Teardown
//!
//! `shutdown` announces LEAVE, flips the shutting-down flag, cancels the
//! timer (waiting for any in-flight tick), deregisters the RPCs (after
//! which no handler can start), and clears the view. Re-arming the timer
//! is gated on the flag read *after* a tick completes, so a tick racing
//! shutdown finishes its work and stops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::backend::{BackendArgs, GroupBackend};
use crate::config::{
    ANNOUNCE_TIMEOUT, DEFAULT_PING_REQ_MEMBERS, DEFAULT_PING_REQ_TIMEOUT_MS,
    DEFAULT_PING_TIMEOUT_MS, DEFAULT_PROTOCOL_PERIOD_MS, DEFAULT_SUSPICION_TIMEOUT_MS,
    MAX_GOSSIP_ENTRIES, METADATA_CONFIG_KEY, METADATA_TYPE_KEY,
};
use crate::error::GroupError;
use crate::gossip::{compute_max_gossip, GossipBuffer, GossipEntry, GossipKind};
use crate::observer::{MembershipUpdate, ObserverRegistry};
use crate::serialize::WireView;
use crate::transport::{handler, RpcTransport};
use crate::view::GroupView;

use super::messages::{
    AnnounceRequest, PingReqRequest, PingReqResponse, PingRequest, PingResponse, ANNOUNCE_RPC,
    PING_REQ_RPC, PING_RPC,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for the SWIM engine, all optional in the JSON
/// configuration.
#[derive(Debug, Clone)]
pub struct SwimConfig {
    /// Period of the protocol timer; one probe round per period.
    pub protocol_period: Duration,
    /// Timeout on a direct ping.
    pub ping_timeout: Duration,
    /// Timeout on an indirect ping through a helper.
    pub ping_req_timeout: Duration,
    /// Number of helpers asked when a direct ping fails (k).
    pub ping_req_members: usize,
    /// Grace period between SUSPECTED and CONFIRMED_DEAD.
    pub suspicion_timeout: Duration,
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self {
            protocol_period: Duration::from_millis(DEFAULT_PROTOCOL_PERIOD_MS),
            ping_timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            ping_req_timeout: Duration::from_millis(DEFAULT_PING_REQ_TIMEOUT_MS),
            ping_req_members: DEFAULT_PING_REQ_MEMBERS,
            suspicion_timeout: Duration::from_millis(DEFAULT_SUSPICION_TIMEOUT_MS),
        }
    }
}

impl SwimConfig {
    /// Parses the backend configuration, filling in defaults for absent
    /// options. Unknown keys are ignored so configurations can carry
    /// deployment-specific annotations.
    pub fn from_json(config: &Value) -> Result<Self, GroupError> {
        let mut out = Self::default();
        if config.is_null() {
            return Ok(out);
        }
        let object = config.as_object().ok_or_else(|| {
            GroupError::InvalidConfig("swim configuration must be a JSON object".into())
        })?;
        for (key, value) in object {
            match key.as_str() {
                "protocol_period_ms" => out.protocol_period = parse_ms(key, value)?,
                "ping_timeout_ms" => out.ping_timeout = parse_ms(key, value)?,
                "ping_req_timeout_ms" => out.ping_req_timeout = parse_ms(key, value)?,
                "suspicion_timeout_ms" => out.suspicion_timeout = parse_ms(key, value)?,
                "ping_req_members" => {
                    let n = value.as_u64().ok_or_else(|| {
                        GroupError::InvalidConfig(
                            "\"ping_req_members\" should be an integer".into(),
                        )
                    })?;
                    if n < 1 {
                        return Err(GroupError::InvalidConfig(
                            "\"ping_req_members\" should be at least 1".into(),
                        ));
                    }
                    out.ping_req_members = n as usize;
                }
                other => trace!(option = other, "ignoring unknown swim option"),
            }
        }
        Ok(out)
    }

    /// The effective configuration, serialized back with defaults filled
    /// in. This is what lands in the `__config__` metadata key.
    pub fn to_json(&self) -> Value {
        json!({
            "protocol_period_ms": self.protocol_period.as_millis() as u64,
            "ping_timeout_ms": self.ping_timeout.as_millis() as u64,
            "ping_req_timeout_ms": self.ping_req_timeout.as_millis() as u64,
            "ping_req_members": self.ping_req_members,
            "suspicion_timeout_ms": self.suspicion_timeout.as_millis() as u64,
        })
    }
}

fn parse_ms(key: &str, value: &Value) -> Result<Duration, GroupError> {
    let ms = value
        .as_f64()
        .ok_or_else(|| GroupError::InvalidConfig(format!("\"{key}\" should be a number")))?;
    if ms <= 0.0 {
        return Err(GroupError::InvalidConfig(format!(
            "\"{key}\" should be positive"
        )));
    }
    Ok(Duration::from_secs_f64(ms / 1000.0))
}

// ---------------------------------------------------------------------------
// Member State
// ---------------------------------------------------------------------------

/// Where a peer stands in the failure-detection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    /// Responding to probes, or not yet caught misbehaving.
    Alive,
    /// Missed a direct and all indirect probes; the suspicion clock runs.
    Suspected,
    /// Declared dead. Transient — the member is removed immediately after.
    ConfirmedDead,
}

/// Per-member bookkeeping, owned by the view.
#[derive(Debug)]
struct SwimMemberState {
    status: MemberStatus,
    incarnation: u64,
    suspicion_start: Option<Instant>,
}

impl SwimMemberState {
    fn alive(incarnation: u64) -> Self {
        Self {
            status: MemberStatus::Alive,
            incarnation,
            suspicion_start: None,
        }
    }
}

/// View plus probe schedule, guarded by one mutex so the schedule can
/// never dangle past a membership change.
struct SwimState {
    view: GroupView<SwimMemberState>,
    probe_order: Vec<usize>,
    probe_cursor: usize,
}

impl SwimState {
    /// Regenerates the probe permutation (Fisher–Yates) and rewinds the
    /// cursor. Called on every membership change and on cursor wrap, so a
    /// cycle visits each live peer exactly once.
    fn reshuffle(&mut self) {
        self.probe_order = (0..self.view.len()).collect();
        self.probe_order.shuffle(&mut rand::thread_rng());
        self.probe_cursor = 0;
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The SWIM membership backend.
pub struct SwimBackend {
    transport: Arc<dyn RpcTransport>,
    provider_id: u16,
    self_address: String,
    self_incarnation: AtomicU64,
    state: Mutex<SwimState>,
    gossip: GossipBuffer,
    observers: Arc<ObserverRegistry>,
    config: SwimConfig,
    config_json: Value,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SwimBackend {
    /// Brings the engine up: builds the view from the bootstrap snapshot,
    /// registers the three RPCs, announces a join if requested, and starts
    /// the protocol timer.
    pub async fn start(args: BackendArgs) -> Result<Arc<Self>, GroupError> {
        let config = SwimConfig::from_json(&args.config)?;
        let config_json = config.to_json();
        let self_address = args.transport.local_address().to_string();
        let provider_id = args.provider_id;

        if args.initial_view.members.is_empty() && !args.join {
            return Err(GroupError::InvalidArgument(
                "swim backend needs a non-empty initial view".into(),
            ));
        }

        let mut view =
            GroupView::from_wire(&args.initial_view, |_, _| SwimMemberState::alive(1));
        view.set_metadata(METADATA_CONFIG_KEY, &config_json.to_string());
        view.set_metadata(METADATA_TYPE_KEY, "swim");
        if args.join {
            view.add_member(&self_address, provider_id, SwimMemberState::alive(1));
        }

        // Peers present at bootstrap are reported as joins to whoever
        // registered callbacks ahead of start.
        let initial_members: Vec<(String, u16)> = view
            .members()
            .iter()
            .filter(|m| !(m.address == self_address && m.provider_id == provider_id))
            .map(|m| (m.address.clone(), m.provider_id))
            .collect();

        let gossip = GossipBuffer::new();
        gossip.set_group_size(view.len());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = Arc::new(Self {
            transport: args.transport,
            provider_id,
            self_address,
            self_incarnation: AtomicU64::new(1),
            state: Mutex::new(SwimState {
                view,
                probe_order: Vec::new(),
                probe_cursor: 0,
            }),
            gossip,
            observers: args.observers,
            config,
            config_json,
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
            timer: Mutex::new(None),
        });
        engine.state.lock().reshuffle();
        Self::register_rpcs(&engine)?;

        for (address, member_provider_id) in initial_members {
            engine
                .observers
                .notify_membership(MembershipUpdate::Joined, &address, member_provider_id);
        }

        if args.join {
            engine.gossip.add(GossipEntry {
                kind: GossipKind::Join,
                address: engine.self_address.clone(),
                provider_id,
                incarnation: engine.self_incarnation.load(Ordering::SeqCst),
            });
            engine.announce(GossipKind::Join).await;
        }

        let timer = tokio::spawn(Self::protocol_loop(Arc::clone(&engine), shutdown_rx));
        *engine.timer.lock() = Some(timer);

        debug!(
            address = %engine.self_address,
            provider_id,
            members = engine.state.lock().view.len(),
            "swim engine started"
        );
        Ok(engine)
    }

    /// The address this engine identifies itself with.
    pub fn local_address(&self) -> &str {
        &self.self_address
    }

    /// This member's authoritative incarnation.
    pub fn self_incarnation(&self) -> u64 {
        self.self_incarnation.load(Ordering::SeqCst)
    }

    /// The failure-detection status of a member, if it is in the view.
    pub fn member_status(&self, address: &str, provider_id: u16) -> Option<MemberStatus> {
        self.state
            .lock()
            .view
            .find_member(address, provider_id)
            .map(|m| m.extra.status)
    }

    // -----------------------------------------------------------------------
    // RPC handlers
    // -----------------------------------------------------------------------

    fn register_rpcs(this: &Arc<Self>) -> Result<(), GroupError> {
        let result = (|| {
            let engine = Arc::clone(this);
            this.transport.register(
                this.provider_id,
                PING_RPC,
                handler(move |body| {
                    let engine = Arc::clone(&engine);
                    async move { engine.handle_ping(body).await }
                }),
            )?;

            let engine = Arc::clone(this);
            this.transport.register(
                this.provider_id,
                PING_REQ_RPC,
                handler(move |body| {
                    let engine = Arc::clone(&engine);
                    async move { engine.handle_ping_req(body).await }
                }),
            )?;

            let engine = Arc::clone(this);
            this.transport.register(
                this.provider_id,
                ANNOUNCE_RPC,
                handler(move |body| {
                    let engine = Arc::clone(&engine);
                    async move { engine.handle_announce(body).await }
                }),
            )
        })();

        // A half-registered engine must not linger.
        if result.is_err() {
            this.transport.deregister(this.provider_id, PING_RPC);
            this.transport.deregister(this.provider_id, PING_REQ_RPC);
            this.transport.deregister(this.provider_id, ANNOUNCE_RPC);
        }
        result.map_err(Into::into)
    }

    async fn handle_ping(&self, body: Vec<u8>) -> Vec<u8> {
        let response = match serde_json::from_slice::<PingRequest>(&body) {
            Ok(request) => {
                self.apply_gossip(&request.gossip);
                PingResponse {
                    responder_incarnation: self.self_incarnation.load(Ordering::SeqCst),
                    gossip: self.gossip.gather(MAX_GOSSIP_ENTRIES),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to decode ping request");
                PingResponse::default()
            }
        };
        serde_json::to_vec(&response).expect("ping response encodes")
    }

    async fn handle_ping_req(&self, body: Vec<u8>) -> Vec<u8> {
        let mut response = PingReqResponse::default();
        match serde_json::from_slice::<PingReqRequest>(&body) {
            Ok(request) => {
                self.apply_gossip(&request.gossip);

                let ping = PingRequest {
                    sender_incarnation: self.self_incarnation.load(Ordering::SeqCst),
                    gossip: self.gossip.gather(MAX_GOSSIP_ENTRIES),
                };
                let result = self
                    .transport
                    .call(
                        &request.target_address,
                        request.target_provider_id,
                        PING_RPC,
                        serde_json::to_vec(&ping).expect("ping encodes"),
                        self.config.ping_timeout,
                    )
                    .await;

                // Any failure on our side (lookup, connect, timeout, bad
                // payload) reports target_responded = false.
                if let Ok(raw) = result {
                    if let Ok(out) = serde_json::from_slice::<PingResponse>(&raw) {
                        self.apply_gossip(&out.gossip);
                        response.target_responded = true;
                        response.target_incarnation = out.responder_incarnation;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to decode ping-req request");
            }
        }
        response.gossip = self.gossip.gather(MAX_GOSSIP_ENTRIES);
        serde_json::to_vec(&response).expect("ping-req response encodes")
    }

    async fn handle_announce(&self, body: Vec<u8>) -> Vec<u8> {
        match serde_json::from_slice::<AnnounceRequest>(&body) {
            Ok(request) => {
                self.apply_gossip(&request.gossip);
                // The announcement itself is one more gossip entry.
                self.apply_gossip(&[GossipEntry {
                    kind: request.kind,
                    address: request.address,
                    provider_id: request.provider_id,
                    incarnation: request.incarnation,
                }]);
            }
            Err(e) => {
                warn!(error = %e, "failed to decode announce request");
            }
        }
        b"{}".to_vec()
    }

    // -----------------------------------------------------------------------
    // Gossip application
    // -----------------------------------------------------------------------

    /// Merges a batch of received gossip into local state, firing observer
    /// callbacks for joins, leaves and deaths. Each applied entry is
    /// re-queued in the local buffer so it keeps propagating until its
    /// transmission budget runs out.
    pub fn apply_gossip(&self, entries: &[GossipEntry]) {
        for entry in entries {
            if entry.address == self.self_address && entry.provider_id == self.provider_id {
                // We are authoritative about ourselves: a suspicion gets
                // refuted, everything else is ignored.
                if entry.kind == GossipKind::Suspect {
                    self.refute();
                }
                continue;
            }
            self.apply_peer_entry(entry);
            self.gossip.add(entry.clone());
        }
    }

    fn apply_peer_entry(&self, entry: &GossipEntry) {
        let mut notification = None;
        {
            let mut state = self.state.lock();
            match entry.kind {
                GossipKind::Alive | GossipKind::Join => {
                    if state.view.find_member(&entry.address, entry.provider_id).is_none() {
                        state.view.add_member(
                            &entry.address,
                            entry.provider_id,
                            SwimMemberState::alive(entry.incarnation),
                        );
                        state.reshuffle();
                        self.gossip.set_group_size(state.view.len());
                        notification = Some(MembershipUpdate::Joined);
                    } else if entry.kind == GossipKind::Alive {
                        // JOIN about a known member carries no new state.
                        if let Some(member) =
                            state.view.find_member_mut(&entry.address, entry.provider_id)
                        {
                            let local = &mut member.extra;
                            if entry.incarnation > local.incarnation {
                                local.status = MemberStatus::Alive;
                                local.incarnation = entry.incarnation;
                                local.suspicion_start = None;
                            } else if entry.incarnation == local.incarnation
                                && local.status == MemberStatus::Suspected
                            {
                                // ALIVE beats SUSPECT at equal incarnation.
                                local.status = MemberStatus::Alive;
                                local.suspicion_start = None;
                            }
                        }
                    }
                }
                GossipKind::Suspect => {
                    if let Some(member) =
                        state.view.find_member_mut(&entry.address, entry.provider_id)
                    {
                        let local = &mut member.extra;
                        if entry.incarnation >= local.incarnation
                            && local.status == MemberStatus::Alive
                        {
                            local.status = MemberStatus::Suspected;
                            local.incarnation = entry.incarnation;
                            local.suspicion_start = Some(Instant::now());
                            debug!(
                                address = %entry.address,
                                provider_id = entry.provider_id,
                                "member suspected via gossip"
                            );
                        }
                    }
                }
                GossipKind::Confirm | GossipKind::Leave => {
                    if state.view.remove_member(&entry.address, entry.provider_id) {
                        state.reshuffle();
                        self.gossip.set_group_size(state.view.len());
                        notification = Some(if entry.kind == GossipKind::Leave {
                            MembershipUpdate::Left
                        } else {
                            MembershipUpdate::Died
                        });
                    }
                }
            }
        }
        if let Some(update) = notification {
            self.observers
                .notify_membership(update, &entry.address, entry.provider_id);
        }
    }

    /// Someone thinks we are dead. Prove them wrong: bump our incarnation
    /// and gossip ALIVE at the new value, which outranks the suspicion.
    fn refute(&self) {
        let incarnation = self.self_incarnation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(me) = self
            .state
            .lock()
            .view
            .find_member_mut(&self.self_address, self.provider_id)
        {
            me.extra.incarnation = incarnation;
        }
        debug!(incarnation, "refuting suspicion about self");
        self.gossip.add(GossipEntry {
            kind: GossipKind::Alive,
            address: self.self_address.clone(),
            provider_id: self.provider_id,
            incarnation,
        });
    }

    // -----------------------------------------------------------------------
    // Protocol tick
    // -----------------------------------------------------------------------

    async fn protocol_loop(engine: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(engine.config.protocol_period) => {}
                _ = shutdown.changed() => {
                    debug!("protocol timer cancelled");
                    return;
                }
            }
            if engine.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            engine.protocol_tick().await;
            // Re-arm only if shutdown did not land while we were working.
            if engine.shutting_down.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// One protocol round: sweep expired suspicions, prune spent gossip,
    /// then probe the next peer in the schedule.
    async fn protocol_tick(&self) {
        self.sweep_suspects();
        self.gossip.cleanup();

        let Some((target_address, target_provider_id)) = self.next_probe_target() else {
            return;
        };

        let ping = PingRequest {
            sender_incarnation: self.self_incarnation.load(Ordering::SeqCst),
            gossip: self.gossip.gather(MAX_GOSSIP_ENTRIES),
        };
        let direct = self
            .transport
            .call(
                &target_address,
                target_provider_id,
                PING_RPC,
                serde_json::to_vec(&ping).expect("ping encodes"),
                self.config.ping_timeout,
            )
            .await;

        match direct {
            Ok(raw) => {
                if let Ok(response) = serde_json::from_slice::<PingResponse>(&raw) {
                    self.apply_gossip(&response.gossip);
                    self.note_target_alive(
                        &target_address,
                        target_provider_id,
                        response.responder_incarnation,
                    );
                    return;
                }
            }
            Err(e) => {
                trace!(
                    target = %target_address,
                    provider_id = target_provider_id,
                    error = %e,
                    "direct ping failed"
                );
            }
        }

        debug!(
            target = %target_address,
            provider_id = target_provider_id,
            "direct ping failed, probing indirectly"
        );
        if self
            .indirect_probe(&target_address, target_provider_id)
            .await
        {
            return;
        }
        self.mark_suspected(&target_address, target_provider_id);
    }

    /// Declares every suspect whose grace period has expired dead: gossip
    /// CONFIRM, remove from the view, then tell the observers.
    fn sweep_suspects(&self) {
        let now = Instant::now();
        let mut died = Vec::new();
        {
            let mut state = self.state.lock();
            let expired: Vec<(String, u16, u64)> = state
                .view
                .members()
                .iter()
                .filter_map(|m| match (m.extra.status, m.extra.suspicion_start) {
                    (MemberStatus::Suspected, Some(start))
                        if now.duration_since(start) >= self.config.suspicion_timeout =>
                    {
                        Some((m.address.clone(), m.provider_id, m.extra.incarnation))
                    }
                    _ => None,
                })
                .collect();

            for (address, provider_id, incarnation) in expired {
                debug!(%address, provider_id, "suspicion timeout expired, confirming death");
                self.gossip.add(GossipEntry {
                    kind: GossipKind::Confirm,
                    address: address.clone(),
                    provider_id,
                    incarnation,
                });
                state.view.remove_member(&address, provider_id);
                died.push((address, provider_id));
            }
            if !died.is_empty() {
                state.reshuffle();
                self.gossip.set_group_size(state.view.len());
            }
        }
        for (address, provider_id) in died {
            self.observers
                .notify_membership(MembershipUpdate::Died, &address, provider_id);
        }
    }

    /// Advances the probe cursor to the next live peer, refreshing the
    /// permutation on wrap. Returns `None` when there is nobody to probe.
    fn next_probe_target(&self) -> Option<(String, u16)> {
        let mut state = self.state.lock();
        if state.view.len() < 2 {
            return None;
        }
        if state.probe_order.len() != state.view.len() {
            state.reshuffle();
        }
        for _ in 0..state.probe_order.len() {
            if state.probe_cursor >= state.probe_order.len() {
                state.reshuffle();
            }
            let idx = state.probe_order[state.probe_cursor];
            state.probe_cursor += 1;

            let Some(member) = state.view.member_at(idx) else {
                continue;
            };
            if member.address == self.self_address && member.provider_id == self.provider_id {
                continue;
            }
            if member.extra.status == MemberStatus::ConfirmedDead {
                continue;
            }
            return Some((member.address.clone(), member.provider_id));
        }
        None
    }

    /// Races ping-req through up to k helpers. The first helper that got
    /// an answer from the target wins; the remaining requests are dropped.
    async fn indirect_probe(&self, target_address: &str, target_provider_id: u16) -> bool {
        let helpers: Vec<(String, u16)> = {
            let state = self.state.lock();
            let mut candidates: Vec<(String, u16)> = state
                .view
                .members()
                .iter()
                .filter(|m| {
                    !(m.address == self.self_address && m.provider_id == self.provider_id)
                        && !(m.address == target_address && m.provider_id == target_provider_id)
                        && m.extra.status != MemberStatus::ConfirmedDead
                })
                .map(|m| (m.address.clone(), m.provider_id))
                .collect();
            candidates.shuffle(&mut rand::thread_rng());
            candidates.truncate(self.config.ping_req_members);
            candidates
        };
        if helpers.is_empty() {
            return false;
        }

        let mut requests: FuturesUnordered<_> = helpers
            .into_iter()
            .map(|(address, provider_id)| {
                let request = PingReqRequest {
                    target_address: target_address.to_string(),
                    target_provider_id,
                    sender_incarnation: self.self_incarnation.load(Ordering::SeqCst),
                    gossip: self.gossip.gather(MAX_GOSSIP_ENTRIES),
                };
                async move {
                    self.transport
                        .call(
                            &address,
                            provider_id,
                            PING_REQ_RPC,
                            serde_json::to_vec(&request).expect("ping-req encodes"),
                            self.config.ping_req_timeout,
                        )
                        .await
                }
            })
            .collect();

        while let Some(result) = requests.next().await {
            let Ok(raw) = result else { continue };
            let Ok(response) = serde_json::from_slice::<PingReqResponse>(&raw) else {
                continue;
            };
            self.apply_gossip(&response.gossip);
            if response.target_responded {
                self.note_target_alive(
                    target_address,
                    target_provider_id,
                    response.target_incarnation,
                );
                return true;
            }
        }
        false
    }

    /// A probe (direct or via helper) reached the target. If it was under
    /// suspicion and came back with a strictly greater incarnation, clear
    /// the suspicion and spread the good news.
    fn note_target_alive(&self, address: &str, provider_id: u16, incarnation: u64) {
        let mut cleared = false;
        {
            let mut state = self.state.lock();
            if let Some(member) = state.view.find_member_mut(address, provider_id) {
                let local = &mut member.extra;
                if local.status == MemberStatus::Suspected && incarnation > local.incarnation {
                    local.status = MemberStatus::Alive;
                    local.incarnation = incarnation;
                    local.suspicion_start = None;
                    cleared = true;
                }
            }
        }
        if cleared {
            debug!(%address, provider_id, incarnation, "suspicion cleared by successful probe");
            self.gossip.add(GossipEntry {
                kind: GossipKind::Alive,
                address: address.to_string(),
                provider_id,
                incarnation,
            });
        }
    }

    /// Every probe avenue failed: start the suspicion clock, but only on a
    /// member still believed alive.
    fn mark_suspected(&self, address: &str, provider_id: u16) {
        let mut suspected_at = None;
        {
            let mut state = self.state.lock();
            if let Some(member) = state.view.find_member_mut(address, provider_id) {
                if member.extra.status == MemberStatus::Alive {
                    member.extra.status = MemberStatus::Suspected;
                    member.extra.suspicion_start = Some(Instant::now());
                    suspected_at = Some(member.extra.incarnation);
                }
            }
        }
        if let Some(incarnation) = suspected_at {
            debug!(%address, provider_id, incarnation, "marking member suspected");
            self.gossip.add(GossipEntry {
                kind: GossipKind::Suspect,
                address: address.to_string(),
                provider_id,
                incarnation,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Announcements
    // -----------------------------------------------------------------------

    /// Sends a JOIN or LEAVE announcement about ourselves to a bounded
    /// sample of known peers. Best-effort: failures are ignored, the
    /// gossip stream repairs any gap.
    async fn announce(&self, kind: GossipKind) {
        let targets: Vec<(String, u16)> = {
            let state = self.state.lock();
            let budget = compute_max_gossip(state.view.len()).max(1) as usize;
            state
                .view
                .members()
                .iter()
                .filter(|m| !(m.address == self.self_address && m.provider_id == self.provider_id))
                .take(budget)
                .map(|m| (m.address.clone(), m.provider_id))
                .collect()
        };
        let incarnation = self.self_incarnation.load(Ordering::SeqCst);

        let sends = targets.into_iter().map(|(address, provider_id)| {
            let request = AnnounceRequest {
                kind,
                address: self.self_address.clone(),
                provider_id: self.provider_id,
                incarnation,
                gossip: self.gossip.gather(MAX_GOSSIP_ENTRIES),
            };
            async move {
                let _ = self
                    .transport
                    .call(
                        &address,
                        provider_id,
                        ANNOUNCE_RPC,
                        serde_json::to_vec(&request).expect("announce encodes"),
                        ANNOUNCE_TIMEOUT,
                    )
                    .await;
            }
        });
        futures::future::join_all(sends).await;
    }
}

#[async_trait::async_trait]
impl GroupBackend for SwimBackend {
    fn kind(&self) -> &'static str {
        "swim"
    }

    fn config(&self) -> Value {
        self.config_json.clone()
    }

    fn view_snapshot(&self) -> WireView {
        self.state.lock().view.to_wire()
    }

    fn digest(&self) -> u64 {
        self.state.lock().view.digest()
    }

    async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(address = %self.self_address, "swim engine shutting down");

        if self.state.lock().view.len() > 1 {
            self.gossip.add(GossipEntry {
                kind: GossipKind::Leave,
                address: self.self_address.clone(),
                provider_id: self.provider_id,
                incarnation: self.self_incarnation.load(Ordering::SeqCst),
            });
            self.announce(GossipKind::Leave).await;
        }

        let _ = self.shutdown_tx.send(true);
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            let _ = timer.await;
        }

        self.transport.deregister(self.provider_id, PING_RPC);
        self.transport.deregister(self.provider_id, PING_REQ_RPC);
        self.transport.deregister(self.provider_id, ANNOUNCE_RPC);

        self.state.lock().view.clear();
    }
}
