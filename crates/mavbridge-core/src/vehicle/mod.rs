//! Vehicle Engine
//!
//! Drives one vehicle link through its initialization sequence
//! (`Offline` → `AwaitingCapabilities` → `SyncingParameters` → `Ready`) and
//! mediates outgoing commands once ready.
//!
//! The engine runs as a handful of tokio tasks sharing one inner state:
//!
//! - the reader (one per link, started by the caller with
//!   [`VehicleEngine::spawn_reader`] or fed with
//!   [`VehicleEngine::process_datagram`]) decodes frames and dispatches them
//! - the state handler ticks every [`EngineConfig::tick`] and advances the
//!   phase machine, requests capabilities and parameters, and runs the
//!   command queue
//! - one watchdog per tracked message kind, whose transitions are applied
//!   by a small health task
//! - an RC task that resends the active RC override every
//!   [`EngineConfig::rc_resend`] until it is released or times out
//!
//! Encoded outbound frames are delivered on the channel returned by
//! [`VehicleEngine::start`]; the caller owns the actual link.
//!
//! ## Example
//!
//! ```rust,ignore
//! let codec = Arc::new(Codec::new(Arc::new(SchemaRegistry::builtin()?)));
//! let (engine, mut outbound) = VehicleEngine::start(codec, EngineConfig::default());
//! engine.spawn_reader(serial_reader);
//! tokio::spawn(async move {
//!     while let Some(bytes) = outbound.recv().await {
//!         serial_writer.write_all(&bytes).await?;
//!     }
//! });
//! let handle = engine.set_mode_and_arm(Some(FlightMode::Hold), Some(true));
//! handle.wait().await?;
//! ```

mod messages;
pub mod mode;
mod state;

pub use messages::{
    ParamValue, Target, CMD_DO_SET_HOME, CMD_DO_SET_MODE, CMD_REQUEST_AUTOPILOT_CAPABILITIES,
    PARAM_TYPE_REAL32,
};
pub use mode::FlightMode;
pub use state::{aggregate_health, Phase, StatusEntry, Subsystem, VehicleState};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::command::{CommandHandle, CommandQueue, LastCommand, TickOutcome};
use crate::config::EngineConfig;
use crate::health::{Health, HealthEvent, HealthMonitor};
use crate::params::{ParamError, ParamSnapshot, ParamSync};
use crate::protocol::{Codec, Frame, FrameCodec, Packet, ProtocolError, SenderInfo, Value};

/// Outbound frames buffered before sends report [`ProtocolError::LinkBusy`]
const OUTBOUND_CAPACITY: usize = 256;

/// Raw frames buffered per fan-out subscriber
const RAW_CAPACITY: usize = 256;

/// STATUSTEXT entries kept until drained
const SYSLOG_CAPACITY: usize = 200;

/// Channel values being resent to the vehicle
#[derive(Debug, Clone, Copy)]
struct RcOverride {
    channels: [u16; 8],
    /// Zero keeps the override until it is released
    timeout: Duration,
    since: Instant,
}

/// Handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct VehicleEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    codec: Arc<Codec>,
    config: EngineConfig,
    state: RwLock<VehicleState>,
    params: ParamSync,
    queue: CommandQueue,
    monitor: HealthMonitor,
    syslog: Mutex<VecDeque<StatusEntry>>,
    rc: Mutex<Option<RcOverride>>,
    outbound: mpsc::Sender<Vec<u8>>,
    raw: broadcast::Sender<Bytes>,
    seq: AtomicU8,
    heartbeat_kind: Option<u8>,
    subsystem_kinds: HashMap<u8, Subsystem>,
    cancel: CancellationToken,
}

impl VehicleEngine {
    /// Start the engine's background tasks.
    ///
    /// Returns the engine handle and the receiver of encoded outbound
    /// frames. Must be called from within a tokio runtime.
    pub fn start(codec: Arc<Codec>, config: EngineConfig) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let cancel = CancellationToken::new();
        let (mut monitor, health_rx) = HealthMonitor::new(cancel.clone());

        let registry = codec.registry();
        let heartbeat_kind = registry.by_name("HEARTBEAT").map(|s| s.id);
        match heartbeat_kind {
            Some(kind) => monitor.track(kind, config.heartbeat_timeout()),
            None => tracing::warn!("Schema has no HEARTBEAT; the link will never come online"),
        }

        let mut subsystem_kinds = HashMap::new();
        for subsystem in Subsystem::ALL {
            for name in subsystem.messages() {
                if let Some(schema) = registry.by_name(name) {
                    monitor.track(schema.id, config.telemetry_timeout());
                    subsystem_kinds.insert(schema.id, subsystem);
                }
            }
        }

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (raw, _) = broadcast::channel(RAW_CAPACITY);

        let inner = Arc::new(EngineInner {
            queue: CommandQueue::new(config.command_retries),
            codec,
            config,
            state: RwLock::new(VehicleState::new()),
            params: ParamSync::new(),
            monitor,
            syslog: Mutex::new(VecDeque::with_capacity(SYSLOG_CAPACITY)),
            rc: Mutex::new(None),
            outbound,
            raw,
            seq: AtomicU8::new(0),
            heartbeat_kind,
            subsystem_kinds,
            cancel,
        });

        tokio::spawn(health_task(Arc::clone(&inner), health_rx));
        tokio::spawn(state_task(Arc::clone(&inner)));
        tokio::spawn(rc_task(Arc::clone(&inner)));
        tracing::debug!(
            tracked = inner.subsystem_kinds.len() + 1,
            "Vehicle engine started"
        );

        (Self { inner }, outbound_rx)
    }

    /// Decode every frame in a datagram and dispatch it. Returns the number
    /// of valid frames handled.
    pub fn process_datagram(&self, data: &[u8]) -> usize {
        let mut framer = FrameCodec::new(Arc::clone(&self.inner.codec));
        let mut buf = BytesMut::from(data);
        let mut handled = 0;
        while let Ok(Some(item)) = framer.decode_eof(&mut buf) {
            if self.inner.handle_item(item) {
                handled += 1;
            }
        }
        handled
    }

    /// Read frames from a byte stream until it ends or the engine shuts down
    pub async fn run_reader<R>(&self, reader: R) -> Result<(), ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(reader, FrameCodec::new(Arc::clone(&self.inner.codec)));
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return Ok(()),
                item = frames.next() => match item {
                    Some(Ok(item)) => {
                        self.inner.handle_item(item);
                    }
                    Some(Err(e)) => {
                        tracing::error!("Link read failed: {}", e);
                        return Err(e.into());
                    }
                    None => {
                        tracing::info!("Link closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Run [`VehicleEngine::run_reader`] as a task
    pub fn spawn_reader<R>(&self, reader: R) -> JoinHandle<Result<(), ProtocolError>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let engine = self.clone();
        tokio::spawn(async move { engine.run_reader(reader).await })
    }

    /// Queue a COMMAND_LONG
    pub fn submit_command(&self, opcode: u16, params: [f32; 7]) -> CommandHandle {
        self.inner.queue.push(opcode, params)
    }

    /// Change flight mode and/or arm state. `None` keeps the current value.
    pub fn set_mode_and_arm(&self, mode: Option<FlightMode>, arm: Option<bool>) -> CommandHandle {
        let (armed_now, mode_now) = {
            let state = self.inner.read_state();
            (state.armed, state.mode)
        };
        let params = messages::set_mode_params(mode.or(mode_now), arm.unwrap_or(armed_now));
        self.submit_command(CMD_DO_SET_MODE, params)
    }

    /// Set the home position
    pub fn set_home(&self, lat: f32, lon: f32, alt: f32, relative: bool) -> CommandHandle {
        self.submit_command(
            CMD_DO_SET_HOME,
            messages::set_home_params(lat, lon, alt, relative),
        )
    }

    /// Override the vehicle's RC channels.
    ///
    /// While enabled the channel values are sent at once and then resent
    /// every [`EngineConfig::rc_resend`] until the override is released
    /// with `enabled = false` or `timeout` passes without a newer call.
    /// A zero `timeout` never expires. Each call replaces the previous
    /// override.
    pub fn send_rc_override(
        &self,
        channels: [u16; 8],
        enabled: bool,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        let inner = &self.inner;
        {
            let mut rc = inner.rc.lock().unwrap_or_else(PoisonError::into_inner);
            if !enabled {
                if rc.take().is_some() {
                    tracing::info!("RC override released");
                }
                return Ok(());
            }
            if rc.is_none() {
                tracing::info!(timeout_ms = timeout.as_millis() as u64, "RC override engaged");
            }
            *rc = Some(RcOverride {
                channels,
                timeout,
                since: Instant::now(),
            });
        }
        inner.send(
            "RC_CHANNELS_OVERRIDE",
            &messages::rc_channels_override(inner.target(), &channels),
        )
    }

    /// Whether an RC override is currently being resent
    pub fn rc_override_active(&self) -> bool {
        self.inner
            .rc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Set a parameter and verify it by reading the echoed value back
    pub async fn set_param(&self, name: &str, value: f32) -> Result<(), ParamError> {
        let target = self.inner.target();
        self.inner
            .send("PARAM_SET", &messages::param_set(target, name, value))?;
        tokio::time::sleep(self.inner.config.param_settle()).await;

        let actual = self.get_param(name)?;
        if actual != value {
            tracing::warn!(name, expected = value, actual, "Parameter did not update");
            return Err(ParamError::SetFailed {
                name: name.to_string(),
                expected: value,
                actual,
            });
        }
        tracing::info!(name, value, "Parameter set");
        Ok(())
    }

    /// Cached parameter value
    pub fn get_param(&self, name: &str) -> Result<f32, ParamError> {
        self.inner
            .params
            .get(name)
            .ok_or_else(|| ParamError::NotFound(name.to_string()))
    }

    /// Parameter value by index, requesting it from the vehicle if needed
    pub async fn get_param_by_index(&self, index: u16) -> Result<f32, ParamError> {
        let inner = &self.inner;
        for _ in 0..inner.config.param_read_attempts {
            if let Some(value) = inner.params.get_by_index(index) {
                return Ok(value);
            }
            inner.send(
                "PARAM_REQUEST_READ",
                &messages::param_request_read(inner.target(), index),
            )?;
            tokio::time::sleep(inner.config.param_read_delay()).await;
        }
        inner
            .params
            .get_by_index(index)
            .ok_or(ParamError::Unavailable { index })
    }

    /// Drop the parameter table and fetch it again
    pub fn refresh_params(&self) {
        self.inner.params.reset();
        let mut state = self.inner.write_state();
        if state.phase == Phase::Ready {
            state.phase = Phase::SyncingParameters;
        }
        tracing::info!("Parameter refresh requested");
    }

    /// Indices not yet received
    pub fn missing_params(&self) -> Vec<u16> {
        self.inner.params.missing()
    }

    /// Copy of the parameter table
    pub fn all_params(&self) -> ParamSnapshot {
        self.inner.params.snapshot()
    }

    /// Poll until parameter synchronization completes, at most `attempts`
    /// times with `delay` between checks
    pub async fn wait_for_params(&self, attempts: u32, delay: Duration) -> bool {
        for _ in 0..attempts {
            if self.inner.params.is_complete() {
                return true;
            }
            tokio::time::sleep(delay).await;
        }
        self.inner.params.is_complete()
    }

    /// Copy of the current vehicle state
    pub fn snapshot(&self) -> VehicleState {
        self.inner.read_state().clone()
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.inner.read_state().phase
    }

    /// Subscribe to the raw bytes of every valid inbound frame
    pub fn subscribe_raw(&self) -> broadcast::Receiver<Bytes> {
        self.inner.raw.subscribe()
    }

    /// Opcode and status of the most recently handled command
    pub fn last_command(&self) -> Option<LastCommand> {
        self.inner.queue.last_command()
    }

    /// Forget the most recently handled command
    pub fn clear_last_command(&self) {
        self.inner.queue.clear_last();
    }

    /// Drain the STATUSTEXT log, oldest first
    pub fn take_syslog(&self) -> Vec<StatusEntry> {
        let mut log = self
            .inner
            .syslog
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        log.drain(..).collect()
    }

    /// Token cancelled when the engine shuts down, for link tasks
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    /// Stop every engine task
    pub fn shutdown(&self) {
        tracing::info!("Vehicle engine shutting down");
        self.inner.monitor.stop_all();
        self.inner.cancel.cancel();
    }
}

impl EngineInner {
    fn read_state(&self) -> RwLockReadGuard<'_, VehicleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, VehicleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn target(&self) -> Target {
        let state = self.read_state();
        Target {
            system: state.system_id.unwrap_or(0),
            component: state.component_id.unwrap_or(0),
        }
    }

    /// Pack, encode and queue a message for the link
    fn send(&self, name: &str, fields: &HashMap<String, Value>) -> Result<(), ProtocolError> {
        let sender = SenderInfo {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            system_id: self.config.system_id,
            component_id: self.config.component_id,
        };
        let packet = self.codec.pack_named(name, fields, sender)?;
        let bytes = self.codec.encode(&packet)?;
        self.outbound.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::LinkBusy,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::LinkClosed,
        })
    }

    /// Handle one framing result. Returns true for a valid frame.
    fn handle_item(&self, item: Result<Frame, ProtocolError>) -> bool {
        match item {
            Ok(frame) => {
                self.handle_frame(frame);
                true
            }
            Err(ProtocolError::UnknownKind(packet)) => {
                tracing::debug!(kind = packet.header.kind, "Keeping packet of unknown kind");
                self.write_state()
                    .unknown
                    .insert(packet.header.kind, *packet);
                false
            }
            Err(e) => {
                tracing::debug!("Discarding frame: {}", e);
                false
            }
        }
    }

    fn handle_frame(&self, frame: Frame) {
        let Frame { packet, raw } = frame;
        self.learn_sender(&packet);
        // No subscribers is fine
        let _ = self.raw.send(Bytes::from(raw));

        let msg = match self.codec.unpack(&packet) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(kind = packet.header.kind, "Failed to unpack message: {}", e);
                return;
            }
        };
        self.monitor.update(msg.kind);

        match msg.name.as_str() {
            "HEARTBEAT" => {
                let (armed, mode) = messages::read_heartbeat(&msg);
                let mut state = self.write_state();
                if state.armed != armed {
                    tracing::info!(armed, "Vehicle arm state changed");
                }
                if state.mode != mode {
                    tracing::info!(mode = ?mode, "Vehicle flight mode changed");
                }
                state.armed = armed;
                state.mode = mode;
            }
            "COMMAND_ACK" => {
                if let Some((opcode, status)) = messages::read_command_ack(&msg) {
                    tracing::debug!(opcode, ?status, "Command acknowledged");
                    self.queue.record_ack(opcode, status);
                }
            }
            "AUTOPILOT_VERSION" => {
                let caps = msg.get_u64("capabilities").unwrap_or(0);
                let mut state = self.write_state();
                if state.capabilities.is_none() {
                    tracing::info!(capabilities = caps, "Vehicle capabilities received");
                }
                state.capabilities = Some(caps);
            }
            "PARAM_VALUE" => {
                if let Some(p) = messages::read_param_value(&msg) {
                    self.params.begin(p.count);
                    self.params.record(p.index, &p.name, p.value);
                }
            }
            "STATUSTEXT" => {
                if let Some((severity, text)) = messages::read_statustext(&msg) {
                    tracing::info!(target: "vehicle", severity, ">>> {}", text);
                    let mut log = self.syslog.lock().unwrap_or_else(PoisonError::into_inner);
                    if log.len() == SYSLOG_CAPACITY {
                        log.pop_front();
                    }
                    log.push_back(StatusEntry {
                        time: chrono::Utc::now(),
                        severity,
                        text,
                    });
                }
            }
            _ => {}
        }

        self.write_state().messages.insert(msg.name.clone(), msg);
    }

    fn learn_sender(&self, packet: &Packet) {
        if self.read_state().system_id.is_some() {
            return;
        }
        let mut state = self.write_state();
        if state.system_id.is_none() {
            tracing::info!(
                system_id = packet.header.system_id,
                component_id = packet.header.component_id,
                "Vehicle identified"
            );
            state.system_id = Some(packet.header.system_id);
            state.component_id = Some(packet.header.component_id);
        }
    }

    fn apply_health(&self, event: HealthEvent) {
        if Some(event.kind) == self.heartbeat_kind {
            match event.health {
                Health::Up => {
                    self.write_state().link = Health::Up;
                    tracing::info!("Vehicle online");
                }
                Health::Down => {
                    let was_up = {
                        let mut state = self.write_state();
                        let was_up = state.link == Health::Up;
                        state.scrub();
                        was_up
                    };
                    self.params.reset();
                    if was_up {
                        tracing::warn!("Vehicle heartbeat lost, going offline");
                    }
                }
                Health::Unknown => {}
            }
            return;
        }

        if let Some(&subsystem) = self.subsystem_kinds.get(&event.kind) {
            let registry = self.codec.registry();
            let health = aggregate_health(
                subsystem
                    .messages()
                    .iter()
                    .filter_map(|name| registry.by_name(name))
                    .filter_map(|schema| self.monitor.health(schema.id)),
            );
            let mut state = self.write_state();
            if state.subsystems.insert(subsystem, health) != Some(health) {
                tracing::debug!(?subsystem, ?health, "Subsystem health changed");
            }
        }
    }

    /// Apply every phase transition whose condition holds
    fn advance(&self) -> Phase {
        let mut state = self.write_state();
        loop {
            let next = match state.phase {
                Phase::Offline if state.link == Health::Up => Phase::AwaitingCapabilities,
                Phase::AwaitingCapabilities if state.capabilities.is_some() => {
                    Phase::SyncingParameters
                }
                Phase::SyncingParameters if self.params.is_complete() => Phase::Ready,
                _ => break,
            };
            tracing::info!(from = ?state.phase, to = ?next, "Vehicle phase changed");
            state.phase = next;
        }
        state.phase
    }

    async fn state_tick(&self) {
        match self.advance() {
            Phase::Offline => {}
            Phase::AwaitingCapabilities => {
                tracing::info!("Loading vehicle info...");
                let fields = messages::command_long(
                    self.target(),
                    CMD_REQUEST_AUTOPILOT_CAPABILITIES,
                    [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                    0,
                );
                if let Err(e) = self.send("COMMAND_LONG", &fields) {
                    tracing::warn!("Failed to request capabilities: {}", e);
                }
            }
            Phase::SyncingParameters => self.sync_params().await,
            Phase::Ready => {
                let target = self.target();
                let outcome = self.queue.tick(|cmd| {
                    let confirmation = u8::try_from(cmd.attempts).unwrap_or(u8::MAX);
                    self.send(
                        "COMMAND_LONG",
                        &messages::command_long(target, cmd.opcode, cmd.params, confirmation),
                    )
                });
                if let TickOutcome::Sent { opcode, attempt } = outcome {
                    tracing::debug!(opcode, attempt, "Command sent");
                }
            }
        }
    }

    async fn sync_params(&self) {
        let now = Instant::now();
        if !self.params.is_started() {
            tracing::info!("Loading params...");
            self.params.mark_started(now);
            self.request_param_list();
            return;
        }

        if let Some(missing) = self.params.expire(now, self.config.param_timeout()) {
            tracing::warn!(
                total = ?self.params.total(),
                missing = ?missing,
                "Failed to fetch parameters, continuing without them"
            );
            return;
        }

        let Some(total) = self.params.total() else {
            // Nothing heard yet
            self.request_param_list();
            return;
        };

        let target = self.target();
        for index in self.params.missing() {
            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.send(
                "PARAM_REQUEST_READ",
                &messages::param_request_read(target, index),
            ) {
                tracing::warn!(index, "Failed to request parameter: {}", e);
            }
            tokio::time::sleep(self.config.param_request_spacing()).await;
        }
        tracing::info!(total, percent = self.params.progress(), "Params loaded");
    }

    fn rc_tick(&self) {
        let channels = {
            let mut rc = self.rc.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(active) = *rc else {
                return;
            };
            if !active.timeout.is_zero() && active.since.elapsed() > active.timeout {
                *rc = None;
                tracing::info!("RC override timed out");
                return;
            }
            active.channels
        };
        let fields = messages::rc_channels_override(self.target(), &channels);
        if let Err(e) = self.send("RC_CHANNELS_OVERRIDE", &fields) {
            tracing::warn!("Failed to resend RC override: {}", e);
        }
    }

    fn request_param_list(&self) {
        let fields = messages::param_request_list(self.target());
        if let Err(e) = self.send("PARAM_REQUEST_LIST", &fields) {
            tracing::warn!("Failed to request parameter list: {}", e);
        }
    }
}

async fn health_task(inner: Arc<EngineInner>, mut events: mpsc::UnboundedReceiver<HealthEvent>) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => inner.apply_health(event),
                None => break,
            },
        }
    }
    tracing::trace!("Health task stopped");
}

async fn state_task(inner: Arc<EngineInner>) {
    let mut ticker = tokio::time::interval(inner.config.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = ticker.tick() => inner.state_tick().await,
        }
    }
    tracing::trace!("State task stopped");
}

async fn rc_task(inner: Arc<EngineInner>) {
    let mut ticker = tokio::time::interval(inner.config.rc_resend());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = ticker.tick() => inner.rc_tick(),
        }
    }
    tracing::trace!("RC task stopped");
}
