//! Session controller
//!
//! Owns every component and threads them together explicitly: no globals, no
//! ambient registries. Inbound server messages are dispatched here; the
//! session only becomes ready once the first clock sample lands, and a
//! command arriving before that waits in `queued_command`.

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ServerApi;
use crate::drift::{DriftCorrector, SyncStats};
use crate::messages::{GroupInfo, GroupUpdate, PlaybackCommand, ServerMessage};
use crate::now_local_ms;
use crate::peer::{MeshEvent, PeerMesh, PeerPinger};
use crate::player::{PlayerAdapter, PlayerEvent};
use crate::queue::{ItemLookup, LocalQueue, QueueController, QueueError};
use crate::scheduler::CommandScheduler;
use crate::settings::SharedSettings;
use crate::timesync::{DeviceEntry, TimeSyncRegistry};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disabled,
    Enabling,
    EnabledNotReady,
    EnabledReady,
}

/// Group-scoped session bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct GroupSessionState {
    /// Server instant the session was enabled; commands emitted earlier are
    /// stale.
    pub enabled_at_server: Option<i64>,
    /// Flips true exactly once per enable, after the first clock sample.
    pub ready: bool,
    pub queued_command: Option<PlaybackCommand>,
    pub group_info: Option<GroupInfo>,
}

/// User-facing session events, for toasts and menus.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    GroupJoined { group_name: Option<String> },
    GroupLeft,
    UserJoined,
    UserLeft,
    StateChanged { state: String, reason: Option<String> },
    Denied { reason: String },
}

#[derive(Default)]
struct SessionTasks {
    ready_watch: Option<JoinHandle<()>>,
    update_forwarder: Option<JoinHandle<()>>,
}

impl SessionTasks {
    fn abort_all(&mut self) {
        if let Some(handle) = self.ready_watch.take() {
            handle.abort();
        }
        if let Some(handle) = self.update_forwarder.take() {
            handle.abort();
        }
    }
}

/// The coordinator's top level. Construct one per application, inside the
/// runtime, and feed it every inbound server message.
pub struct SessionController {
    api: Arc<dyn ServerApi>,
    settings: SharedSettings,
    player: Arc<PlayerAdapter>,
    registry: Arc<TimeSyncRegistry>,
    mesh: Arc<PeerMesh>,
    scheduler: Arc<CommandScheduler>,
    drift: Arc<DriftCorrector>,
    queue: Arc<QueueController>,
    state: RwLock<SessionState>,
    group: RwLock<GroupSessionState>,
    notices: broadcast::Sender<SessionNotice>,
    tasks: Mutex<SessionTasks>,
}

impl SessionController {
    /// Wire up all components. Spawns the long-lived event loops, so this
    /// must run inside the tokio runtime.
    pub fn new(
        api: Arc<dyn ServerApi>,
        settings: SharedSettings,
        local_queue: Arc<dyn LocalQueue>,
        item_lookup: Arc<dyn ItemLookup>,
    ) -> Arc<Self> {
        let player = Arc::new(PlayerAdapter::new());
        let registry = Arc::new(TimeSyncRegistry::new(
            Arc::clone(&api),
            Arc::clone(&settings),
        ));
        let (mesh, mesh_events) = PeerMesh::new(Arc::clone(&api), Arc::clone(&settings));
        let queue = Arc::new(QueueController::new(
            local_queue,
            item_lookup,
            Arc::clone(&api),
            Arc::clone(&player),
            Arc::clone(&registry),
        ));
        let scheduler = CommandScheduler::new(
            Arc::clone(&player),
            Arc::clone(&registry),
            Arc::clone(&api),
            Arc::clone(&settings),
            Arc::clone(&queue),
        );
        let drift = DriftCorrector::new(
            Arc::clone(&player),
            Arc::clone(&registry),
            Arc::clone(&settings),
            Arc::clone(scheduler.control()),
            scheduler.shared_last_command(),
        );

        let (notices, _) = broadcast::channel(16);

        let controller = Arc::new(Self {
            api,
            settings,
            player,
            registry,
            mesh,
            scheduler,
            drift,
            queue,
            state: RwLock::new(SessionState::Disabled),
            group: RwLock::new(GroupSessionState::default()),
            notices,
            tasks: Mutex::new(SessionTasks::default()),
        });

        controller.drift.spawn();
        controller.spawn_mesh_event_loop(mesh_events);
        controller.spawn_player_event_loop();
        controller
    }

    // --- accessors for the embedding application ---

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.state(), SessionState::Disabled)
    }

    pub fn queue(&self) -> &Arc<QueueController> {
        &self.queue
    }

    pub fn player(&self) -> &Arc<PlayerAdapter> {
        &self.player
    }

    pub fn registry(&self) -> &Arc<TimeSyncRegistry> {
        &self.registry
    }

    /// Selectable clock sources, for the settings UI.
    pub fn devices(&self) -> Vec<DeviceEntry> {
        self.registry.devices()
    }

    /// Live drift figures, for the sync indicator.
    pub fn sync_stats(&self) -> watch::Receiver<SyncStats> {
        self.drift.subscribe_stats()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    // --- user transport controls ---
    //
    // While grouped these become requests; the local player only moves when
    // the scheduled command comes back from the server.

    pub async fn request_unpause(&self) {
        if self.is_enabled() {
            if let Err(e) = self.api.request_unpause().await {
                warn!("unpause request failed: {}", e);
            }
        } else {
            self.player.local_unpause();
        }
    }

    pub async fn request_pause(&self) {
        if self.is_enabled() {
            if let Err(e) = self.api.request_pause().await {
                warn!("pause request failed: {}", e);
            }
        } else {
            self.player.local_pause();
        }
    }

    pub async fn request_seek(&self, position_ticks: i64) {
        if self.is_enabled() {
            if let Err(e) = self.api.request_seek(position_ticks).await {
                warn!("seek request failed: {}", e);
            }
        } else {
            self.player.local_seek(position_ticks);
        }
    }

    // --- inbound dispatch ---

    /// Feed one message from the server event stream.
    pub async fn handle_message(self: &Arc<Self>, message: ServerMessage) {
        match message {
            ServerMessage::GroupUpdate(update) => self.handle_group_update(update).await,
            ServerMessage::PlaybackCommand(command) => self.handle_command(command),
        }
    }

    async fn handle_group_update(self: &Arc<Self>, update: GroupUpdate) {
        match update {
            GroupUpdate::GroupJoined(info) => self.enable(info).await,
            GroupUpdate::NotInGroup => self.disable(false).await,
            GroupUpdate::GroupLeft => self.disable(true).await,
            GroupUpdate::GroupInfoChanged(info) => {
                self.group.write().unwrap().group_info = Some(info);
            }
            GroupUpdate::PlayQueue(queue_update) => {
                if !self.is_enabled() {
                    debug!("queue update while disabled, dropped");
                    return;
                }
                match self.queue.apply_update(queue_update).await {
                    Ok(()) => {}
                    Err(QueueError::StaleUpdate { .. }) => {}
                    Err(e) => warn!("queue update failed: {}", e),
                }
            }
            GroupUpdate::StateUpdate(state_update) => {
                debug!(
                    "group state {} ({})",
                    state_update.state,
                    state_update.reason.as_deref().unwrap_or("no reason")
                );
                let _ = self.notices.send(SessionNotice::StateChanged {
                    state: state_update.state,
                    reason: state_update.reason,
                });
            }
            GroupUpdate::UserJoined(_) => {
                let _ = self.notices.send(SessionNotice::UserJoined);
            }
            GroupUpdate::UserLeft(_) => {
                let _ = self.notices.send(SessionNotice::UserLeft);
            }
            GroupUpdate::GroupDoesNotExist => self.deny("group does not exist"),
            GroupUpdate::CreateGroupDenied => self.deny("not allowed to create a group"),
            GroupUpdate::JoinGroupDenied => self.deny("not allowed to join the group"),
            GroupUpdate::LibraryAccessDenied => self.deny("no access to the group's library"),
            GroupUpdate::SyncPlayIsDisabled => {
                warn!("synchronized playback is disabled on the server");
                self.deny("synchronized playback is disabled");
                self.disable(false).await;
            }
            GroupUpdate::WebRtc(envelope) => {
                // A leaving peer also stops being a clock source, even if its
                // channel lingers for a moment.
                if envelope.session_leaving {
                    self.registry.remove_peer(&envelope.from);
                }
                self.mesh.handle_signaling(envelope).await;
            }
        }
    }

    fn handle_command(self: &Arc<Self>, command: PlaybackCommand) {
        let enabled_at = self.group.read().unwrap().enabled_at_server;
        match self.state() {
            SessionState::Disabled => {
                debug!("playback command while disabled, dropped");
            }
            SessionState::Enabling | SessionState::EnabledNotReady => {
                info!("clock not ready, queuing {:?}", command.command);
                self.group.write().unwrap().queued_command = Some(command);
            }
            SessionState::EnabledReady => {
                self.scheduler.apply(command, enabled_at);
            }
        }
    }

    // --- lifecycle ---

    async fn enable(self: &Arc<Self>, info: GroupInfo) {
        if self.is_enabled() {
            // Joined a different group without leaving first.
            self.disable(false).await;
        }
        *self.state.write().unwrap() = SessionState::Enabling;

        let group_name = info.group_name.clone();
        {
            let mut group = self.group.write().unwrap();
            group.enabled_at_server = Some(
                info.last_updated_at
                    .unwrap_or_else(|| self.registry.local_to_remote(now_local_ms())),
            );
            group.ready = false;
            group.queued_command = None;
            group.group_info = Some(info);
        }

        self.queue.enable();
        self.registry.start();

        let use_webrtc = self.settings.read().unwrap().enable_webrtc;
        if use_webrtc {
            if let Err(e) = self.mesh.enable().await {
                warn!("peer mesh unavailable: {}", e);
            }
        }

        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.abort_all();
            tasks.update_forwarder =
                Some(self.registry.spawn_update_forwarder(Arc::clone(&self.mesh)));
            tasks.ready_watch = Some(self.spawn_ready_watch());
        }

        *self.state.write().unwrap() = SessionState::EnabledNotReady;
        info!("session enabled, waiting for first clock sample");
        let _ = self.notices.send(SessionNotice::GroupJoined { group_name });
    }

    async fn disable(self: &Arc<Self>, notify_server: bool) {
        if !self.is_enabled() {
            debug!("disable while already disabled");
            return;
        }
        *self.state.write().unwrap() = SessionState::Disabled;

        self.tasks.lock().unwrap().abort_all();
        self.scheduler.reset();
        self.queue.disable();
        self.mesh.disable(notify_server).await;
        self.registry.shutdown();
        *self.group.write().unwrap() = GroupSessionState::default();

        info!("session disabled");
        let _ = self.notices.send(SessionNotice::GroupLeft);
    }

    /// First successful clock sample: the session becomes ready and the
    /// command that was waiting for it is applied.
    fn mark_ready(self: &Arc<Self>) {
        let queued = {
            let mut group = self.group.write().unwrap();
            if group.ready {
                return;
            }
            group.ready = true;
            group.queued_command.take()
        };
        *self.state.write().unwrap() = SessionState::EnabledReady;
        info!("first clock sample received, session ready");

        if let Some(command) = queued {
            let enabled_at = self.group.read().unwrap().enabled_at_server;
            self.scheduler.apply(command, enabled_at);
        }
    }

    fn deny(&self, reason: &str) {
        warn!("server refused: {}", reason);
        let _ = self.notices.send(SessionNotice::Denied {
            reason: reason.to_string(),
        });
    }

    // --- background loops ---

    fn spawn_ready_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut updates = self.registry.server_source().subscribe();
        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                if update.offset_ms.is_some() {
                    this.mark_ready();
                    break;
                }
            }
        })
    }

    fn spawn_mesh_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<MeshEvent>,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    MeshEvent::PeerConnected { peer_id } => {
                        let pinger =
                            PeerPinger::new(Arc::clone(&this.mesh), peer_id.clone());
                        this.registry.add_peer(&peer_id, Arc::new(pinger));
                    }
                    MeshEvent::PeerDisconnected { peer_id } => {
                        this.registry.remove_peer(&peer_id);
                    }
                    MeshEvent::PeerServerState {
                        peer_id,
                        offset_ms,
                        ping_ms,
                    } => {
                        this.registry
                            .note_peer_server_state(&peer_id, offset_ms, ping_ms);
                    }
                }
            }
        });
    }

    fn spawn_player_event_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut events = self.player.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(PlayerEvent::PlaybackStop) => {
                        // A stopped player has nothing to execute against.
                        debug!("playback stopped, cancelling pending command");
                        this.scheduler.cancel_pending();
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
