pub mod manager;
pub mod state;

pub use manager::{CreateRoomOptions, RoomManager};
pub use state::{QueueMode, RoomState, StateField, Visibility};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{room_channel, room_sync_key, MessageBus};
use crate::config::RoomConfig;
use crate::extractor::InfoExtractor;
use crate::models::{
    ClientId, ClientInfo, EventContext, Permission, Role, RoomEvent, RoomMessage, RoomRequest,
    RoomUser, UserSummary, Video, VideoRef,
};
use crate::users::UserStore;
use crate::{Error, Result};

/// Who a request is acting as. Requests reference clients by ID only; the
/// room never owns client connections.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client: ClientId,
}

impl RequestContext {
    #[must_use]
    pub const fn new(client: ClientId) -> Self {
        Self { client }
    }
}

/// Room lookup capability handed to the client gateway. Implemented by
/// `RoomManager`; injecting the trait instead of the manager breaks the
/// gateway↔manager module cycle.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Resolve a room hosted on this node. Fails with `RoomNotFound` for
    /// rooms that do not exist here (including rooms owned by peers this
    /// node refuses to load).
    async fn room(&self, name: &str) -> Result<Arc<Room>>;
}

/// Engine timing knobs, derived from `RoomConfig`
#[derive(Debug, Clone)]
pub struct RoomTuning {
    pub sync_debounce: Duration,
    pub unload_after: Duration,
}

impl Default for RoomTuning {
    fn default() -> Self {
        Self::from(&RoomConfig::default())
    }
}

impl From<&RoomConfig> for RoomTuning {
    fn from(config: &RoomConfig) -> Self {
        Self {
            sync_debounce: Duration::from_millis(config.sync_debounce_ms),
            unload_after: Duration::from_secs(config.unload_after_seconds),
        }
    }
}

/// The authoritative state machine for one room. All request handling is
/// serialized by the state lock, held for the full duration of a handler
/// (metadata fetches and bus writes included).
pub struct Room {
    name: String,
    state: Mutex<RoomState>,
    bus: Arc<dyn MessageBus>,
    extractor: Arc<dyn InfoExtractor>,
    users: Arc<dyn UserStore>,
    sync_armed: AtomicBool,
    tuning: RoomTuning,
    /// Self-handle for the debounced sync task
    weak: Weak<Self>,
}

impl Room {
    #[must_use]
    pub fn new(
        options: CreateRoomOptions,
        bus: Arc<dyn MessageBus>,
        extractor: Arc<dyn InfoExtractor>,
        users: Arc<dyn UserStore>,
        tuning: RoomTuning,
    ) -> Arc<Self> {
        let name = options.name.clone();
        let mut state = RoomState::new(options.name);
        state.title = options.title;
        state.description = options.description;
        state.visibility = options.visibility;
        state.is_temporary = options.is_temporary;
        state.queue_mode = options.queue_mode;
        state.owner = options.owner;
        if let Some(grants) = options.grants {
            state.grants.set_all_grants(&grants);
        }

        Arc::new_cyclic(|weak| Self {
            name,
            state: Mutex::new(state),
            bus,
            extractor,
            users,
            sync_armed: AtomicBool::new(false),
            tuning,
            weak: weak.clone(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply one request: resolve the acting participant, gate on the
    /// request type's permission, dispatch, then schedule a coalesced sync
    /// for whatever was dirtied.
    pub async fn process_request(&self, ctx: &RequestContext, req: RoomRequest) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(permission) = req.required_permission() {
            let role = state.role_for(&ctx.client);
            state.grants.check(role, permission)?;
        }
        let result = self.dispatch(&mut state, ctx, req).await;
        let has_dirty = !state.dirty.is_empty();
        drop(state);

        if has_dirty {
            self.schedule_sync();
        }
        result
    }

    async fn dispatch(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        req: RoomRequest,
    ) -> Result<()> {
        match req {
            RoomRequest::Playback { state: playing } => {
                self.handle_playback(state, ctx, playing).await
            }
            RoomRequest::Skip => self.handle_skip(state, ctx).await,
            RoomRequest::Seek { value } => self.handle_seek(state, ctx, value).await,
            RoomRequest::Add { url, video, videos } => {
                self.handle_add(state, ctx, url, video, videos).await
            }
            RoomRequest::Remove { video } => self.handle_remove(state, ctx, video).await,
            RoomRequest::Order { from_idx, to_idx } => {
                Self::handle_order(state, from_idx, to_idx)
            }
            RoomRequest::Vote { video, add } => Self::handle_vote(state, ctx, &video, add),
            RoomRequest::Join { info } => self.handle_join(state, ctx, info).await,
            RoomRequest::Leave => self.handle_leave(state, ctx).await,
            RoomRequest::UpdateUser { info } => self.handle_update_user(state, ctx, info).await,
            RoomRequest::Chat { text } => self.handle_chat(state, ctx, text).await,
            RoomRequest::Undo { event } => self.handle_undo(state, ctx, *event).await,
            RoomRequest::Promote {
                target_client_id,
                role,
            } => self.handle_promote(state, ctx, &target_client_id, role),
            RoomRequest::Settings {
                title,
                description,
                visibility,
                queue_mode,
            } => {
                self.handle_settings(state, ctx, title, description, visibility, queue_mode)
                    .await
            }
        }
    }

    // ---- handlers ----

    async fn handle_playback(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        playing: bool,
    ) -> Result<()> {
        if playing && !state.is_playing {
            state.set_is_playing(true);
            state.playback_start = Some(Instant::now());
        } else if !playing && state.is_playing {
            let position = state.effective_position();
            state.set_playback_position(position);
            state.playback_start = None;
            state.set_is_playing(false);
        }
        let user = state.summary_for(&ctx.client);
        self.publish_event(RoomRequest::Playback { state: playing }, user, None)
            .await;
        Ok(())
    }

    async fn handle_skip(&self, state: &mut RoomState, ctx: &RequestContext) -> Result<()> {
        let video = state.current_source.clone();
        let prev_position = state.effective_position();
        state.dequeue_next();
        let user = state.summary_for(&ctx.client);
        self.publish_event(
            RoomRequest::Skip,
            user,
            Some(EventContext {
                video,
                prev_position: Some(prev_position),
                ..EventContext::default()
            }),
        )
        .await;
        Ok(())
    }

    async fn handle_seek(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        value: Option<f64>,
    ) -> Result<()> {
        let value = value
            .ok_or_else(|| Error::InvalidRequest("seek requires a position".to_string()))?;
        let prev_position = state.playback_position;
        state.set_playback_position(value);
        let user = state.summary_for(&ctx.client);
        self.publish_event(
            RoomRequest::Seek { value: Some(value) },
            user,
            Some(EventContext {
                prev_position: Some(prev_position),
                ..EventContext::default()
            }),
        )
        .await;
        Ok(())
    }

    async fn handle_add(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        url: Option<String>,
        video: Option<VideoRef>,
        videos: Option<Vec<VideoRef>>,
    ) -> Result<()> {
        if let Some(url) = url {
            let r = self.extractor.resolve_url(&url).await?;
            return self.add_single(state, ctx, r).await;
        }
        if let Some(r) = video {
            return self.add_single(state, ctx, r).await;
        }
        if let Some(refs) = videos {
            return self.add_batch(state, ctx, refs).await;
        }
        Err(Error::InvalidRequest(
            "add requires a url, video, or videos".to_string(),
        ))
    }

    async fn add_single(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        r: VideoRef,
    ) -> Result<()> {
        if state.contains_video(&r) {
            return Err(Error::VideoAlreadyQueued);
        }
        let video = self.extractor.fetch_video(&r).await?;
        state.queue.push(video.clone());
        state.mark_dirty(StateField::Queue);
        let user = state.summary_for(&ctx.client);
        self.publish_event(
            RoomRequest::Add {
                url: None,
                video: Some(r),
                videos: None,
            },
            user,
            Some(EventContext {
                video: Some(video),
                ..EventContext::default()
            }),
        )
        .await;
        Ok(())
    }

    async fn add_batch(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        refs: Vec<VideoRef>,
    ) -> Result<()> {
        let fetched = self.extractor.fetch_videos(&refs).await?;
        let survivors: Vec<Video> = fetched
            .into_iter()
            .filter(|v| !state.contains_video(&VideoRef::from(v)))
            .collect();
        if survivors.is_empty() {
            return Err(Error::VideoAlreadyQueued);
        }
        state.queue.extend(survivors.iter().cloned());
        state.mark_dirty(StateField::Queue);
        let user = state.summary_for(&ctx.client);
        self.publish_event(
            RoomRequest::Add {
                url: None,
                video: None,
                videos: Some(refs),
            },
            user,
            Some(EventContext {
                videos: Some(survivors),
                ..EventContext::default()
            }),
        )
        .await;
        Ok(())
    }

    async fn handle_remove(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        r: VideoRef,
    ) -> Result<()> {
        let queue_idx = state
            .queue
            .iter()
            .position(|v| v.matches(&r))
            .ok_or(Error::VideoNotFound)?;
        let video = state.queue.remove(queue_idx);
        state.mark_dirty(StateField::Queue);
        let user = state.summary_for(&ctx.client);
        self.publish_event(
            RoomRequest::Remove { video: r },
            user,
            Some(EventContext {
                video: Some(video),
                queue_idx: Some(queue_idx),
                ..EventContext::default()
            }),
        )
        .await;
        Ok(())
    }

    fn handle_order(state: &mut RoomState, from_idx: usize, to_idx: usize) -> Result<()> {
        let len = state.queue.len();
        if from_idx >= len || to_idx >= len {
            return Err(Error::InvalidRequest(format!(
                "queue-move out of range: {from_idx} -> {to_idx} (queue length {len})"
            )));
        }
        let video = state.queue.remove(from_idx);
        state.queue.insert(to_idx, video);
        state.mark_dirty(StateField::Queue);
        Ok(())
    }

    fn handle_vote(
        state: &mut RoomState,
        ctx: &RequestContext,
        video: &VideoRef,
        add: bool,
    ) -> Result<()> {
        let key = video.key();
        let changed = if add {
            state
                .votes
                .entry(key)
                .or_default()
                .insert(ctx.client.clone())
        } else {
            // vote removal with no recorded votes is silently ignored
            let mut removed = false;
            let mut drop_entry = false;
            if let Some(set) = state.votes.get_mut(&key) {
                removed = set.remove(&ctx.client);
                drop_entry = set.is_empty();
            }
            if drop_entry {
                state.votes.remove(&key);
            }
            removed
        };
        if changed {
            state.mark_dirty(StateField::VoteCounts);
        }
        Ok(())
    }

    async fn handle_join(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        info: ClientInfo,
    ) -> Result<()> {
        let mut user = RoomUser::new(ctx.client.clone());
        user.update_info(&info, self.users.as_ref()).await;
        state.real_users.push(user);
        state.mark_dirty(StateField::Users);
        let summary = state.summary_for(&ctx.client);
        info!(room = %self.name, client = %ctx.client, name = %summary.name, "Client joined room");

        // Tell the joiner who it is; the gateway stamps isYou on delivery
        if let Ok(user) = serde_json::to_value(&summary) {
            self.publish(&RoomMessage::User { user }).await;
        }
        self.publish_event(RoomRequest::Join { info }, summary, None)
            .await;
        Ok(())
    }

    async fn handle_leave(&self, state: &mut RoomState, ctx: &RequestContext) -> Result<()> {
        let Some(idx) = state.real_users.iter().position(|u| u.id == ctx.client) else {
            debug!(room = %self.name, client = %ctx.client, "Leave for a client not in the room");
            return Ok(());
        };
        let summary = state.user_summary(&state.real_users[idx]);
        state.real_users.remove(idx);
        state.mark_dirty(StateField::Users);

        let mut votes_changed = false;
        state.votes.retain(|_, set| {
            votes_changed |= set.remove(&ctx.client);
            !set.is_empty()
        });
        if votes_changed {
            state.mark_dirty(StateField::VoteCounts);
        }

        info!(room = %self.name, client = %ctx.client, "Client left room");
        self.publish_event(RoomRequest::Leave, summary, None).await;
        Ok(())
    }

    async fn handle_update_user(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        info: ClientInfo,
    ) -> Result<()> {
        let Some(user) = state.find_user_mut(&ctx.client) else {
            debug!(room = %self.name, client = %ctx.client, "Update for a client not in the room");
            return Ok(());
        };
        user.update_info(&info, self.users.as_ref()).await;
        state.mark_dirty(StateField::Users);
        Ok(())
    }

    async fn handle_chat(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        text: String,
    ) -> Result<()> {
        let from = state.summary_for(&ctx.client);
        self.publish(&RoomMessage::Chat {
            from,
            text,
            timestamp: Utc::now(),
        })
        .await;
        Ok(())
    }

    async fn handle_undo(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        event: RoomEvent,
    ) -> Result<()> {
        let request = event.request.clone();
        match request {
            RoomRequest::Seek { .. } => {
                let prev = event
                    .additional
                    .as_ref()
                    .and_then(|a| a.prev_position)
                    .ok_or_else(|| {
                        Error::InvalidRequest("undo seek requires prevPosition".to_string())
                    })?;
                self.handle_seek(state, ctx, Some(prev)).await
            }
            RoomRequest::Skip => {
                let additional = event.additional.clone().unwrap_or_default();
                if let Some(current) = state.current_source.take() {
                    state.queue.insert(0, current);
                    state.mark_dirty(StateField::Queue);
                }
                state.set_current_source(additional.video);
                state.set_playback_position(additional.prev_position.unwrap_or(0.0));
                let user = state.summary_for(&ctx.client);
                self.publish_event(
                    RoomRequest::Undo {
                        event: Box::new(event),
                    },
                    user,
                    None,
                )
                .await;
                Ok(())
            }
            RoomRequest::Add { .. } => {
                let additional = event.additional.clone().unwrap_or_default();
                if let Some(video) = additional.video {
                    if state.queue.is_empty() {
                        state.set_current_source(None);
                        let user = state.summary_for(&ctx.client);
                        self.publish_event(
                            RoomRequest::Undo {
                                event: Box::new(event),
                            },
                            user,
                            None,
                        )
                        .await;
                        Ok(())
                    } else {
                        self.handle_remove(state, ctx, VideoRef::from(&video)).await
                    }
                } else if let Some(videos) = additional.videos {
                    // Batch add: drop every survivor the add appended
                    let keys: HashSet<String> = videos.iter().map(Video::key).collect();
                    let before = state.queue.len();
                    state.queue.retain(|v| !keys.contains(&v.key()));
                    if state.queue.len() != before {
                        state.mark_dirty(StateField::Queue);
                    }
                    let user = state.summary_for(&ctx.client);
                    self.publish_event(
                        RoomRequest::Undo {
                            event: Box::new(event),
                        },
                        user,
                        None,
                    )
                    .await;
                    Ok(())
                } else {
                    Err(Error::InvalidRequest(
                        "undo add requires the added video or videos".to_string(),
                    ))
                }
            }
            RoomRequest::Remove { .. } => {
                let additional = event.additional.clone().unwrap_or_default();
                let video = additional.video.ok_or_else(|| {
                    Error::InvalidRequest("undo remove requires the removed video".to_string())
                })?;
                let idx = additional.queue_idx.unwrap_or(0).min(state.queue.len());
                state.queue.insert(idx, video);
                state.mark_dirty(StateField::Queue);
                let user = state.summary_for(&ctx.client);
                self.publish_event(
                    RoomRequest::Undo {
                        event: Box::new(event),
                    },
                    user,
                    None,
                )
                .await;
                Ok(())
            }
            other => {
                warn!(room = %self.name, kind = other.kind(), "Ignoring undo for request type");
                Ok(())
            }
        }
    }

    /// Two checks, both required: the promoter must hold the
    /// promote-to-target-role permission, and for a demotion the requested
    /// role must hold the demote permission for the target's current role.
    fn handle_promote(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        target_client_id: &ClientId,
        role: Role,
    ) -> Result<()> {
        let promoter_role = state.role_for(&ctx.client);
        if let Some(promote_perm) = Permission::promote_to(role) {
            state.grants.check(promoter_role, promote_perm)?;
        } else if role != Role::RegisteredUser {
            // owner and unregistered are never promotion targets
            return Err(Error::ImpossiblePromotion);
        }

        let target = state
            .find_user(target_client_id)
            .ok_or_else(|| Error::ClientNotFoundInRoom(target_client_id.to_string()))?;
        let current = state.role_of(target);
        let Some(target_user_id) = target.user_id.clone() else {
            return Err(Error::ImpossiblePromotion);
        };

        if current > role {
            let demote_perm =
                Permission::demote_from(current).ok_or(Error::ImpossiblePromotion)?;
            if !state.grants.granted(role, demote_perm) {
                return Err(Error::ImpossiblePromotion);
            }
        }

        for set in state.user_roles.values_mut() {
            set.remove(&target_user_id);
        }
        if role >= Role::TrustedUser {
            state
                .user_roles
                .entry(role)
                .or_default()
                .insert(target_user_id);
        }
        state.mark_dirty(StateField::Users);
        info!(
            room = %self.name,
            target = %target_client_id,
            role = role.as_str(),
            "Participant role changed"
        );
        Ok(())
    }

    async fn handle_settings(
        &self,
        state: &mut RoomState,
        ctx: &RequestContext,
        title: Option<String>,
        description: Option<String>,
        visibility: Option<Visibility>,
        queue_mode: Option<QueueMode>,
    ) -> Result<()> {
        let role = state.role_for(&ctx.client);
        if title.is_some() {
            state.grants.check(role, Permission::SetTitle)?;
        }
        if description.is_some() {
            state.grants.check(role, Permission::SetDescription)?;
        }
        if visibility.is_some() {
            state.grants.check(role, Permission::SetVisibility)?;
        }
        if queue_mode.is_some() {
            state.grants.check(role, Permission::SetQueueMode)?;
        }

        if let Some(t) = title.clone() {
            state.set_title(t);
        }
        if let Some(d) = description.clone() {
            state.set_description(d);
        }
        if let Some(v) = visibility {
            state.set_visibility(v);
        }
        if let Some(m) = queue_mode {
            state.set_queue_mode(m);
        }

        let user = state.summary_for(&ctx.client);
        self.publish_event(
            RoomRequest::Settings {
                title,
                description,
                visibility,
                queue_mode,
            },
            user,
            None,
        )
        .await;
        Ok(())
    }

    // ---- publication ----

    async fn publish(&self, msg: &RoomMessage) {
        match serde_json::to_string(msg) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(&room_channel(&self.name), payload).await {
                    warn!(
                        room = %self.name,
                        action = msg.action(),
                        error = %e,
                        "Failed to publish room message"
                    );
                }
            }
            Err(e) => {
                warn!(room = %self.name, error = %e, "Failed to serialize room message");
            }
        }
    }

    async fn publish_event(
        &self,
        request: RoomRequest,
        user: UserSummary,
        additional: Option<EventContext>,
    ) {
        self.publish(&RoomMessage::Event {
            event: RoomEvent {
                request,
                user,
                additional,
                timestamp: Utc::now(),
            },
        })
        .await;
    }

    /// Arm a trailing-edge one-shot; mutations landing inside the window
    /// coalesce into a single sync.
    fn schedule_sync(&self) {
        if self.sync_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(room) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(room.tuning.sync_debounce).await;
            room.sync_armed.store(false, Ordering::SeqCst);
            room.sync().await;
        });
    }

    /// Publish the dirty subset of state as a delta and refresh the full
    /// snapshot key. On a bus failure the fields stay dirty and the next
    /// sync re-sends them.
    pub async fn sync(&self) {
        let (snapshot, dirty) = {
            let mut state = self.state.lock().await;
            if state.dirty.is_empty() {
                return;
            }
            let snapshot = state.snapshot();
            let dirty: HashSet<StateField> = state.dirty.drain().collect();
            (snapshot, dirty)
        };

        let mut delta = Map::new();
        delta.insert("action".to_string(), Value::String("sync".to_string()));
        for field in &dirty {
            if let Some(value) = snapshot.get(field.key()) {
                delta.insert(field.key().to_string(), value.clone());
            }
        }

        let snapshot_payload = Value::Object(snapshot).to_string();
        let delta_payload = Value::Object(delta).to_string();

        let result = async {
            self.bus
                .set_key(&room_sync_key(&self.name), snapshot_payload)
                .await?;
            self.bus
                .publish(&room_channel(&self.name), delta_payload)
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(room = %self.name, error = %e, "Sync publication failed");
            let mut state = self.state.lock().await;
            state.dirty.extend(dirty);
        }
    }

    /// Periodic update: advance past finished sources, refresh the
    /// keep-alive while participants are present, and keep the queue in
    /// vote order.
    pub async fn tick(&self) {
        let has_dirty = {
            let mut state = self.state.lock().await;
            let finished = match &state.current_source {
                None => true,
                Some(video) => state.effective_position() > video.length,
            };
            if finished {
                state.dequeue_next();
            }
            if !state.real_users.is_empty() {
                state.keep_alive_ping = Instant::now();
            }
            if state.queue_mode == QueueMode::Vote {
                state.apply_vote_order();
            }
            !state.dirty.is_empty()
        };
        if has_dirty {
            self.schedule_sync();
        }
    }

    pub async fn is_stale(&self) -> bool {
        self.state.lock().await.is_stale(self.tuning.unload_after)
    }

    /// Flush pending state and tell peers the room is going away so they
    /// can disconnect their clients.
    pub async fn on_before_unload(&self) {
        info!(room = %self.name, "Unloading room");
        self.sync().await;
        self.publish(&RoomMessage::Unload).await;
    }

    pub(crate) async fn hydrate(&self, snapshot: &Map<String, Value>) {
        self.state.lock().await.hydrate(snapshot);
    }

    // ---- read accessors ----

    pub async fn snapshot_json(&self) -> Map<String, Value> {
        self.state.lock().await.snapshot()
    }

    pub async fn current_source(&self) -> Option<Video> {
        self.state.lock().await.current_source.clone()
    }

    pub async fn queue(&self) -> Vec<Video> {
        self.state.lock().await.queue.clone()
    }

    /// (`is_playing`, raw `playback_position`)
    pub async fn playback(&self) -> (bool, f64) {
        let state = self.state.lock().await;
        (state.is_playing, state.playback_position)
    }

    pub async fn effective_position(&self) -> f64 {
        self.state.lock().await.effective_position()
    }

    pub async fn participants(&self) -> Vec<UserSummary> {
        let state = self.state.lock().await;
        state
            .real_users
            .iter()
            .map(|u| state.user_summary(u))
            .collect()
    }

    pub async fn vote_counts(&self) -> HashMap<String, usize> {
        let state = self.state.lock().await;
        state
            .votes
            .iter()
            .map(|(k, set)| (k.clone(), set.len()))
            .collect()
    }
}
