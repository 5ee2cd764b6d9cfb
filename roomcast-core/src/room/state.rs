use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::models::{
    ClientId, Grants, PlayerStatus, Role, RoomUser, User, UserId, UserSummary, Video, VideoRef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    #[default]
    Manual,
    /// Queue is kept sorted by descending vote count on every tick
    Vote,
    /// The finished video is re-appended to the back of the queue
    Loop,
    Dj,
}

/// Syncable state fields, tracked in the dirty set. The serialized name is
/// the snapshot key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Name,
    Title,
    Description,
    IsTemporary,
    Visibility,
    QueueMode,
    CurrentSource,
    Queue,
    IsPlaying,
    PlaybackPosition,
    Users,
    VoteCounts,
    Grants,
}

impl StateField {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Title => "title",
            Self::Description => "description",
            Self::IsTemporary => "isTemporary",
            Self::Visibility => "visibility",
            Self::QueueMode => "queueMode",
            Self::CurrentSource => "currentSource",
            Self::Queue => "queue",
            Self::IsPlaying => "isPlaying",
            Self::PlaybackPosition => "playbackPosition",
            Self::Users => "users",
            Self::VoteCounts => "voteCounts",
            Self::Grants => "grants",
        }
    }
}

/// Authoritative in-memory state of one room. All mutation is serialized
/// by the owning `Room`'s lock; setters record the touched field in the
/// dirty set so the next sync publishes exactly what changed.
#[derive(Debug)]
pub struct RoomState {
    pub(crate) name: String,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) visibility: Visibility,
    pub(crate) is_temporary: bool,
    pub(crate) queue_mode: QueueMode,

    pub(crate) current_source: Option<Video>,
    pub(crate) queue: Vec<Video>,
    pub(crate) is_playing: bool,
    pub(crate) playback_position: f64,
    /// Set iff `is_playing`
    pub(crate) playback_start: Option<Instant>,

    pub(crate) real_users: Vec<RoomUser>,
    pub(crate) owner: Option<User>,
    /// Disjoint explicit role sets; only TrustedUser, Moderator and
    /// Administrator ever appear as keys.
    pub(crate) user_roles: BTreeMap<Role, HashSet<UserId>>,
    pub(crate) grants: Grants,

    pub(crate) votes: HashMap<String, HashSet<ClientId>>,
    pub(crate) dirty: HashSet<StateField>,
    pub(crate) keep_alive_ping: Instant,
}

impl RoomState {
    #[must_use]
    pub fn new(name: String) -> Self {
        let mut user_roles = BTreeMap::new();
        for role in [Role::TrustedUser, Role::Moderator, Role::Administrator] {
            user_roles.insert(role, HashSet::new());
        }
        Self {
            name,
            title: String::new(),
            description: String::new(),
            visibility: Visibility::Public,
            is_temporary: false,
            queue_mode: QueueMode::Manual,
            current_source: None,
            queue: Vec::new(),
            is_playing: false,
            playback_position: 0.0,
            playback_start: None,
            real_users: Vec::new(),
            owner: None,
            user_roles,
            grants: Grants::default(),
            votes: HashMap::new(),
            dirty: HashSet::new(),
            keep_alive_ping: Instant::now(),
        }
    }

    pub(crate) fn mark_dirty(&mut self, field: StateField) {
        self.dirty.insert(field);
    }

    // ---- setters (field write + dirty mark) ----

    pub(crate) fn set_title(&mut self, title: String) {
        self.title = title;
        self.mark_dirty(StateField::Title);
    }

    pub(crate) fn set_description(&mut self, description: String) {
        self.description = description;
        self.mark_dirty(StateField::Description);
    }

    pub(crate) fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
        self.mark_dirty(StateField::Visibility);
    }

    pub(crate) fn set_queue_mode(&mut self, mode: QueueMode) {
        self.queue_mode = mode;
        self.mark_dirty(StateField::QueueMode);
    }

    pub(crate) fn set_is_playing(&mut self, playing: bool) {
        self.is_playing = playing;
        self.mark_dirty(StateField::IsPlaying);
    }

    pub(crate) fn set_playback_position(&mut self, position: f64) {
        self.playback_position = position;
        self.mark_dirty(StateField::PlaybackPosition);
    }

    /// Switching sources restarts the playback clock if the room is
    /// playing, so the new video begins at its own zero.
    pub(crate) fn set_current_source(&mut self, source: Option<Video>) {
        self.current_source = source;
        if self.is_playing {
            self.playback_start = Some(Instant::now());
        }
        self.mark_dirty(StateField::CurrentSource);
    }

    // ---- derived views ----

    /// Position within the current video, accounting for the running clock
    #[must_use]
    pub fn effective_position(&self) -> f64 {
        self.playback_position
            + self
                .playback_start
                .map_or(0.0, |start| start.elapsed().as_secs_f64())
    }

    pub(crate) fn find_user(&self, client: &ClientId) -> Option<&RoomUser> {
        self.real_users.iter().find(|u| &u.id == client)
    }

    pub(crate) fn find_user_mut(&mut self, client: &ClientId) -> Option<&mut RoomUser> {
        self.real_users.iter_mut().find(|u| &u.id == client)
    }

    /// Effective role: owner if they own the room, else the explicit role
    /// set they belong to, else registered/unregistered by login state.
    #[must_use]
    pub fn role_of(&self, user: &RoomUser) -> Role {
        if let Some(user_id) = &user.user_id {
            if self.owner.as_ref().is_some_and(|o| &o.id == user_id) {
                return Role::Owner;
            }
            for role in [Role::Administrator, Role::Moderator, Role::TrustedUser] {
                if self
                    .user_roles
                    .get(&role)
                    .is_some_and(|set| set.contains(user_id))
                {
                    return role;
                }
            }
            Role::RegisteredUser
        } else {
            Role::UnregisteredUser
        }
    }

    pub(crate) fn user_summary(&self, user: &RoomUser) -> UserSummary {
        UserSummary {
            id: user.id.clone(),
            name: user.username().to_string(),
            is_logged_in: user.is_logged_in(),
            status: user.player_status,
            role: self.role_of(user),
        }
    }

    /// Summary of the acting client; requests from clients not (or no
    /// longer) in the room get an anonymous placeholder.
    pub(crate) fn summary_for(&self, client: &ClientId) -> UserSummary {
        self.find_user(client).map_or_else(
            || UserSummary {
                id: client.clone(),
                name: String::new(),
                is_logged_in: false,
                status: PlayerStatus::None,
                role: Role::UnregisteredUser,
            },
            |u| self.user_summary(u),
        )
    }

    pub(crate) fn role_for(&self, client: &ClientId) -> Role {
        self.find_user(client)
            .map_or(Role::UnregisteredUser, |u| self.role_of(u))
    }

    /// Duplicate check across `queue ∪ {current_source}` by (service, id)
    #[must_use]
    pub fn contains_video(&self, r: &VideoRef) -> bool {
        self.current_source
            .as_ref()
            .is_some_and(|v| v.matches(r))
            || self.queue.iter().any(|v| v.matches(r))
    }

    // ---- queue advancement ----

    pub(crate) fn dequeue_next(&mut self) {
        if self.queue_mode == QueueMode::Loop {
            if let Some(finished) = self.current_source.take() {
                self.queue.push(finished);
                self.mark_dirty(StateField::Queue);
            }
        }

        if self.queue.is_empty() {
            if self.current_source.is_some() {
                if self.is_playing {
                    self.set_is_playing(false);
                    self.playback_start = None;
                }
                self.set_playback_position(0.0);
                self.set_current_source(None);
            }
        } else {
            let next = self.queue.remove(0);
            self.set_current_source(Some(next));
            self.set_playback_position(0.0);
            self.mark_dirty(StateField::Queue);
        }
    }

    /// Stable sort by descending vote count; marks the queue dirty only if
    /// the order actually changed.
    pub(crate) fn apply_vote_order(&mut self) {
        let before: Vec<String> = self.queue.iter().map(Video::key).collect();
        let votes = &self.votes;
        self.queue.sort_by(|a, b| {
            let va = votes.get(&a.key()).map_or(0, HashSet::len);
            let vb = votes.get(&b.key()).map_or(0, HashSet::len);
            vb.cmp(&va)
        });
        let after: Vec<String> = self.queue.iter().map(Video::key).collect();
        if before != after {
            self.mark_dirty(StateField::Queue);
        }
    }

    #[must_use]
    pub fn is_stale(&self, unload_after: Duration) -> bool {
        self.keep_alive_ping.elapsed() > unload_after
    }

    // ---- snapshot building ----

    fn vote_counts(&self) -> HashMap<String, usize> {
        self.votes
            .iter()
            .map(|(k, set)| (k.clone(), set.len()))
            .collect()
    }

    fn users_payload(&self) -> Vec<UserSummary> {
        self.real_users
            .iter()
            .map(|u| self.user_summary(u))
            .collect()
    }

    /// Full snapshot of every syncable field plus computed `users` and
    /// `voteCounts`. `grants` is rendered as the owner mask.
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut snap = Map::new();
        snap.insert("name".to_string(), Value::String(self.name.clone()));
        snap.insert("title".to_string(), Value::String(self.title.clone()));
        snap.insert(
            "description".to_string(),
            Value::String(self.description.clone()),
        );
        snap.insert("isTemporary".to_string(), Value::Bool(self.is_temporary));
        snap.insert(
            "visibility".to_string(),
            serde_json::to_value(self.visibility).unwrap_or(Value::Null),
        );
        snap.insert(
            "queueMode".to_string(),
            serde_json::to_value(self.queue_mode).unwrap_or(Value::Null),
        );
        snap.insert(
            "currentSource".to_string(),
            serde_json::to_value(&self.current_source).unwrap_or(Value::Null),
        );
        snap.insert(
            "queue".to_string(),
            serde_json::to_value(&self.queue).unwrap_or(Value::Null),
        );
        snap.insert("isPlaying".to_string(), Value::Bool(self.is_playing));
        snap.insert(
            "playbackPosition".to_string(),
            serde_json::to_value(self.playback_position).unwrap_or(Value::Null),
        );
        snap.insert(
            "users".to_string(),
            serde_json::to_value(self.users_payload()).unwrap_or(Value::Null),
        );
        snap.insert(
            "voteCounts".to_string(),
            serde_json::to_value(self.vote_counts()).unwrap_or(Value::Null),
        );
        snap.insert(
            "grants".to_string(),
            Value::from(self.grants.get_mask(Role::Owner)),
        );
        snap
    }

    /// Best-effort restore from a stored snapshot. Participants, votes and
    /// grants are not restorable, and playback resumes paused: the clock
    /// cannot be trusted across a reload.
    pub(crate) fn hydrate(&mut self, snap: &Map<String, Value>) {
        if let Some(v) = snap.get("title").and_then(Value::as_str) {
            self.title = v.to_string();
        }
        if let Some(v) = snap.get("description").and_then(Value::as_str) {
            self.description = v.to_string();
        }
        if let Some(v) = snap.get("isTemporary").and_then(Value::as_bool) {
            self.is_temporary = v;
        }
        if let Some(v) = snap
            .get("visibility")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
        {
            self.visibility = v;
        }
        if let Some(v) = snap
            .get("queueMode")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
        {
            self.queue_mode = v;
        }
        if let Some(v) = snap.get("currentSource") {
            if let Ok(source) = serde_json::from_value::<Option<Video>>(v.clone()) {
                self.current_source = source;
            }
        }
        if let Some(v) = snap.get("queue") {
            if let Ok(queue) = serde_json::from_value::<Vec<Video>>(v.clone()) {
                self.queue = queue;
            }
        }
        if let Some(v) = snap.get("playbackPosition").and_then(Value::as_f64) {
            self.playback_position = v;
        }
        self.is_playing = false;
        self.playback_start = None;
    }
}
