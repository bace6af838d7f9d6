//! Stream directory
//!
//! In-memory table of live broadcast sessions keyed by the owning connection id.
//! A connection owns at most one session; every mutation is scoped to the caller's
//! own entry, so a connection can never touch another connection's session.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::registry::ConnectionId;

/// Who may join a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    #[default]
    Public,
    /// Only members of the session's scope room may view
    RestrictedToRoom,
}

/// Metadata announced with `start-session`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionMetadata {
    pub title: String,
    pub broadcaster_name: String,
    /// Requested quality descriptor, e.g. "1080p"
    pub quality: String,
    pub fps: u32,
    pub visibility: Visibility,
    /// Room (guild) the session is scoped to
    pub scope: Option<String>,
    pub has_access_code: bool,
    pub access_code: Option<String>,
}

impl SessionMetadata {
    /// Presence flag follows the code value; an empty code or scope counts as none
    fn normalize(mut self) -> Self {
        if self.access_code.as_deref().is_some_and(str::is_empty) {
            self.access_code = None;
        }
        if self.scope.as_deref().is_some_and(str::is_empty) {
            self.scope = None;
        }
        self.has_access_code = self.access_code.is_some();
        self
    }
}

/// Partial metadata for `update-metadata`; absent fields are left untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub broadcaster_name: Option<String>,
    pub quality: Option<String>,
    pub fps: Option<u32>,
    pub visibility: Option<Visibility>,
    /// `Some("")` clears the scope
    pub scope: Option<String>,
    /// `Some("")` clears the access code
    pub access_code: Option<String>,
}

/// A broadcaster's advertised live session
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSession {
    /// Equal to the broadcaster's connection id
    pub id: ConnectionId,
    pub metadata: SessionMetadata,
    pub created_at: DateTime<Utc>,
}

impl StreamSession {
    fn apply(&mut self, patch: MetadataPatch) {
        let meta = &mut self.metadata;
        if let Some(title) = patch.title {
            meta.title = title;
        }
        if let Some(name) = patch.broadcaster_name {
            meta.broadcaster_name = name;
        }
        if let Some(quality) = patch.quality {
            meta.quality = quality;
        }
        if let Some(fps) = patch.fps {
            meta.fps = fps;
        }
        if let Some(visibility) = patch.visibility {
            meta.visibility = visibility;
        }
        if let Some(scope) = patch.scope {
            meta.scope = Some(scope);
        }
        if let Some(code) = patch.access_code {
            meta.access_code = Some(code);
        }
        *meta = std::mem::take(meta).normalize();
    }

    /// Wire view of the session, without the access code value
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.metadata.title.clone(),
            broadcaster_name: self.metadata.broadcaster_name.clone(),
            quality: self.metadata.quality.clone(),
            fps: self.metadata.fps,
            visibility: self.metadata.visibility,
            scope: self.metadata.scope.clone(),
            has_access_code: self.metadata.has_access_code,
            created_at: self.created_at,
        }
    }
}

/// Session entry as sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: ConnectionId,
    pub title: String,
    pub broadcaster_name: String,
    pub quality: String,
    pub fps: u32,
    pub visibility: Visibility,
    pub scope: Option<String>,
    pub has_access_code: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of `start_session`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Created,
    /// The owner already had a session; latest start wins
    Replaced,
}

/// Result of `update_metadata`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Changed,
    /// The patch left the session as it was
    Unchanged,
}

/// Why a viewer was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessDenied {
    UnknownSession,
    NotInScope,
    WrongAccessCode,
}

/// Directory of active broadcast sessions
#[derive(Default)]
pub struct StreamDirectory {
    sessions: RwLock<HashMap<ConnectionId, StreamSession>>,
}

impl StreamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the session owned by `owner`
    pub fn start_session(
        &self,
        owner: &str,
        metadata: SessionMetadata,
    ) -> (StreamSession, StartOutcome) {
        let session = StreamSession {
            id: owner.to_string(),
            metadata: metadata.normalize(),
            created_at: Utc::now(),
        };

        let previous = self
            .sessions
            .write()
            .insert(owner.to_string(), session.clone());

        let outcome = if previous.is_some() {
            debug!("Session {} replaced by a new start", owner);
            StartOutcome::Replaced
        } else {
            StartOutcome::Created
        };
        info!(
            "Session started: {} ({:?}, {})",
            owner, session.metadata.title, session.metadata.quality
        );

        (session, outcome)
    }

    /// Remove the session owned by `owner`, returning it if there was one
    pub fn stop_session(&self, owner: &str) -> Option<StreamSession> {
        let removed = self.sessions.write().remove(owner);
        if removed.is_some() {
            info!("Session stopped: {}", owner);
        }
        removed
    }

    /// Merge `patch` into the caller's own session; `None` if it owns none
    pub fn update_metadata(
        &self,
        owner: &str,
        patch: MetadataPatch,
    ) -> Option<(StreamSession, UpdateOutcome)> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(owner) {
            Some(session) => {
                let before = session.metadata.clone();
                session.apply(patch);
                let outcome = if session.metadata == before {
                    UpdateOutcome::Unchanged
                } else {
                    UpdateOutcome::Changed
                };
                Some((session.clone(), outcome))
            }
            None => {
                debug!("Ignoring metadata update from {} (no session owned)", owner);
                None
            }
        }
    }

    /// All current sessions, oldest first
    pub fn list_sessions(&self) -> Vec<StreamSession> {
        let mut list: Vec<StreamSession> = self.sessions.read().values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Wire summaries of all current sessions, oldest first
    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.list_sessions().iter().map(StreamSession::summary).collect()
    }

    /// Snapshot for a late-joining connection. Nothing is redacted here;
    /// access control happens at view time through [`Self::check_access`].
    pub fn snapshot_for(&self, _requesting: &str) -> Vec<StreamSession> {
        self.list_sessions()
    }

    pub fn get(&self, id: &str) -> Option<StreamSession> {
        self.sessions.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Decide whether `viewer` may join `session_id`
    ///
    /// `is_member` reports whether the viewer belongs to a given room.
    pub fn check_access(
        &self,
        session_id: &str,
        viewer: &str,
        access_code: Option<&str>,
        is_member: impl Fn(&str) -> bool,
    ) -> std::result::Result<(), AccessDenied> {
        let sessions = self.sessions.read();
        let session = sessions.get(session_id).ok_or(AccessDenied::UnknownSession)?;

        if session.id == viewer {
            return Ok(());
        }

        let meta = &session.metadata;
        if meta.visibility == Visibility::RestrictedToRoom {
            match meta.scope.as_deref() {
                Some(room) if is_member(room) => {}
                _ => return Err(AccessDenied::NotInScope),
            }
        }

        if let Some(expected) = meta.access_code.as_deref() {
            if access_code != Some(expected) {
                return Err(AccessDenied::WrongAccessCode);
            }
        }

        Ok(())
    }
}
