// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// User identity and session lifecycle
//
// Identity lives forever in durable storage; a session lives until it has
// been idle for longer than the configured timeout. Identity must be
// resolved first: a brand-new user's first session does not count as an
// extra visit.

use tracing::{debug, info};

use crate::event::generate_id;
use crate::storage::{DurableStore, SessionRecord, UserIdentity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResolution {
    pub identity: UserIdentity,
    pub is_new_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResolution {
    pub session: SessionRecord,
    pub is_new_session: bool,
    /// User visit count after this resolution
    pub visit_count: u32,
}

/// Result of an interaction signal reaching the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// Inside the throttle window, nothing written
    Throttled,
    Refreshed,
    /// The previous session had already expired; a new one was started
    Rotated(SessionResolution),
}

pub struct SessionManager {
    timeout_ms: i64,
    throttle_ms: i64,
    current: Option<SessionRecord>,
    last_activity_write: Option<i64>,
}

impl SessionManager {
    pub fn new(timeout_ms: i64, throttle_ms: i64) -> Self {
        Self {
            timeout_ms,
            throttle_ms,
            current: None,
            last_activity_write: None,
        }
    }

    /// Load the user identity, creating it on first sight
    pub fn resolve_identity(&self, store: &DurableStore) -> IdentityResolution {
        let now = store.now_ms();

        match store.get_user_identity() {
            Some(mut identity) => {
                identity.last_seen_at = now;
                store.set_user_identity(&identity);
                debug!("Returning user {}", identity.user_id);
                IdentityResolution {
                    identity,
                    is_new_user: false,
                }
            }
            None => {
                let identity = UserIdentity {
                    user_id: generate_id(),
                    created_at: now,
                    visit_count: 1,
                    last_seen_at: now,
                };
                store.set_user_identity(&identity);
                info!("New user {}", identity.user_id);
                IdentityResolution {
                    identity,
                    is_new_user: true,
                }
            }
        }
    }

    /// Continue the stored session if it is still live, otherwise start a
    /// new one
    pub fn resolve_session(
        &mut self,
        store: &DurableStore,
        identity: &IdentityResolution,
    ) -> SessionResolution {
        if !store.is_session_expired(self.timeout_ms) {
            if let Some(session) = store.increment_page_views() {
                debug!(
                    "Continuing session {} (page view {})",
                    session.session_id, session.page_views
                );
                store.set_session_token(&session.session_id);
                self.current = Some(session.clone());
                self.last_activity_write = Some(session.last_activity_at);
                return SessionResolution {
                    session,
                    is_new_session: false,
                    visit_count: identity.identity.visit_count,
                };
            }
        }

        self.start_session(store, identity.is_new_user, identity.identity.visit_count)
    }

    fn start_session(
        &mut self,
        store: &DurableStore,
        is_new_user: bool,
        known_visit_count: u32,
    ) -> SessionResolution {
        let now = store.now_ms();
        let session = SessionRecord {
            session_id: generate_id(),
            started_at: now,
            last_activity_at: now,
            page_views: 1,
        };
        store.set_session_data(&session);
        store.set_session_token(&session.session_id);

        let visit_count = if is_new_user {
            known_visit_count
        } else {
            store
                .increment_visit_count()
                .map(|identity| identity.visit_count)
                .unwrap_or(known_visit_count + 1)
        };

        info!(
            "Started session {} (visit {})",
            session.session_id, visit_count
        );

        self.current = Some(session.clone());
        self.last_activity_write = Some(now);
        SessionResolution {
            session,
            is_new_session: true,
            visit_count,
        }
    }

    /// Apply a qualifying interaction: refresh `last_activity_at`, or rotate
    /// to a new session when the stored one has already expired
    pub fn record_activity(&mut self, store: &DurableStore, visit_count: u32) -> ActivityOutcome {
        let now = store.now_ms();
        if let Some(last) = self.last_activity_write {
            if now - last < self.throttle_ms {
                return ActivityOutcome::Throttled;
            }
        }

        match store.get_session_data() {
            Some(session) if now - session.last_activity_at > self.timeout_ms => {
                info!("Session {} expired while idle", session.session_id);
                ActivityOutcome::Rotated(self.start_session(store, false, visit_count))
            }
            Some(_) => {
                self.current = store.update_session_activity().or(self.current.take());
                self.last_activity_write = Some(now);
                ActivityOutcome::Refreshed
            }
            None => {
                // Record vanished (cleared or storage lost); write back ours
                if let Some(session) = self.current.as_mut() {
                    session.last_activity_at = now;
                    store.set_session_data(session);
                }
                self.last_activity_write = Some(now);
                ActivityOutcome::Refreshed
            }
        }
    }
}
