//! In-process cloud backends

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    CloudDb, CloudEntry, CloudError, CloudOp, CloudResult, CloudUser, ConnectionStatus,
    EntryFilter, Subscription,
};
use crate::models::now_millis;

#[derive(Debug)]
struct CloudState {
    user: Option<CloudUser>,
    status: ConnectionStatus,
    entries: Vec<CloudEntry>,
    subscriptions: Vec<Subscription>,
    failing: bool,
}

/// Cloud database held in memory
///
/// Behaves like the hosted collection for a single user session: signing
/// in and out, subscriptions, lookups and all-or-nothing transactions.
pub struct MemoryCloud {
    state: Mutex<CloudState>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CloudState {
                user: None,
                status: ConnectionStatus::Opened,
                entries: Vec::new(),
                subscriptions: Vec::new(),
                failing: false,
            }),
        }
    }

    pub fn sign_in(&self, email: &str) -> CloudResult<()> {
        let mut state = self.state.lock()?;
        state.user = Some(CloudUser {
            email: email.to_string(),
        });
        state.status = ConnectionStatus::Authenticated;
        Ok(())
    }

    pub fn sign_out(&self) -> CloudResult<()> {
        let mut state = self.state.lock()?;
        state.user = None;
        state.status = ConnectionStatus::Opened;
        Ok(())
    }

    pub fn add_subscription(&self) -> CloudResult<()> {
        self.state.lock()?.subscriptions.push(Subscription {
            id: Uuid::new_v4(),
        });
        Ok(())
    }

    pub fn set_status(&self, status: ConnectionStatus) -> CloudResult<()> {
        self.state.lock()?.status = status;
        Ok(())
    }

    /// Make every request fail until turned off again
    pub fn set_failing(&self, failing: bool) -> CloudResult<()> {
        self.state.lock()?.failing = failing;
        Ok(())
    }

    /// Insert a record as-is
    pub fn insert(&self, entry: CloudEntry) -> CloudResult<()> {
        self.state.lock()?.entries.push(entry);
        Ok(())
    }

    /// Copy of every stored record
    pub fn entries(&self) -> CloudResult<Vec<CloudEntry>> {
        Ok(self.state.lock()?.entries.clone())
    }

    fn check(state: &CloudState) -> CloudResult<()> {
        if state.status == ConnectionStatus::Closed {
            return Err(CloudError::Disconnected);
        }
        if state.failing {
            return Err(CloudError::Request("simulated failure".into()));
        }
        Ok(())
    }
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_op(entries: &mut Vec<CloudEntry>, op: CloudOp) -> CloudResult<()> {
    match op {
        CloudOp::UpsertByLookup {
            email_content_hash,
            patch,
            owner,
        } => {
            let existing = entries
                .iter()
                .position(|e| e.email_content_hash.as_deref() == Some(email_content_hash.as_str()));
            let index = match existing {
                Some(index) => index,
                None => {
                    entries.push(CloudEntry {
                        id: Uuid::new_v4(),
                        content: String::new(),
                        created_at: now_millis(),
                        copied_at: None,
                        is_favorited: None,
                        tags: None,
                        email_content_hash: Some(email_content_hash),
                        owner: None,
                    });
                    entries.len() - 1
                }
            };
            let entry = &mut entries[index];
            patch.apply(entry);
            if owner.is_some() {
                entry.owner = owner;
            }
        }
        CloudOp::UpdateById { id, patch } => {
            let entry = entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or(CloudError::NotFound(id))?;
            patch.apply(entry);
        }
        CloudOp::DeleteById(id) => entries.retain(|e| e.id != id),
    }
    Ok(())
}

#[async_trait]
impl CloudDb for MemoryCloud {
    async fn auth(&self) -> CloudResult<Option<CloudUser>> {
        Ok(self.state.lock()?.user.clone())
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.state
            .lock()
            .map(|s| s.status)
            .unwrap_or(ConnectionStatus::Errored)
    }

    async fn query_entries(&self, filter: &EntryFilter) -> CloudResult<Vec<CloudEntry>> {
        let state = self.state.lock()?;
        Self::check(&state)?;
        Ok(state
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn query_subscriptions(&self) -> CloudResult<Vec<Subscription>> {
        let state = self.state.lock()?;
        Self::check(&state)?;
        if state.user.is_none() {
            return Ok(Vec::new());
        }
        Ok(state.subscriptions.clone())
    }

    async fn transact(&self, ops: Vec<CloudOp>) -> CloudResult<()> {
        let mut state = self.state.lock()?;
        Self::check(&state)?;

        let mut staged = state.entries.clone();
        for op in ops {
            apply_op(&mut staged, op)?;
        }
        state.entries = staged;
        Ok(())
    }
}

/// Cloud backend for hosts without an account
///
/// Never signed in and never connected.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineCloud;

#[async_trait]
impl CloudDb for OfflineCloud {
    async fn auth(&self) -> CloudResult<Option<CloudUser>> {
        Ok(None)
    }

    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Closed
    }

    async fn query_entries(&self, _filter: &EntryFilter) -> CloudResult<Vec<CloudEntry>> {
        Err(CloudError::Disconnected)
    }

    async fn query_subscriptions(&self) -> CloudResult<Vec<Subscription>> {
        Err(CloudError::Disconnected)
    }

    async fn transact(&self, _ops: Vec<CloudOp>) -> CloudResult<()> {
        Err(CloudError::Disconnected)
    }
}
