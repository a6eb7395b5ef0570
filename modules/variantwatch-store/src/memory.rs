//! In-memory store for tests. No database required.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use variantwatch_common::{Comment, FinalSnapshot, MonitoringSession, SessionOutcome};

use crate::comments::CommentStore;
use crate::sessions::SessionStore;

/// Implements both `CommentStore` and `SessionStore`. Thread-safe.
///
/// Counts existence queries and can be told to fail bulk inserts or reject
/// specific comment IDs, to exercise degrade paths.
#[derive(Default)]
pub struct MemoryStore {
    comments: Mutex<HashMap<String, Comment>>,
    sessions: Mutex<Vec<MonitoringSession>>,
    existence_queries: AtomicUsize,
    bulk_inserts: AtomicUsize,
    fail_bulk_insert: AtomicBool,
    fail_existence_check: AtomicBool,
    rejected_ids: Mutex<HashSet<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `existing_ids` calls so far.
    pub fn existence_queries(&self) -> usize {
        self.existence_queries.load(Ordering::SeqCst)
    }

    /// Number of `insert_batch` calls so far.
    pub fn bulk_inserts(&self) -> usize {
        self.bulk_inserts.load(Ordering::SeqCst)
    }

    pub fn set_fail_bulk_insert(&self, fail: bool) {
        self.fail_bulk_insert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_existence_check(&self, fail: bool) {
        self.fail_existence_check.store(fail, Ordering::SeqCst);
    }

    /// Make single-row inserts of this ID fail.
    pub fn reject_comment(&self, comment_id: &str) {
        lock(&self.rejected_ids).insert(comment_id.to_string());
    }

    pub fn comment_count(&self) -> usize {
        lock(&self.comments).len()
    }

    pub fn has_comment(&self, comment_id: &str) -> bool {
        lock(&self.comments).contains_key(comment_id)
    }

    /// Every session ever created, terminal ones included.
    pub fn all_sessions(&self) -> Vec<MonitoringSession> {
        lock(&self.sessions).clone()
    }
}

#[async_trait]
impl CommentStore for MemoryStore {
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        self.existence_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_existence_check.load(Ordering::SeqCst) {
            return Err(anyhow!("existence check failed"));
        }
        let comments = lock(&self.comments);
        Ok(ids
            .iter()
            .filter(|id| comments.contains_key(id.as_str()))
            .cloned()
            .collect())
    }

    async fn insert_batch(&self, batch: &[Comment]) -> Result<u64> {
        self.bulk_inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_bulk_insert.load(Ordering::SeqCst) {
            return Err(anyhow!("bulk insert failed"));
        }
        let mut comments = lock(&self.comments);
        let mut inserted = 0;
        for c in batch {
            if !comments.contains_key(&c.comment_id) {
                comments.insert(c.comment_id.clone(), c.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_one(&self, comment: &Comment) -> Result<bool> {
        if lock(&self.rejected_ids).contains(&comment.comment_id) {
            return Err(anyhow!("insert rejected for {}", comment.comment_id));
        }
        let mut comments = lock(&self.comments);
        if comments.contains_key(&comment.comment_id) {
            return Ok(false);
        }
        comments.insert(comment.comment_id.clone(), comment.clone());
        Ok(true)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_if_absent(&self, session: &MonitoringSession) -> Result<bool> {
        let mut sessions = lock(&self.sessions);
        if sessions
            .iter()
            .any(|s| s.is_active && s.variant_id == session.variant_id)
        {
            return Ok(false);
        }
        sessions.push(session.clone());
        Ok(true)
    }

    async fn get(&self, variant_id: &str) -> Result<Option<MonitoringSession>> {
        let sessions = lock(&self.sessions);
        let mut matching = sessions.iter().filter(|s| s.variant_id == variant_id);
        let active = sessions
            .iter()
            .find(|s| s.variant_id == variant_id && s.is_active);
        Ok(active.or_else(|| matching.next_back()).cloned())
    }

    async fn list_active(&self) -> Result<Vec<MonitoringSession>> {
        let mut active: Vec<_> = lock(&self.sessions)
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        active.sort_by_key(|s| s.started_at);
        Ok(active)
    }

    async fn record_observation(
        &self,
        variant_id: &str,
        observation: &FinalSnapshot,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut sessions = lock(&self.sessions);
        match sessions
            .iter_mut()
            .find(|s| s.is_active && s.variant_id == variant_id)
        {
            Some(s) => {
                s.last_observation = Some(*observation);
                s.last_checked_at = Some(at);
                s.checks_run += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn finalize(
        &self,
        variant_id: &str,
        outcome: &SessionOutcome,
    ) -> Result<Option<MonitoringSession>> {
        let mut sessions = lock(&self.sessions);
        match sessions
            .iter_mut()
            .find(|s| s.is_active && s.variant_id == variant_id)
        {
            Some(s) => {
                s.apply_outcome(outcome);
                Ok(Some(s.clone()))
            }
            None => Ok(None),
        }
    }
}
