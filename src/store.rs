/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: store.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-03 09:48:11
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-24 19:02:46
 */

use crate::consts::ACTOR_CLI;
use crate::models::{
    LogEntry, LogOp, MailingList, MlStatus, Tenant, TenantConfig, TenantPatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("{0} is not an admin of {1}")]
    NotAdmin(String, String),
    #[error("invalid record name: {0}")]
    InvalidName(String),
    #[error("invalid status transition to {0}")]
    InvalidTransition(String),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Uniqueness violations and missing records are policy signals, not
    /// faults; callers decide what to do with them. Everything else aborts
    /// the current request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Serde(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Conjunction of field predicates evaluated against serialized documents.
/// Comparison is type-aware: numbers numerically, RFC 3339 strings as
/// timestamps, everything else lexicographically / by equality.
#[derive(Debug, Clone, Default)]
pub struct Query {
    preds: Vec<(String, Cmp, Value)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(self, field: &str, value: impl Serialize) -> Self {
        self.cmp(field, Cmp::Eq, value)
    }

    pub fn cmp(mut self, field: &str, cmp: Cmp, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.preds.push((field.to_string(), cmp, value));
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.preds.iter().all(|(field, cmp, expected)| {
            let actual = doc.get(field).unwrap_or(&Value::Null);
            match compare_values(actual, expected) {
                Some(ord) => match cmp {
                    Cmp::Eq => ord == Ordering::Equal,
                    Cmp::Ne => ord != Ordering::Equal,
                    Cmp::Gt => ord == Ordering::Greater,
                    Cmp::Gte => ord != Ordering::Less,
                    Cmp::Lt => ord == Ordering::Less,
                    Cmp::Lte => ord != Ordering::Greater,
                },
                None => *cmp == Cmp::Ne,
            }
        })
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(dx), Ok(dy)) => Some(dx.cmp(&dy)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => (a == b).then_some(Ordering::Equal),
    }
}

fn apply_query<T: Clone + Serialize>(
    items: impl Iterator<Item = T>,
    query: &Query,
    sort: Option<&str>,
    desc: bool,
) -> Vec<T> {
    let mut matched: Vec<(Value, T)> = items
        .filter_map(|item| {
            let doc = serde_json::to_value(&item).ok()?;
            query.matches(&doc).then_some((doc, item))
        })
        .collect();
    if let Some(key) = sort {
        matched.sort_by(|(a, _), (b, _)| {
            let av = a.get(key).unwrap_or(&Value::Null);
            let bv = b.get(key).unwrap_or(&Value::Null);
            compare_values(av, bv).unwrap_or(Ordering::Equal)
        });
        if desc {
            matched.reverse();
        }
    }
    matched.into_iter().map(|(_, item)| item).collect()
}

/// Atomic operations on tenants, lists, members, counters and logs. Every
/// operation is atomic at the granularity of a single document.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_tenant(&self, name: &str, by: &str, cfg: &TenantConfig) -> StoreResult<()>;
    async fn update_tenant(&self, name: &str, by: &str, patch: &TenantPatch) -> StoreResult<()>;
    async fn delete_tenant(&self, name: &str) -> StoreResult<()>;
    async fn get_tenant(&self, name: &str) -> StoreResult<Option<Tenant>>;
    async fn find_tenants(
        &self,
        query: &Query,
        sort: Option<&str>,
        desc: bool,
    ) -> StoreResult<Vec<Tenant>>;

    /// Atomic fetch-and-add; returns the new counter value. The sole
    /// linearization point for list-name uniqueness.
    async fn increment_counter(&self, tenant_name: &str) -> StoreResult<u64>;

    async fn create_ml(
        &self,
        tenant_name: &str,
        ml_name: &str,
        subject: &str,
        members: &HashSet<String>,
        by: &str,
    ) -> StoreResult<()>;
    async fn get_ml(&self, ml_name: &str) -> StoreResult<Option<MailingList>>;
    async fn find_mls(
        &self,
        query: &Query,
        sort: Option<&str>,
        desc: bool,
    ) -> StoreResult<Vec<MailingList>>;
    async fn change_ml_status(&self, ml_name: &str, status: MlStatus, by: &str) -> StoreResult<()>;
    async fn add_members(
        &self,
        ml_name: &str,
        members: &HashSet<String>,
        by: &str,
    ) -> StoreResult<()>;
    async fn del_members(
        &self,
        ml_name: &str,
        members: &HashSet<String>,
        by: &str,
    ) -> StoreResult<()>;
    async fn get_members(&self, ml_name: &str) -> StoreResult<Option<HashSet<String>>>;

    /// Bulk advance of idle lists; returns the lists actually touched.
    async fn mark_mls_orphaned(
        &self,
        cutoff: DateTime<Utc>,
        by: &str,
    ) -> StoreResult<Vec<MailingList>>;
    async fn mark_mls_closed(
        &self,
        cutoff: DateTime<Utc>,
        by: &str,
    ) -> StoreResult<Vec<MailingList>>;

    async fn log_post(&self, ml_name: &str, members: &HashSet<String>, by: &str)
        -> StoreResult<()>;
    async fn get_logs(&self, ml_name: &str) -> StoreResult<Option<Vec<LogEntry>>>;
}

#[derive(Default)]
struct State {
    tenants: HashMap<String, Tenant>,
    mls: HashMap<String, MailingList>,
}

/// Document store on the local filesystem: one JSON document per record
/// under `<db_url>/<db_name>/{tenant,ml}/`, each write going through a
/// temp file and an atomic rename. In-process isolation comes from the
/// `RwLock`; the log array in each document is the authoritative audit
/// trail under cross-process races.
pub struct FileStore {
    root: PathBuf,
    state: RwLock<State>,
}

const TENANT_DIR: &str = "tenant";
const ML_DIR: &str = "ml";

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.')
}

impl FileStore {
    pub fn open(db_url: &str, db_name: &str) -> StoreResult<Self> {
        let root = PathBuf::from(db_url).join(db_name);
        fs::create_dir_all(root.join(TENANT_DIR))?;
        fs::create_dir_all(root.join(ML_DIR))?;

        let mut state = State::default();
        for entry in fs::read_dir(root.join(TENANT_DIR))? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                let tenant: Tenant = serde_json::from_slice(&fs::read(&path)?)?;
                state.tenants.insert(tenant.tenant_name.clone(), tenant);
            }
        }
        for entry in fs::read_dir(root.join(ML_DIR))? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                let ml: MailingList = serde_json::from_slice(&fs::read(&path)?)?;
                state.mls.insert(ml.ml_name.clone(), ml);
            }
        }
        debug!(
            "store opened: {} tenants, {} mls",
            state.tenants.len(),
            state.mls.len()
        );

        Ok(Self {
            root,
            state: RwLock::new(state),
        })
    }

    fn persist<T: Serialize>(&self, kind: &str, name: &str, doc: &T) -> StoreResult<()> {
        let dir = self.root.join(kind);
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, doc)?;
        tmp.flush()?;
        tmp.persist(dir.join(format!("{name}.json")))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn unlink(&self, kind: &str, name: &str) -> StoreResult<()> {
        match fs::remove_file(self.root.join(kind).join(format!("{name}.json"))) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Test hook: backdate a list's `updated` stamp.
    #[cfg(test)]
    pub async fn set_ml_updated(&self, ml_name: &str, updated: DateTime<Utc>) {
        let mut state = self.state.write().await;
        if let Some(ml) = state.mls.get_mut(ml_name) {
            ml.updated = updated;
            let ml = ml.clone();
            let _ = self.persist(ML_DIR, ml_name, &ml);
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn create_tenant(&self, name: &str, by: &str, cfg: &TenantConfig) -> StoreResult<()> {
        if !valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        let mut state = self.state.write().await;
        if state
            .tenants
            .values()
            .any(|t| t.new_ml_account == cfg.new_ml_account)
        {
            error!("New ML account {} is duplicated", cfg.new_ml_account);
            return Err(StoreError::Duplicate(cfg.new_ml_account.clone()));
        }
        if state.tenants.contains_key(name) {
            error!("Tenant {} already exists", name);
            return Err(StoreError::Duplicate(name.to_string()));
        }
        let tenant = Tenant::from_config(name, by, cfg);
        self.persist(TENANT_DIR, name, &tenant)?;
        state.tenants.insert(name.to_string(), tenant);
        debug!("tenant {} created", name);
        Ok(())
    }

    async fn update_tenant(&self, name: &str, by: &str, patch: &TenantPatch) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(account) = &patch.new_ml_account {
            if state
                .tenants
                .values()
                .any(|t| t.tenant_name != name && &t.new_ml_account == account)
            {
                error!("New ML account {} is duplicated", account);
                return Err(StoreError::Duplicate(account.clone()));
            }
        }
        let Some(tenant) = state.tenants.get_mut(name) else {
            error!("Tenant {} not found", name);
            return Err(StoreError::NotFound(name.to_string()));
        };
        if by != ACTOR_CLI && !tenant.admins.contains(by) {
            error!("{} is not an admin of {}", by, name);
            return Err(StoreError::NotAdmin(by.to_string(), name.to_string()));
        }
        tenant.apply_patch(patch);
        tenant.updated = Utc::now();
        tenant.by = by.to_string();
        tenant.logs.push(LogEntry::with_config(
            LogOp::Update,
            by,
            serde_json::to_value(patch)?,
        ));
        let tenant = tenant.clone();
        self.persist(TENANT_DIR, name, &tenant)?;
        Ok(())
    }

    async fn delete_tenant(&self, name: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.tenants.contains_key(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let doomed: Vec<String> = state
            .mls
            .values()
            .filter(|ml| ml.tenant_name == name)
            .map(|ml| ml.ml_name.clone())
            .collect();
        for ml_name in doomed {
            self.unlink(ML_DIR, &ml_name)?;
            state.mls.remove(&ml_name);
        }
        self.unlink(TENANT_DIR, name)?;
        state.tenants.remove(name);
        debug!("tenant {} deleted", name);
        Ok(())
    }

    async fn get_tenant(&self, name: &str) -> StoreResult<Option<Tenant>> {
        let state = self.state.read().await;
        Ok(state.tenants.get(name).cloned())
    }

    async fn find_tenants(
        &self,
        query: &Query,
        sort: Option<&str>,
        desc: bool,
    ) -> StoreResult<Vec<Tenant>> {
        let state = self.state.read().await;
        Ok(apply_query(state.tenants.values().cloned(), query, sort, desc))
    }

    async fn increment_counter(&self, tenant_name: &str) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let Some(tenant) = state.tenants.get_mut(tenant_name) else {
            return Err(StoreError::NotFound(tenant_name.to_string()));
        };
        tenant.counter += 1;
        let counter = tenant.counter;
        let tenant = tenant.clone();
        self.persist(TENANT_DIR, tenant_name, &tenant)?;
        debug!("counter of {} advanced to {}", tenant_name, counter);
        Ok(counter)
    }

    async fn create_ml(
        &self,
        tenant_name: &str,
        ml_name: &str,
        subject: &str,
        members: &HashSet<String>,
        by: &str,
    ) -> StoreResult<()> {
        if !valid_name(ml_name) {
            return Err(StoreError::InvalidName(ml_name.to_string()));
        }
        let mut state = self.state.write().await;
        if state.mls.contains_key(ml_name) {
            error!("ML {} already exists", ml_name);
            return Err(StoreError::Duplicate(ml_name.to_string()));
        }
        let ml = MailingList::new(tenant_name, ml_name, subject, members, by);
        self.persist(ML_DIR, ml_name, &ml)?;
        state.mls.insert(ml_name.to_string(), ml);
        debug!("ml {} created for {}", ml_name, tenant_name);
        Ok(())
    }

    async fn get_ml(&self, ml_name: &str) -> StoreResult<Option<MailingList>> {
        let state = self.state.read().await;
        Ok(state.mls.get(ml_name).cloned())
    }

    async fn find_mls(
        &self,
        query: &Query,
        sort: Option<&str>,
        desc: bool,
    ) -> StoreResult<Vec<MailingList>> {
        let state = self.state.read().await;
        Ok(apply_query(state.mls.values().cloned(), query, sort, desc))
    }

    async fn change_ml_status(&self, ml_name: &str, status: MlStatus, by: &str) -> StoreResult<()> {
        let op = match status {
            MlStatus::Open => LogOp::Open,
            MlStatus::Orphaned => LogOp::Orphan,
            MlStatus::Closed => LogOp::Close,
            MlStatus::New => return Err(StoreError::InvalidTransition("new".to_string())),
        };
        let mut state = self.state.write().await;
        let Some(ml) = state.mls.get_mut(ml_name) else {
            return Err(StoreError::NotFound(ml_name.to_string()));
        };
        ml.status = status;
        ml.updated = Utc::now();
        ml.by = by.to_string();
        ml.logs.push(LogEntry::new(op, by));
        let ml = ml.clone();
        self.persist(ML_DIR, ml_name, &ml)?;
        debug!("status changed: ml_name={}|status={}|by={}", ml_name, status, by);
        Ok(())
    }

    async fn add_members(
        &self,
        ml_name: &str,
        members: &HashSet<String>,
        by: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let Some(ml) = state.mls.get_mut(ml_name) else {
            return Err(StoreError::NotFound(ml_name.to_string()));
        };
        ml.members.extend(members.iter().cloned());
        ml.updated = Utc::now();
        ml.by = by.to_string();
        ml.logs
            .push(LogEntry::with_members(LogOp::AddMembers, by, members));
        let ml = ml.clone();
        self.persist(ML_DIR, ml_name, &ml)?;
        Ok(())
    }

    async fn del_members(
        &self,
        ml_name: &str,
        members: &HashSet<String>,
        by: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let Some(ml) = state.mls.get_mut(ml_name) else {
            return Err(StoreError::NotFound(ml_name.to_string()));
        };
        ml.members.retain(|m| !members.contains(m));
        ml.updated = Utc::now();
        ml.by = by.to_string();
        ml.logs
            .push(LogEntry::with_members(LogOp::DelMembers, by, members));
        let ml = ml.clone();
        self.persist(ML_DIR, ml_name, &ml)?;
        Ok(())
    }

    async fn get_members(&self, ml_name: &str) -> StoreResult<Option<HashSet<String>>> {
        let state = self.state.read().await;
        Ok(state.mls.get(ml_name).map(|ml| ml.members.clone()))
    }

    async fn mark_mls_orphaned(
        &self,
        cutoff: DateTime<Utc>,
        by: &str,
    ) -> StoreResult<Vec<MailingList>> {
        self.bulk_advance(MlStatus::Open, MlStatus::Orphaned, LogOp::Orphan, cutoff, by)
            .await
    }

    async fn mark_mls_closed(
        &self,
        cutoff: DateTime<Utc>,
        by: &str,
    ) -> StoreResult<Vec<MailingList>> {
        self.bulk_advance(MlStatus::Orphaned, MlStatus::Closed, LogOp::Close, cutoff, by)
            .await
    }

    async fn log_post(
        &self,
        ml_name: &str,
        members: &HashSet<String>,
        by: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let Some(ml) = state.mls.get_mut(ml_name) else {
            return Err(StoreError::NotFound(ml_name.to_string()));
        };
        ml.updated = Utc::now();
        ml.by = by.to_string();
        ml.logs.push(LogEntry::with_members(LogOp::Post, by, members));
        let ml = ml.clone();
        self.persist(ML_DIR, ml_name, &ml)?;
        Ok(())
    }

    async fn get_logs(&self, ml_name: &str) -> StoreResult<Option<Vec<LogEntry>>> {
        let state = self.state.read().await;
        Ok(state.mls.get(ml_name).map(|ml| ml.logs.clone()))
    }
}

impl FileStore {
    async fn bulk_advance(
        &self,
        from: MlStatus,
        to: MlStatus,
        op: LogOp,
        cutoff: DateTime<Utc>,
        by: &str,
    ) -> StoreResult<Vec<MailingList>> {
        let mut state = self.state.write().await;
        let mut touched = Vec::new();
        let names: Vec<String> = state
            .mls
            .values()
            .filter(|ml| ml.status == from && ml.updated < cutoff)
            .map(|ml| ml.ml_name.clone())
            .collect();
        for name in names {
            if let Some(ml) = state.mls.get_mut(&name) {
                ml.status = to;
                ml.updated = Utc::now();
                ml.by = by.to_string();
                ml.logs.push(LogEntry::new(op, by));
                let ml = ml.clone();
                self.persist(ML_DIR, &name, &ml)?;
                touched.push(ml);
            }
        }
        debug!(
            "{}: {:?}",
            to,
            touched.iter().map(|ml| &ml.ml_name).collect::<Vec<_>>()
        );
        Ok(touched)
    }
}

#[cfg(test)]
#[path = "./store_tests.rs"]
mod store_tests;
