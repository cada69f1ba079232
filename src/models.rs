/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: models.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 10:31:02
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-21 09:17:55
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Lifecycle status of a mailing list.
///
/// Lists advance `new -> open -> orphaned -> closed`; the only back-edge is
/// a reopen to `open`. Nothing ever returns to `new` after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MlStatus {
    New,
    Open,
    Orphaned,
    Closed,
}

impl MlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MlStatus::New => "new",
            MlStatus::Open => "open",
            MlStatus::Orphaned => "orphaned",
            MlStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for MlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Enabled,
    Disabled,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Enabled => "enabled",
            TenantStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation kind of a persisted log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOp {
    Create,
    Update,
    AddMembers,
    #[serde(rename = "delete_members")]
    DelMembers,
    Open,
    Orphan,
    Close,
    Post,
}

/// One entry of the append-only audit trail embedded in every document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub op: LogOp,
    pub by: String,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(op: LogOp, by: &str) -> Self {
        Self {
            op,
            by: by.to_string(),
            ts: Utc::now(),
            members: None,
            config: None,
        }
    }

    pub fn with_members(op: LogOp, by: &str, members: &HashSet<String>) -> Self {
        let mut sorted: Vec<String> = members.iter().cloned().collect();
        sorted.sort();
        Self {
            members: Some(sorted),
            ..Self::new(op, by)
        }
    }

    pub fn with_config(op: LogOp, by: &str, config: serde_json::Value) -> Self {
        Self {
            config: Some(config),
            ..Self::new(op, by)
        }
    }
}

/// Administrative unit owning a pool of mailing lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_name: String,
    pub status: TenantStatus,
    pub admins: HashSet<String>,
    pub charset: String,
    pub ml_name_format: String,
    pub new_ml_account: String,
    pub days_to_orphan: u32,
    pub days_to_close: u32,
    pub counter: u64,
    pub welcome_msg: String,
    pub readme_msg: String,
    pub add_msg: String,
    pub remove_msg: String,
    pub reopen_msg: String,
    pub goodbye_msg: String,
    pub report_subject: String,
    pub report_msg: String,
    pub orphaned_subject: String,
    pub orphaned_msg: String,
    pub closed_subject: String,
    pub closed_msg: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub by: String,
    pub logs: Vec<LogEntry>,
}

/// Complete configuration for creating a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub admins: HashSet<String>,
    #[serde(default = "default_charset")]
    pub charset: String,
    pub ml_name_format: String,
    pub new_ml_account: String,
    pub days_to_orphan: u32,
    pub days_to_close: u32,
    #[serde(default)]
    pub welcome_msg: String,
    #[serde(default)]
    pub readme_msg: String,
    #[serde(default)]
    pub add_msg: String,
    #[serde(default)]
    pub remove_msg: String,
    #[serde(default)]
    pub reopen_msg: String,
    #[serde(default)]
    pub goodbye_msg: String,
    #[serde(default)]
    pub report_subject: String,
    #[serde(default)]
    pub report_msg: String,
    #[serde(default)]
    pub orphaned_subject: String,
    #[serde(default)]
    pub orphaned_msg: String,
    #[serde(default)]
    pub closed_subject: String,
    #[serde(default)]
    pub closed_msg: String,
}

fn default_charset() -> String {
    "utf-8".to_string()
}

/// Partial tenant update; only set fields are applied. Immutable fields
/// (`tenant_name`, `created`, `updated`, `counter`, `logs`) have no
/// counterpart here, so they cannot be patched at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TenantStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admins: Option<HashSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_name_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_ml_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_to_orphan: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_to_close: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reopen_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goodbye_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_msg: Option<String>,
}

impl Tenant {
    pub fn from_config(tenant_name: &str, by: &str, cfg: &TenantConfig) -> Self {
        let now = Utc::now();
        let log = LogEntry::with_config(
            LogOp::Create,
            by,
            serde_json::to_value(cfg).unwrap_or(serde_json::Value::Null),
        );
        Self {
            tenant_name: tenant_name.to_string(),
            status: TenantStatus::Enabled,
            admins: cfg.admins.clone(),
            charset: cfg.charset.clone(),
            ml_name_format: cfg.ml_name_format.clone(),
            new_ml_account: cfg.new_ml_account.clone(),
            days_to_orphan: cfg.days_to_orphan,
            days_to_close: cfg.days_to_close,
            counter: 0,
            welcome_msg: cfg.welcome_msg.clone(),
            readme_msg: cfg.readme_msg.clone(),
            add_msg: cfg.add_msg.clone(),
            remove_msg: cfg.remove_msg.clone(),
            reopen_msg: cfg.reopen_msg.clone(),
            goodbye_msg: cfg.goodbye_msg.clone(),
            report_subject: cfg.report_subject.clone(),
            report_msg: cfg.report_msg.clone(),
            orphaned_subject: cfg.orphaned_subject.clone(),
            orphaned_msg: cfg.orphaned_msg.clone(),
            closed_subject: cfg.closed_subject.clone(),
            closed_msg: cfg.closed_msg.clone(),
            created: now,
            updated: now,
            by: by.to_string(),
            logs: vec![log],
        }
    }

    /// Apply the set fields of a patch. Returns true if anything changed.
    pub fn apply_patch(&mut self, patch: &TenantPatch) {
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = &patch.admins {
            self.admins = v.clone();
        }
        if let Some(v) = &patch.charset {
            self.charset = v.clone();
        }
        if let Some(v) = &patch.ml_name_format {
            self.ml_name_format = v.clone();
        }
        if let Some(v) = &patch.new_ml_account {
            self.new_ml_account = v.clone();
        }
        if let Some(v) = patch.days_to_orphan {
            self.days_to_orphan = v;
        }
        if let Some(v) = patch.days_to_close {
            self.days_to_close = v;
        }
        if let Some(v) = &patch.welcome_msg {
            self.welcome_msg = v.clone();
        }
        if let Some(v) = &patch.readme_msg {
            self.readme_msg = v.clone();
        }
        if let Some(v) = &patch.add_msg {
            self.add_msg = v.clone();
        }
        if let Some(v) = &patch.remove_msg {
            self.remove_msg = v.clone();
        }
        if let Some(v) = &patch.reopen_msg {
            self.reopen_msg = v.clone();
        }
        if let Some(v) = &patch.goodbye_msg {
            self.goodbye_msg = v.clone();
        }
        if let Some(v) = &patch.report_subject {
            self.report_subject = v.clone();
        }
        if let Some(v) = &patch.report_msg {
            self.report_msg = v.clone();
        }
        if let Some(v) = &patch.orphaned_subject {
            self.orphaned_subject = v.clone();
        }
        if let Some(v) = &patch.orphaned_msg {
            self.orphaned_msg = v.clone();
        }
        if let Some(v) = &patch.closed_subject {
            self.closed_subject = v.clone();
        }
        if let Some(v) = &patch.closed_msg {
            self.closed_msg = v.clone();
        }
    }
}

/// A single ephemeral mailing list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailingList {
    pub ml_name: String,
    pub tenant_name: String,
    pub subject: String,
    pub members: HashSet<String>,
    pub status: MlStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub by: String,
    pub logs: Vec<LogEntry>,
}

impl MailingList {
    pub fn new(
        tenant_name: &str,
        ml_name: &str,
        subject: &str,
        members: &HashSet<String>,
        by: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            ml_name: ml_name.to_string(),
            tenant_name: tenant_name.to_string(),
            subject: subject.to_string(),
            members: members.clone(),
            status: MlStatus::New,
            created: now,
            updated: now,
            by: by.to_string(),
            logs: vec![LogEntry::with_members(LogOp::Create, by, members)],
        }
    }
}

/// Render a printf-like list-name pattern against a counter value.
///
/// Supports `%d` / `%i` / `%u` with optional width (`%6d`) or zero padding
/// (`%06d`), and `%%` as a literal percent. Unknown directives pass through
/// unchanged so a bad tenant pattern still yields a usable name.
pub fn format_ml_name(format: &str, n: u64) -> String {
    let mut out = String::with_capacity(format.len() + 8);
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut width = String::new();
        while let Some(d) = chars.peek().copied() {
            if d.is_ascii_digit() {
                width.push(d);
                chars.next();
            } else {
                break;
            }
        }
        match chars.next() {
            Some('d') | Some('i') | Some('u') => {
                let zero = width.starts_with('0');
                let w: usize = width.parse().unwrap_or(0);
                if zero {
                    out.push_str(&format!("{n:0w$}"));
                } else {
                    out.push_str(&format!("{n:w$}"));
                }
            }
            Some(other) => {
                out.push('%');
                out.push_str(&width);
                out.push(other);
            }
            None => {
                out.push('%');
                out.push_str(&width);
            }
        }
    }
    out
}
