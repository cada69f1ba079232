/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: ctl.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-10 13:27:35
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-26 09:55:12
 */

use crate::addr::normalize;
use crate::consts::ACTOR_CLI;
use crate::models::{TenantConfig, TenantPatch, TenantStatus};
use crate::store::{Query, Store, StoreError};
use clap::{Args, Subcommand};
use config::{Config, File, FileFormat};
use log::error;
use std::path::PathBuf;
use std::sync::Arc;

pub const EXIT_OK: i32 = 0;
pub const EXIT_NOT_FOUND: i32 = 1;
pub const EXIT_INVALID: i32 = 2;

#[derive(Debug, Subcommand)]
pub enum TenantCommand {
    /// Register parameters of a tenant
    Create(TenantArgs),
    /// Update parameters of a tenant
    Update(TenantArgs),
    /// Show parameters of a tenant
    Show { name: String },
    /// List tenants
    List,
    /// Delete a tenant and all of its lists
    Delete { name: String },
}

#[derive(Debug, Args)]
pub struct TenantArgs {
    pub name: String,
    /// YAML file holding any subset of the tenant fields; flags win
    #[arg(long)]
    pub yamlfile: Option<PathBuf>,
    #[arg(long = "admin")]
    pub admins: Vec<String>,
    #[arg(long)]
    pub charset: Option<String>,
    #[arg(long)]
    pub enable: bool,
    #[arg(long, conflicts_with = "enable")]
    pub disable: bool,
    #[arg(long)]
    pub days_to_close: Option<u32>,
    #[arg(long)]
    pub days_to_orphan: Option<u32>,
    #[arg(long)]
    pub ml_name_format: Option<String>,
    #[arg(long)]
    pub new_ml_account: Option<String>,
    #[arg(long)]
    pub welcome_file: Option<PathBuf>,
    #[arg(long)]
    pub readme_file: Option<PathBuf>,
    #[arg(long)]
    pub add_file: Option<PathBuf>,
    #[arg(long)]
    pub remove_file: Option<PathBuf>,
    #[arg(long)]
    pub reopen_file: Option<PathBuf>,
    #[arg(long)]
    pub goodbye_file: Option<PathBuf>,
    #[arg(long)]
    pub report_subject: Option<String>,
    #[arg(long)]
    pub report_file: Option<PathBuf>,
    #[arg(long)]
    pub orphaned_subject: Option<String>,
    #[arg(long)]
    pub orphaned_file: Option<PathBuf>,
    #[arg(long)]
    pub closed_subject: Option<String>,
    #[arg(long)]
    pub closed_file: Option<PathBuf>,
}

fn read_template(path: &Option<PathBuf>) -> anyhow::Result<Option<String>> {
    match path {
        Some(p) => Ok(Some(std::fs::read_to_string(p).map_err(|e| {
            anyhow::anyhow!("cannot read {}: {}", p.display(), e)
        })?)),
        None => Ok(None),
    }
}

/// Merge the YAML file (if any) and the explicit flags into a patch; a
/// flag always wins over the file.
fn build_patch(args: &TenantArgs) -> anyhow::Result<TenantPatch> {
    let mut patch = match &args.yamlfile {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
            Config::builder()
                .add_source(File::from_str(&source, FileFormat::Yaml))
                .build()?
                .try_deserialize::<TenantPatch>()
                .map_err(|e| anyhow::anyhow!("invalid tenant file: {}", e))?
        }
        None => TenantPatch::default(),
    };

    if !args.admins.is_empty() {
        patch.admins = Some(normalize(args.admins.iter()));
    }
    if let Some(v) = &args.charset {
        patch.charset = Some(v.clone());
    }
    if args.enable {
        patch.status = Some(TenantStatus::Enabled);
    } else if args.disable {
        patch.status = Some(TenantStatus::Disabled);
    }
    if let Some(v) = args.days_to_close {
        patch.days_to_close = Some(v);
    }
    if let Some(v) = args.days_to_orphan {
        patch.days_to_orphan = Some(v);
    }
    if let Some(v) = &args.ml_name_format {
        patch.ml_name_format = Some(v.clone());
    }
    if let Some(v) = &args.new_ml_account {
        patch.new_ml_account = Some(v.clone());
    }
    if let Some(v) = read_template(&args.welcome_file)? {
        patch.welcome_msg = Some(v);
    }
    if let Some(v) = read_template(&args.readme_file)? {
        patch.readme_msg = Some(v);
    }
    if let Some(v) = read_template(&args.add_file)? {
        patch.add_msg = Some(v);
    }
    if let Some(v) = read_template(&args.remove_file)? {
        patch.remove_msg = Some(v);
    }
    if let Some(v) = read_template(&args.reopen_file)? {
        patch.reopen_msg = Some(v);
    }
    if let Some(v) = read_template(&args.goodbye_file)? {
        patch.goodbye_msg = Some(v);
    }
    if let Some(v) = &args.report_subject {
        patch.report_subject = Some(v.clone());
    }
    if let Some(v) = read_template(&args.report_file)? {
        patch.report_msg = Some(v);
    }
    if let Some(v) = &args.orphaned_subject {
        patch.orphaned_subject = Some(v.clone());
    }
    if let Some(v) = read_template(&args.orphaned_file)? {
        patch.orphaned_msg = Some(v);
    }
    if let Some(v) = &args.closed_subject {
        patch.closed_subject = Some(v.clone());
    }
    if let Some(v) = read_template(&args.closed_file)? {
        patch.closed_msg = Some(v);
    }
    Ok(patch)
}

/// A create needs the full record; missing required fields are a
/// validation error.
fn config_from_patch(patch: TenantPatch) -> anyhow::Result<TenantConfig> {
    let required = |field: &str| anyhow::anyhow!("missing required field: {}", field);
    Ok(TenantConfig {
        admins: patch.admins.unwrap_or_default(),
        charset: patch.charset.unwrap_or_else(|| "utf-8".to_string()),
        ml_name_format: patch.ml_name_format.ok_or_else(|| required("ml_name_format"))?,
        new_ml_account: patch.new_ml_account.ok_or_else(|| required("new_ml_account"))?,
        days_to_orphan: patch.days_to_orphan.ok_or_else(|| required("days_to_orphan"))?,
        days_to_close: patch.days_to_close.ok_or_else(|| required("days_to_close"))?,
        welcome_msg: patch.welcome_msg.unwrap_or_default(),
        readme_msg: patch.readme_msg.unwrap_or_default(),
        add_msg: patch.add_msg.unwrap_or_default(),
        remove_msg: patch.remove_msg.unwrap_or_default(),
        reopen_msg: patch.reopen_msg.unwrap_or_default(),
        goodbye_msg: patch.goodbye_msg.unwrap_or_default(),
        report_subject: patch.report_subject.unwrap_or_default(),
        report_msg: patch.report_msg.unwrap_or_default(),
        orphaned_subject: patch.orphaned_subject.unwrap_or_default(),
        orphaned_msg: patch.orphaned_msg.unwrap_or_default(),
        closed_subject: patch.closed_subject.unwrap_or_default(),
        closed_msg: patch.closed_msg.unwrap_or_default(),
    })
}

pub async fn run(store: Arc<dyn Store>, command: TenantCommand) -> anyhow::Result<i32> {
    match command {
        TenantCommand::Create(args) => {
            let cfg = match build_patch(&args).and_then(config_from_patch) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("{}", e);
                    return Ok(EXIT_INVALID);
                }
            };
            match store.create_tenant(&args.name, ACTOR_CLI, &cfg).await {
                Ok(()) => Ok(EXIT_OK),
                Err(e @ (StoreError::Duplicate(_) | StoreError::InvalidName(_))) => {
                    error!("{}", e);
                    Ok(EXIT_INVALID)
                }
                Err(e) => Err(e.into()),
            }
        }
        TenantCommand::Update(args) => {
            let patch = match build_patch(&args) {
                Ok(patch) => patch,
                Err(e) => {
                    error!("{}", e);
                    return Ok(EXIT_INVALID);
                }
            };
            match store.update_tenant(&args.name, ACTOR_CLI, &patch).await {
                Ok(()) => Ok(EXIT_OK),
                Err(StoreError::NotFound(name)) => {
                    error!("tenant {} not found", name);
                    Ok(EXIT_NOT_FOUND)
                }
                Err(e @ StoreError::Duplicate(_)) => {
                    error!("{}", e);
                    Ok(EXIT_INVALID)
                }
                Err(e) => Err(e.into()),
            }
        }
        TenantCommand::Show { name } => match store.get_tenant(&name).await? {
            Some(tenant) => {
                let mut doc = serde_json::to_value(&tenant)?;
                if let Some(map) = doc.as_object_mut() {
                    map.remove("logs");
                }
                println!("{}", serde_json::to_string_pretty(&doc)?);
                Ok(EXIT_OK)
            }
            None => {
                error!("tenant {} not found", name);
                Ok(EXIT_NOT_FOUND)
            }
        },
        TenantCommand::List => {
            let tenants = store
                .find_tenants(&Query::new(), Some("tenant_name"), false)
                .await?;
            for tenant in tenants {
                println!("{}: {} {}", tenant.tenant_name, tenant.status, tenant.created);
            }
            Ok(EXIT_OK)
        }
        TenantCommand::Delete { name } => match store.delete_tenant(&name).await {
            Ok(()) => Ok(EXIT_OK),
            Err(StoreError::NotFound(name)) => {
                error!("tenant {} not found", name);
                Ok(EXIT_NOT_FOUND)
            }
            Err(e) => Err(e.into()),
        },
    }
}

#[cfg(test)]
#[path = "./ctl_tests.rs"]
mod ctl_tests;
