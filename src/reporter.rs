/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: reporter.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-09 10:44:56
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-25 11:03:29
 */

use crate::consts::REPORT_ERROR_RETURN;
use crate::models::{MailingList, MlStatus, Tenant, TenantStatus};
use crate::outbound;
use crate::relay::Relay;
use crate::store::{Cmp, Query, Store};
use crate::template;
use chrono::{Duration, Timelike, Utc};
use log::{debug, error};
use minijinja::context;
use std::collections::HashSet;
use std::sync::Arc;

/// Periodic digest pass: renders each enabled tenant's report template
/// against the current list population and mails it to the tenant admins.
pub struct Reporter {
    store: Arc<dyn Store>,
    relay: Relay,
    domain: String,
}

/// Reports are second-aligned; sub-second precision is noise there.
fn truncate_timestamps(mut ml: MailingList) -> MailingList {
    ml.created = ml.created.with_nanosecond(0).unwrap_or(ml.created);
    ml.updated = ml.updated.with_nanosecond(0).unwrap_or(ml.updated);
    ml
}

impl Reporter {
    pub fn new(store: Arc<dyn Store>, relay: Relay, domain: &str) -> Self {
        Self {
            store,
            relay,
            domain: domain.to_string(),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let tenants = self
            .store
            .find_tenants(&Query::new().eq("status", TenantStatus::Enabled), None, false)
            .await?;
        for tenant in tenants {
            if let Err(e) = self.report_tenant(&tenant).await {
                error!("report failed for {}: {:?}", tenant.tenant_name, e);
            }
        }
        Ok(())
    }

    async fn group(&self, status: MlStatus) -> anyhow::Result<Vec<MailingList>> {
        let mls = self
            .store
            .find_mls(&Query::new().eq("status", status), Some("updated"), false)
            .await?;
        Ok(mls.into_iter().map(truncate_timestamps).collect())
    }

    async fn report_tenant(&self, tenant: &Tenant) -> anyhow::Result<()> {
        let new = self.group(MlStatus::New).await?;
        let open = self.group(MlStatus::Open).await?;
        let orphaned = self.group(MlStatus::Orphaned).await?;
        let closed_after = Utc::now() - Duration::days(tenant.days_to_close as i64);
        let closed: Vec<MailingList> = self
            .store
            .find_mls(
                &Query::new()
                    .eq("status", MlStatus::Closed)
                    .cmp("updated", Cmp::Gt, closed_after),
                Some("updated"),
                false,
            )
            .await?
            .into_iter()
            .map(truncate_timestamps)
            .collect();

        let params = context! {
            new => new,
            open => open,
            orphaned => orphaned,
            closed => closed,
        };
        let content = template::render_or_empty(&tenant.report_msg, params);
        debug!("report for {}:\n{}", tenant.tenant_name, content);

        let from = format!("{}@{}", REPORT_ERROR_RETURN, self.domain);
        let mut admins: Vec<String> = tenant.admins.iter().cloned().collect();
        admins.sort();
        let bytes = outbound::build_notice(
            &from,
            &admins,
            &tenant.report_subject,
            &content,
            &tenant.charset,
        )?;
        let recipients: HashSet<String> = tenant.admins.clone();
        self.relay.send(&from, &recipients, &bytes).await?;
        debug!("sent a report mail for {}", tenant.tenant_name);
        Ok(())
    }
}

#[cfg(test)]
#[path = "./reporter_tests.rs"]
mod reporter_tests;
