/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: reviewer.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-08 16:02:13
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-25 10:21:47
 */

use crate::consts::{ACTOR_REVIEWER, ERROR_SUFFIX};
use crate::models::{MailingList, MlStatus, Tenant, TenantStatus};
use crate::outbound;
use crate::relay::Relay;
use crate::store::{Cmp, Query, Store};
use crate::template;
use chrono::{Duration, Utc};
use log::{error, info};
use minijinja::context;
use std::sync::Arc;

/// Periodic lifecycle pass: advances `open -> orphaned` and
/// `orphaned -> closed` for lists idle longer than the tenant thresholds,
/// notifying the members before each transition. Re-running the pass
/// without an intervening post is a no-op.
pub struct Reviewer {
    store: Arc<dyn Store>,
    relay: Relay,
    at_domain: String,
}

impl Reviewer {
    pub fn new(store: Arc<dyn Store>, relay: Relay, domain: &str) -> Self {
        Self {
            store,
            relay,
            at_domain: format!("@{domain}"),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let tenants = self
            .store
            .find_tenants(&Query::new().eq("status", TenantStatus::Enabled), None, false)
            .await?;
        // Close first so a list orphaned in this very pass is not closed
        // by it as well.
        self.notify(&tenants, MlStatus::Orphaned, MlStatus::Closed)
            .await?;
        self.notify(&tenants, MlStatus::Open, MlStatus::Orphaned)
            .await?;
        Ok(())
    }

    async fn notify(
        &self,
        tenants: &[Tenant],
        old_status: MlStatus,
        new_status: MlStatus,
    ) -> anyhow::Result<()> {
        for tenant in tenants {
            let (days, subject, msg_template) = match new_status {
                MlStatus::Closed => (
                    tenant.days_to_close,
                    &tenant.closed_subject,
                    &tenant.closed_msg,
                ),
                MlStatus::Orphaned => (
                    tenant.days_to_orphan,
                    &tenant.orphaned_subject,
                    &tenant.orphaned_msg,
                ),
                _ => continue,
            };

            // One hour of grace on top of the configured threshold.
            let updated_after = Utc::now() - Duration::days(days as i64) + Duration::hours(1);
            let query = Query::new()
                .eq("tenant_name", &tenant.tenant_name)
                .eq("status", old_status)
                .cmp("updated", Cmp::Lte, updated_after);
            let mls = self.store.find_mls(&query, Some("updated"), false).await?;

            for ml in mls {
                if let Err(e) = self
                    .notify_one(tenant, &ml, subject, msg_template, new_status)
                    .await
                {
                    error!("notification failed for {}: {:?}", ml.ml_name, e);
                }
            }
        }
        Ok(())
    }

    async fn notify_one(
        &self,
        tenant: &Tenant,
        ml: &MailingList,
        subject: &str,
        msg_template: &str,
        new_status: MlStatus,
    ) -> anyhow::Result<()> {
        let ml_address = format!("{}{}", ml.ml_name, self.at_domain);
        let error_address = format!("{}{}{}", ml.ml_name, ERROR_SUFFIX, self.at_domain);
        let new_ml_address = format!("{}{}", tenant.new_ml_account, self.at_domain);
        let members = self
            .store
            .get_members(&ml.ml_name)
            .await?
            .unwrap_or_default();
        let recipients = &members | &tenant.admins;

        let params = context! {
            ml_name => &ml.ml_name,
            ml_address => &ml_address,
            new_ml_address => &new_ml_address,
            subject => ml.status.as_str(),
        };
        let content = template::render_or_empty(msg_template, params);
        let bytes = outbound::build_notice(
            &error_address,
            &[ml_address],
            subject,
            &content,
            &tenant.charset,
        )?;

        self.relay.send(&error_address, &recipients, &bytes).await?;
        info!(
            "Sent: ml_name={}|mailfrom={}|members={:?}|",
            ml.ml_name, error_address, recipients
        );
        self.store
            .log_post(&ml.ml_name, &recipients, ACTOR_REVIEWER)
            .await?;
        self.store
            .change_ml_status(&ml.ml_name, new_status, ACTOR_REVIEWER)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "./reviewer_tests.rs"]
mod reviewer_tests;
