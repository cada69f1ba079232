/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: handler.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-06 09:14:27
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-29 11:50:14
 */

use crate::addr::{normalize, normalize_list, normalize_one};
use crate::consts::*;
use crate::models::{format_ml_name, MlStatus, Tenant, TenantStatus};
use crate::outbound;
use crate::relay::Relay;
use crate::store::{Query, Store, StoreError};
use crate::template;
use log::{error, info, warn};
use mail_parser::{Address, Message, MessageParser};
use minijinja::context;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

/// The SMTP-ingestion state machine. One message at a time: classify the
/// intent, mutate list state through the store, and emit the outbound mail
/// through the relay. A `Some` reply is an SMTP rejection; `None` means an
/// implicit `250 OK`.
pub struct MailHandler {
    store: Arc<dyn Store>,
    relay: Relay,
    at_domain: String,
}

fn address_strings(address: Option<&Address<'_>>) -> Vec<String> {
    let mut out = Vec::new();
    match address {
        Some(Address::List(list)) => {
            for addr in list {
                if let Some(a) = &addr.address {
                    out.push(a.to_string());
                }
            }
        }
        Some(Address::Group(groups)) => {
            for group in groups {
                for addr in &group.addresses {
                    if let Some(a) = &addr.address {
                        out.push(a.to_string());
                    }
                }
            }
        }
        None => {}
    }
    out
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.iter().cloned().collect();
    v.sort();
    v
}

/// The command token: the decoded subject with any leading run of
/// `Re:` / `[ml_name]` / whitespace stripped, trimmed and lowercased.
fn command_token(subject: &str, ml_name: &str) -> String {
    outbound::strip_subject_prefixes(subject, ml_name)
        .trim()
        .to_lowercase()
}

/// Treat non-fatal store outcomes (uniqueness, missing records) as no-ops;
/// anything else aborts the current request.
fn soft<T>(result: Result<T, StoreError>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if !e.is_fatal() => {
            error!("store operation rejected: {}", e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl MailHandler {
    pub fn new(store: Arc<dyn Store>, relay: Relay, domain: &str) -> Self {
        Self {
            store,
            relay,
            at_domain: format!("@{domain}"),
        }
    }

    /// Process one accepted message. Returns the SMTP rejection text, or
    /// `None` for success. Store I/O failures bubble up as errors and
    /// abort the session task.
    pub async fn process_message(
        &self,
        envelope_from: &str,
        _envelope_rcpts: &[String],
        data: &[u8],
    ) -> anyhow::Result<Option<&'static str>> {
        let Some(message) = MessageParser::default().parse(data) else {
            warn!("unparseable message from {}", envelope_from);
            return Ok(Some(SMTP_STATUS_NO_ML_SPECIFIED));
        };

        let subject = message.subject().unwrap_or("").trim().to_string();
        let from = normalize(address_strings(message.from()));
        let mut to = normalize(address_strings(message.to()));
        let mut cc = normalize(address_strings(message.cc()));

        // The author identity comes from the message itself; the SMTP
        // envelope sender is only a fallback.
        let mailfrom = from
            .iter()
            .min()
            .cloned()
            .or_else(|| normalize_one(envelope_from))
            .unwrap_or_default();

        info!(
            "Processing: from={}|to={:?}|cc={:?}|subject={}|",
            mailfrom, to, cc, subject
        );

        // Identify the target list; exactly one recipient in our domain.
        let mls: Vec<String> = (&to | &cc)
            .into_iter()
            .filter(|a| a.ends_with(&self.at_domain))
            .collect();
        if mls.is_empty() {
            error!("No ML specified");
            return Ok(Some(SMTP_STATUS_NO_ML_SPECIFIED));
        } else if mls.len() > 1 {
            error!("Can't cross-post a message");
            return Ok(Some(SMTP_STATUS_CANT_CROSS_POST));
        }
        let ml_address = mls.into_iter().next().unwrap_or_default();
        let ml_name = ml_address[..ml_address.len() - self.at_domain.len()].to_string();
        to.remove(&ml_address);
        cc.remove(&ml_address);

        // A delivery-failure notification? Record it and stop: bounces are
        // never forwarded and never mutate membership.
        if let Some(stripped) = ml_name.strip_suffix(ERROR_SUFFIX) {
            let original = message
                .header("Original-Recipient")
                .and_then(|h| h.as_text())
                .unwrap_or("");
            let original = match Regex::new("(?i)rfc822;") {
                Ok(re) => re.replace_all(original, "").into_owned(),
                Err(_) => original.to_string(),
            };
            let failed = normalize_list(&original);
            if !failed.is_empty() && !stripped.is_empty() {
                error!("not delivered to {:?} for {}", failed, stripped);
                soft(self.store.log_post(stripped, &failed, &mailfrom).await)?;
            }
            return Ok(None);
        }

        let tenants = self
            .store
            .find_tenants(&Query::new().eq("status", TenantStatus::Enabled), None, false)
            .await?;

        // A mail to a seed address creates a fresh list whose initial
        // membership is everyone on the original mail except the admins.
        for tenant in &tenants {
            if ml_name != tenant.new_ml_account {
                continue;
            }
            let Some(n) = soft(self.store.increment_counter(&tenant.tenant_name).await)? else {
                return Ok(None);
            };
            let ml_name = format_ml_name(&tenant.ml_name_format, n);
            let ml_address = format!("{}{}", ml_name, self.at_domain);
            let members = &(&(&to | &cc) | &from) - &tenant.admins;
            if soft(
                self.store
                    .create_ml(&tenant.tenant_name, &ml_name, &subject, &members, &mailfrom)
                    .await,
            )?
            .is_none()
            {
                return Ok(None);
            }
            let params = context! {
                ml_name => &ml_name,
                ml_address => &ml_address,
                mailfrom => &mailfrom,
                members => sorted(&members),
            };
            self.send_templated(
                tenant,
                &ml_name,
                &message,
                &mailfrom,
                &cc,
                params,
                &tenant.welcome_msg,
                "Welcome.txt",
            )
            .await?;
            return Ok(None);
        }

        // Post to an existing list.
        let Some(ml) = self.store.get_ml(&ml_name).await? else {
            error!("No such ML: {}", ml_name);
            return Ok(Some(SMTP_STATUS_NO_SUCH_ML));
        };
        let Some(tenant) = tenants.iter().find(|t| t.tenant_name == ml.tenant_name) else {
            error!("No such tenant: {}", ml.tenant_name);
            return Ok(Some(SMTP_STATUS_NO_SUCH_TENANT));
        };

        let members = self.store.get_members(&ml_name).await?.unwrap_or_default();
        if !members.contains(&mailfrom) && !tenant.admins.contains(&mailfrom) {
            error!("Non-member post from {}", mailfrom);
            return Ok(Some(SMTP_STATUS_NOT_MEMBER));
        }

        let command = command_token(&subject, &ml_name);
        let new_ml_address = format!("{}{}", tenant.new_ml_account, self.at_domain);

        if ml.status == MlStatus::Closed {
            if command == "reopen" {
                let params = context! {
                    ml_name => &ml_name,
                    ml_address => &ml_address,
                    mailfrom => &mailfrom,
                    new_ml_address => &new_ml_address,
                    members => sorted(&members),
                };
                self.send_templated(
                    tenant,
                    &ml_name,
                    &message,
                    &mailfrom,
                    &cc,
                    params,
                    &tenant.reopen_msg,
                    "Reopen.txt",
                )
                .await?;
                soft(
                    self.store
                        .change_ml_status(&ml_name, MlStatus::Open, &mailfrom)
                        .await,
                )?;
                info!("reopened {} by {}", ml_name, mailfrom);
                return Ok(None);
            }
            error!("ML is closed: {}", ml_name);
            return Ok(Some(SMTP_STATUS_CLOSED_ML));
        }

        if command == "close" {
            let params = context! {
                ml_name => &ml_name,
                ml_address => &ml_address,
                mailfrom => &mailfrom,
                new_ml_address => &new_ml_address,
                members => sorted(&members),
            };
            self.send_templated(
                tenant,
                &ml_name,
                &message,
                &mailfrom,
                &cc,
                params,
                &tenant.goodbye_msg,
                "Goodbye.txt",
            )
            .await?;
            soft(
                self.store
                    .change_ml_status(&ml_name, MlStatus::Closed, &mailfrom)
                    .await,
            )?;
            info!("closed {} by {}", ml_name, mailfrom);
            return Ok(None);
        }

        // The first accepted post (or any post to an orphaned list) makes
        // the list open again.
        if ml.status != MlStatus::Open {
            soft(
                self.store
                    .change_ml_status(&ml_name, MlStatus::Open, &mailfrom)
                    .await,
            )?;
        }

        // Admin addresses never take part in membership changes.
        let cc = &cc - &tenant.admins;

        // An empty subject with Cc'd members removes them.
        if command.is_empty() {
            if !cc.is_empty() {
                let params = context! {
                    ml_name => &ml_name,
                    ml_address => &ml_address,
                    mailfrom => &mailfrom,
                    new_ml_address => &new_ml_address,
                    members => sorted(&(&members - &cc)),
                    cc => sorted(&cc),
                };
                self.send_templated(
                    tenant,
                    &ml_name,
                    &message,
                    &mailfrom,
                    &cc,
                    params,
                    &tenant.remove_msg,
                    "RemoveMembers.txt",
                )
                .await?;
                soft(self.store.del_members(&ml_name, &cc, &mailfrom).await)?;
                info!("removed {:?} from {}", cc, ml_name);
            }
            return Ok(None);
        }

        // Cc'd non-members become members.
        if !cc.is_empty() {
            soft(self.store.add_members(&ml_name, &cc, &mailfrom).await)?;
            info!("added {:?} into {}", cc, ml_name);
            let members = self.store.get_members(&ml_name).await?.unwrap_or_default();
            let params = context! {
                ml_name => &ml_name,
                ml_address => &ml_address,
                mailfrom => &mailfrom,
                new_ml_address => &new_ml_address,
                members => sorted(&members),
                cc => sorted(&cc),
            };
            self.send_templated(
                tenant,
                &ml_name,
                &message,
                &mailfrom,
                &cc,
                params,
                &tenant.add_msg,
                "AddMembers.txt",
            )
            .await?;
            return Ok(None);
        }

        // A plain post: attach the readme and fan out.
        let params = context! {
            ml_name => &ml_name,
            ml_address => &ml_address,
            mailfrom => &mailfrom,
            new_ml_address => &new_ml_address,
            members => sorted(&members),
        };
        self.send_templated(
            tenant,
            &ml_name,
            &message,
            &mailfrom,
            &cc,
            params,
            &tenant.readme_msg,
            "Readme.txt",
        )
        .await?;
        Ok(None)
    }

    /// Render the branch template, attach it when rendering succeeds, and
    /// fan the post out to the current membership plus the tenant admins.
    /// A template failure never blocks the post; a relay failure is logged
    /// and only suppresses the `post` log entry.
    #[allow(clippy::too_many_arguments)]
    async fn send_templated(
        &self,
        tenant: &Tenant,
        ml_name: &str,
        message: &Message<'_>,
        mailfrom: &str,
        cc: &HashSet<String>,
        params: minijinja::Value,
        template: &str,
        filename: &str,
    ) -> anyhow::Result<()> {
        let attachment = match template::render(template, params) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("{}; sending without {}", e, filename);
                None
            }
        };

        let recipients = &self.store.get_members(ml_name).await?.unwrap_or_default()
            | &tenant.admins;
        let bytes = match outbound::build_post(
            message,
            ml_name,
            &self.at_domain,
            &tenant.charset,
            cc,
            attachment.as_deref().map(|content| (content, filename)),
        ) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to format post for {}: {:?}", ml_name, e);
                return Ok(());
            }
        };

        let envelope_from = format!("{}{}{}", ml_name, ERROR_SUFFIX, self.at_domain);
        match self.relay.send(&envelope_from, &recipients, &bytes).await {
            Ok(()) => {
                info!(
                    "Sent: ml_name={}|mailfrom={}|members={:?}|",
                    ml_name, mailfrom, recipients
                );
                soft(self.store.log_post(ml_name, &recipients, mailfrom).await)?;
            }
            Err(e) => error!("relay failed for {}: {:?}", ml_name, e),
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "./handler_tests.rs"]
mod handler_tests;
