/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: relay.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-03 17:12:09
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-22 13:48:54
 */

use crate::config::RelayConfig;
use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, envelope: Envelope, message: &[u8]) -> anyhow::Result<()>;
}

struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, envelope: Envelope, message: &[u8]) -> anyhow::Result<()> {
        self.transport
            .send_raw(&envelope, message)
            .await
            .map_err(|e| anyhow::anyhow!("SMTP send failed: {}", e))?;
        Ok(())
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait MailerFactory: Send + Sync {
    fn create(&self, config: &RelayConfig) -> anyhow::Result<Box<dyn Mailer>>;
}

pub struct SmtpMailerFactory;

impl MailerFactory for SmtpMailerFactory {
    fn create(&self, config: &RelayConfig) -> anyhow::Result<Box<dyn Mailer>> {
        // The upstream relay speaks plain unauthenticated SMTP.
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .build();
        Ok(Box::new(SmtpMailer { transport }))
    }
}

/// Shared outbound relay handle. The transport is created lazily on first
/// send and reused for the lifetime of the process.
pub struct Relay {
    config: RelayConfig,
    factory: Arc<dyn MailerFactory>,
    mailer: OnceCell<Box<dyn Mailer>>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            factory: Arc::new(SmtpMailerFactory),
            mailer: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub fn new_with_factory(config: RelayConfig, factory: Arc<dyn MailerFactory>) -> Self {
        Self {
            config,
            factory,
            mailer: OnceCell::new(),
        }
    }

    /// Transmit raw message bytes with an explicit envelope.
    pub async fn send(
        &self,
        envelope_from: &str,
        recipients: &HashSet<String>,
        message: &[u8],
    ) -> anyhow::Result<()> {
        let mailer = self
            .mailer
            .get_or_try_init(|| async { self.factory.create(&self.config) })
            .await?;

        let envelope = build_envelope(envelope_from, recipients)?;
        mailer.send(envelope, message).await
    }
}

fn build_envelope(envelope_from: &str, recipients: &HashSet<String>) -> anyhow::Result<Envelope> {
    let sender = envelope_from
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid envelope sender {}: {}", envelope_from, e))?;
    let rcpts: Vec<lettre::Address> = recipients.iter().filter_map(|r| r.parse().ok()).collect();
    if rcpts.is_empty() {
        return Err(anyhow::anyhow!("No valid recipients"));
    }
    Envelope::new(Some(sender), rcpts).map_err(|e| anyhow::anyhow!("Invalid envelope: {}", e))
}

#[cfg(test)]
#[path = "./relay_tests.rs"]
mod relay_tests;
