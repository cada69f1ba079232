/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: testutil.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-06 10:02:19
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-26 20:41:50
 */

//! Shared fixtures for the scenario tests: a real document store on a
//! temp directory and a relay whose transport captures outbound mail.

use crate::config::RelayConfig;
use crate::handler::MailHandler;
use crate::models::TenantConfig;
use crate::relay::{MockMailer, MockMailerFactory, Relay};
use crate::store::FileStore;
use lettre::address::Envelope;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub const DOMAIN: &str = "ml.example.com";

/// Everything the capture relay has "sent": envelope plus raw bytes.
pub type Outbox = Arc<Mutex<Vec<(Envelope, Vec<u8>)>>>;

pub fn relay_config() -> RelayConfig {
    RelayConfig {
        host: "relay.test".to_string(),
        port: 25,
    }
}

/// A relay whose mailer records every send instead of speaking SMTP.
pub fn capture_relay() -> (Relay, Outbox) {
    let outbox: Outbox = Arc::new(Mutex::new(Vec::new()));
    let captured = outbox.clone();
    let mut factory = MockMailerFactory::new();
    factory.expect_create().returning(move |_| {
        let captured = captured.clone();
        let mut mailer = MockMailer::new();
        mailer.expect_send().returning(move |envelope, message| {
            captured.lock().unwrap().push((envelope, message.to_vec()));
            Ok(())
        });
        Ok(Box::new(mailer))
    });
    (
        Relay::new_with_factory(relay_config(), Arc::new(factory)),
        outbox,
    )
}

/// A relay whose every send fails.
pub fn failing_relay() -> Relay {
    let mut factory = MockMailerFactory::new();
    factory.expect_create().returning(|_| {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .returning(|_, _| Err(anyhow::anyhow!("connection refused")));
        Ok(Box::new(mailer))
    });
    Relay::new_with_factory(relay_config(), Arc::new(factory))
}

pub struct TestEnv {
    pub store: Arc<FileStore>,
    pub handler: Arc<MailHandler>,
    pub outbox: Outbox,
    _tmp: tempfile::TempDir,
}

pub fn test_env() -> TestEnv {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(tmp.path().to_str().unwrap(), "amane").unwrap());
    let (relay, outbox) = capture_relay();
    let handler = Arc::new(MailHandler::new(store.clone(), relay, DOMAIN));
    TestEnv {
        store,
        handler,
        outbox,
        _tmp: tmp,
    }
}

pub fn members(addrs: &[&str]) -> HashSet<String> {
    addrs.iter().map(|a| a.to_string()).collect()
}

/// Tenant fixture with small templates exercising every variable the
/// rendering vocabulary exposes.
pub fn tenant_config(new_ml_account: &str) -> TenantConfig {
    TenantConfig {
        admins: members(&["admin@example.net"]),
        charset: "utf-8".to_string(),
        ml_name_format: "ml-%06d".to_string(),
        new_ml_account: new_ml_account.to_string(),
        days_to_orphan: 7,
        days_to_close: 7,
        welcome_msg: "Welcome to {{ ml_name }}.\n{% for m in members %}{{ m }}\n{% endfor %}"
            .to_string(),
        readme_msg: "Post to {{ ml_address }}.".to_string(),
        add_msg: "Added {% for c in cc %}{{ c }} {% endfor %}to {{ ml_name }}.".to_string(),
        remove_msg: "Removed {% for c in cc %}{{ c }} {% endfor %}from {{ ml_name }}.".to_string(),
        reopen_msg: "{{ ml_name }} is open again.".to_string(),
        goodbye_msg: "{{ ml_name }} is closing.".to_string(),
        report_subject: "Weekly report".to_string(),
        report_msg: "new:{% for ml in new %} {{ ml.ml_name }}{% endfor %}\n\
open:{% for ml in open %} {{ ml.ml_name }}{% endfor %}\n\
orphaned:{% for ml in orphaned %} {{ ml.ml_name }}{% endfor %}\n\
closed:{% for ml in closed %} {{ ml.ml_name }}{% endfor %}\n"
            .to_string(),
        orphaned_subject: "ML orphaned".to_string(),
        orphaned_msg: "{{ ml_name }} became {{ subject }}.".to_string(),
        closed_subject: "ML closed".to_string(),
        closed_msg: "{{ ml_name }} was {{ subject }} and is now closed.".to_string(),
    }
}

/// Raw RFC 5322 bytes for a simple test post.
pub fn message(from: &str, to: &str, cc: Option<&str>, subject: &str) -> Vec<u8> {
    let mut raw = format!("From: {from}\r\nTo: {to}\r\n");
    if let Some(cc) = cc {
        raw.push_str(&format!("Cc: {cc}\r\n"));
    }
    raw.push_str(&format!(
        "Subject: {subject}\r\nMessage-ID: <test@local>\r\n\r\nHello there.\r\n"
    ));
    raw.into_bytes()
}

pub fn envelope_recipients(envelope: &Envelope) -> HashSet<String> {
    envelope.to().iter().map(|a| a.to_string()).collect()
}
