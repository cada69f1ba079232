/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: handler_tests.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-06 11:29:50
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-27 15:12:36
 */

use crate::consts::*;
use crate::handler::MailHandler;
use crate::models::{LogOp, MlStatus, TenantPatch, TenantStatus};
use crate::store::{FileStore, Store};
use crate::testutil::{
    envelope_recipients, failing_relay, members, message, tenant_config, test_env, TestEnv, DOMAIN,
};
use std::sync::Arc;

async fn with_tenant() -> TestEnv {
    let env = test_env();
    env.store
        .create_tenant("tenant1", "CLI", &tenant_config("new"))
        .await
        .unwrap();
    env
}

/// Mail the seed address once so `ml-000001` exists with the author as its
/// sole member.
async fn with_list(env: &TestEnv) {
    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[format!("new@{DOMAIN}")],
            &message("a@example.org", &format!("new@{DOMAIN}"), None, "Hello"),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);
    env.outbox.lock().unwrap().clear();
}

#[tokio::test]
async fn test_no_ml_specified() {
    let env = with_tenant().await;
    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", "someone@elsewhere.org", None, "hi"),
        )
        .await
        .unwrap();
    assert_eq!(reply, Some(SMTP_STATUS_NO_ML_SPECIFIED));
    assert!(env.outbox.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cross_post_rejected() {
    let env = with_tenant().await;
    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message(
                "a@example.org",
                &format!("ml-1@{DOMAIN}, ml-2@{DOMAIN}"),
                None,
                "hi",
            ),
        )
        .await
        .unwrap();
    assert_eq!(reply, Some(SMTP_STATUS_CANT_CROSS_POST));
    assert!(env.outbox.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_seed_mail_creates_list() {
    let env = with_tenant().await;
    let reply = env
        .handler
        .process_message(
            "envelope@example.org",
            &[format!("new@{DOMAIN}")],
            &message("a@example.org", &format!("new@{DOMAIN}"), None, "Hello"),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);

    let ml = env.store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(ml.status, MlStatus::New);
    assert_eq!(ml.subject, "Hello");
    assert_eq!(ml.members, members(&["a@example.org"]));
    assert_eq!(ml.by, "a@example.org");

    let outbox = env.outbox.lock().unwrap();
    assert_eq!(outbox.len(), 1);
    let (envelope, bytes) = &outbox[0];
    assert_eq!(
        envelope.from().map(|a| a.to_string()),
        Some(format!("ml-000001-error@{DOMAIN}"))
    );
    assert_eq!(
        envelope_recipients(envelope),
        members(&["a@example.org", "admin@example.net"])
    );
    let text = String::from_utf8_lossy(bytes);
    assert!(text.starts_with(&format!("Return-Path: <ml-000001-error@{DOMAIN}>\r\n")));
    assert!(text.contains("Subject: [ml-000001] Hello"));
    assert!(text.contains(&format!("To: ml-000001@{DOMAIN}")));
    assert!(text.contains("name=\"Welcome.txt\""));
    assert!(text.contains("Welcome to ml-000001."));
}

#[tokio::test]
async fn test_seed_mail_never_enrolls_admins() {
    let env = with_tenant().await;
    env.handler
        .process_message(
            "a@example.org",
            &[],
            &message(
                "a@example.org",
                &format!("new@{DOMAIN}, admin@example.net"),
                Some("b@example.org"),
                "Hello",
            ),
        )
        .await
        .unwrap();
    let ml = env.store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(ml.members, members(&["a@example.org", "b@example.org"]));
}

#[tokio::test]
async fn test_plain_post_fans_out_and_opens() {
    let env = with_tenant().await;
    with_list(&env).await;

    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", &format!("ml-000001@{DOMAIN}"), None, "About that"),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);

    let ml = env.store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(ml.status, MlStatus::Open);
    assert_eq!(ml.logs.last().unwrap().op, LogOp::Post);

    let outbox = env.outbox.lock().unwrap();
    assert_eq!(outbox.len(), 1);
    let text = String::from_utf8_lossy(&outbox[0].1);
    assert!(text.contains("Subject: [ml-000001] About that"));
    assert!(text.contains("name=\"Readme.txt\""));
    assert!(text.contains("Hello there."));
}

#[tokio::test]
async fn test_no_such_ml() {
    let env = with_tenant().await;
    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", &format!("ml-999999@{DOMAIN}"), None, "hi"),
        )
        .await
        .unwrap();
    assert_eq!(reply, Some(SMTP_STATUS_NO_SUCH_ML));
}

#[tokio::test]
async fn test_disabled_tenant_rejected() {
    let env = with_tenant().await;
    with_list(&env).await;
    env.store
        .update_tenant(
            "tenant1",
            "CLI",
            &TenantPatch {
                status: Some(TenantStatus::Disabled),
                ..TenantPatch::default()
            },
        )
        .await
        .unwrap();

    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", &format!("ml-000001@{DOMAIN}"), None, "hi"),
        )
        .await
        .unwrap();
    assert_eq!(reply, Some(SMTP_STATUS_NO_SUCH_TENANT));
    assert!(env.outbox.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_non_member_rejected() {
    let env = with_tenant().await;
    with_list(&env).await;
    let reply = env
        .handler
        .process_message(
            "stranger@example.org",
            &[],
            &message("stranger@example.org", &format!("ml-000001@{DOMAIN}"), None, "hi"),
        )
        .await
        .unwrap();
    assert_eq!(reply, Some(SMTP_STATUS_NOT_MEMBER));
    assert!(env.outbox.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_admin_may_post_without_membership() {
    let env = with_tenant().await;
    with_list(&env).await;
    let reply = env
        .handler
        .process_message(
            "admin@example.net",
            &[],
            &message("admin@example.net", &format!("ml-000001@{DOMAIN}"), None, "ok"),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);
    let ml = env.store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(ml.members, members(&["a@example.org"]));
}

#[tokio::test]
async fn test_add_members_via_cc() {
    let env = with_tenant().await;
    with_list(&env).await;

    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message(
                "a@example.org",
                &format!("ml-000001@{DOMAIN}"),
                Some("b@example.org"),
                "hi",
            ),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);

    let got = env.store.get_members("ml-000001").await.unwrap().unwrap();
    assert_eq!(got, members(&["a@example.org", "b@example.org"]));

    let outbox = env.outbox.lock().unwrap();
    assert_eq!(outbox.len(), 1);
    let (envelope, bytes) = &outbox[0];
    // The new member receives the add notice too.
    assert_eq!(
        envelope_recipients(envelope),
        members(&["a@example.org", "b@example.org", "admin@example.net"])
    );
    let text = String::from_utf8_lossy(bytes);
    assert!(text.contains("name=\"AddMembers.txt\""));
    assert!(text.contains("Added b@example.org"));
}

#[tokio::test]
async fn test_admins_in_cc_are_not_added() {
    let env = with_tenant().await;
    with_list(&env).await;
    env.handler
        .process_message(
            "a@example.org",
            &[],
            &message(
                "a@example.org",
                &format!("ml-000001@{DOMAIN}"),
                Some("admin@example.net"),
                "hi",
            ),
        )
        .await
        .unwrap();
    let got = env.store.get_members("ml-000001").await.unwrap().unwrap();
    assert_eq!(got, members(&["a@example.org"]));
    // With the admin stripped the Cc set is empty, so this was a plain post.
    let outbox = env.outbox.lock().unwrap();
    let text = String::from_utf8_lossy(&outbox[0].1);
    assert!(text.contains("name=\"Readme.txt\""));
}

#[tokio::test]
async fn test_remove_members_via_empty_subject() {
    let env = with_tenant().await;
    env.handler
        .process_message(
            "a@example.org",
            &[],
            &message(
                "a@example.org",
                &format!("new@{DOMAIN}"),
                Some("c@example.org"),
                "Hello",
            ),
        )
        .await
        .unwrap();
    env.outbox.lock().unwrap().clear();

    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message(
                "a@example.org",
                &format!("ml-000001@{DOMAIN}"),
                Some("c@example.org"),
                "",
            ),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);

    let got = env.store.get_members("ml-000001").await.unwrap().unwrap();
    assert_eq!(got, members(&["a@example.org"]));

    let outbox = env.outbox.lock().unwrap();
    assert_eq!(outbox.len(), 1);
    let (envelope, bytes) = &outbox[0];
    // The notice itself still reaches the removed member.
    assert_eq!(
        envelope_recipients(envelope),
        members(&["a@example.org", "c@example.org", "admin@example.net"])
    );
    let text = String::from_utf8_lossy(bytes);
    assert!(text.contains("name=\"RemoveMembers.txt\""));
    assert!(text.contains("Removed c@example.org"));

    let logs = env.store.get_logs("ml-000001").await.unwrap().unwrap();
    assert_eq!(logs.last().unwrap().op, LogOp::DelMembers);
}

#[tokio::test]
async fn test_empty_subject_without_cc_is_noop() {
    let env = with_tenant().await;
    with_list(&env).await;
    let before = env.store.get_ml("ml-000001").await.unwrap().unwrap();

    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", &format!("ml-000001@{DOMAIN}"), None, ""),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);
    assert!(env.outbox.lock().unwrap().is_empty());
    let after = env.store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(after.members, before.members);
}

#[tokio::test]
async fn test_close_reject_reopen_cycle() {
    let env = with_tenant().await;
    with_list(&env).await;
    let ml_to = format!("ml-000001@{DOMAIN}");

    // Commands match case-insensitively.
    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", &ml_to, None, "CLOSE"),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);
    let ml = env.store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(ml.status, MlStatus::Closed);
    {
        let outbox = env.outbox.lock().unwrap();
        let text = String::from_utf8_lossy(&outbox[0].1);
        assert!(text.contains("name=\"Goodbye.txt\""));
    }
    env.outbox.lock().unwrap().clear();

    // Posts to a closed list bounce.
    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", &ml_to, None, "Anything"),
        )
        .await
        .unwrap();
    assert_eq!(reply, Some(SMTP_STATUS_CLOSED_ML));
    assert!(env.outbox.lock().unwrap().is_empty());

    // An explicit reopen brings it back, membership and subject intact.
    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", &ml_to, None, "reopen"),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);
    let ml = env.store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(ml.status, MlStatus::Open);
    assert_eq!(ml.members, members(&["a@example.org"]));
    assert_eq!(ml.subject, "Hello");
    let outbox = env.outbox.lock().unwrap();
    let text = String::from_utf8_lossy(&outbox[0].1);
    assert!(text.contains("name=\"Reopen.txt\""));
}

#[tokio::test]
async fn test_command_matches_after_prefix_stripping() {
    let env = with_tenant().await;
    with_list(&env).await;
    env.handler
        .process_message(
            "a@example.org",
            &[],
            &message(
                "a@example.org",
                &format!("ml-000001@{DOMAIN}"),
                None,
                "Re: [ml-000001]  Close",
            ),
        )
        .await
        .unwrap();
    let ml = env.store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(ml.status, MlStatus::Closed);
}

#[tokio::test]
async fn test_rfc2047_subject_is_decoded() {
    let env = with_tenant().await;
    with_list(&env).await;
    // "close" as a base64 encoded-word.
    env.handler
        .process_message(
            "a@example.org",
            &[],
            &message(
                "a@example.org",
                &format!("ml-000001@{DOMAIN}"),
                None,
                "=?utf-8?B?Y2xvc2U=?=",
            ),
        )
        .await
        .unwrap();
    let ml = env.store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(ml.status, MlStatus::Closed);
}

#[tokio::test]
async fn test_bounce_is_suppressed() {
    let env = with_tenant().await;
    with_list(&env).await;

    let raw = format!(
        "From: MAILER-DAEMON@relay.test\r\n\
To: ml-000001-error@{DOMAIN}\r\n\
Subject: Undelivered Mail Returned to Sender\r\n\
Original-Recipient: rfc822;b@example.org\r\n\
\r\n\
Delivery failed.\r\n"
    );
    let reply = env
        .handler
        .process_message("", &[], raw.as_bytes())
        .await
        .unwrap();
    assert_eq!(reply, None);

    assert!(env.outbox.lock().unwrap().is_empty());
    let got = env.store.get_members("ml-000001").await.unwrap().unwrap();
    assert_eq!(got, members(&["a@example.org"]));

    let logs = env.store.get_logs("ml-000001").await.unwrap().unwrap();
    let last = logs.last().unwrap();
    assert_eq!(last.op, LogOp::Post);
    assert_eq!(last.members, Some(vec!["b@example.org".to_string()]));
}

#[tokio::test]
async fn test_bounce_for_unknown_list_is_ignored() {
    let env = with_tenant().await;
    let raw = format!(
        "From: MAILER-DAEMON@relay.test\r\n\
To: ml-424242-error@{DOMAIN}\r\n\
Subject: bounce\r\n\
Original-Recipient: rfc822;b@example.org\r\n\
\r\n\
x\r\n"
    );
    let reply = env
        .handler
        .process_message("", &[], raw.as_bytes())
        .await
        .unwrap();
    assert_eq!(reply, None);
    assert!(env.outbox.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_relay_failure_keeps_state_change() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(tmp.path().to_str().unwrap(), "amane").unwrap());
    store
        .create_tenant("tenant1", "CLI", &tenant_config("new"))
        .await
        .unwrap();
    let handler = MailHandler::new(store.clone(), failing_relay(), DOMAIN);

    let reply = handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", &format!("new@{DOMAIN}"), None, "Hello"),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);

    // The list exists although the welcome mail never went out; only the
    // post log entry is missing.
    let ml = store.get_ml("ml-000001").await.unwrap().unwrap();
    assert_eq!(ml.members, members(&["a@example.org"]));
    let ops: Vec<LogOp> = ml.logs.iter().map(|l| l.op).collect();
    assert_eq!(ops, vec![LogOp::Create]);
}

#[tokio::test]
async fn test_broken_template_still_sends_post() {
    let env = with_tenant().await;
    env.store
        .update_tenant(
            "tenant1",
            "CLI",
            &TenantPatch {
                welcome_msg: Some("{% for broken".to_string()),
                ..TenantPatch::default()
            },
        )
        .await
        .unwrap();

    let reply = env
        .handler
        .process_message(
            "a@example.org",
            &[],
            &message("a@example.org", &format!("new@{DOMAIN}"), None, "Hello"),
        )
        .await
        .unwrap();
    assert_eq!(reply, None);

    let outbox = env.outbox.lock().unwrap();
    assert_eq!(outbox.len(), 1);
    let text = String::from_utf8_lossy(&outbox[0].1);
    assert!(!text.contains("Welcome.txt"));
    assert!(text.contains("Hello there."));
}

#[tokio::test]
async fn test_concurrent_seed_mails_get_distinct_names() {
    let env = with_tenant().await;
    let post = |i: usize| {
        let handler = env.handler.clone();
        async move {
            let from = format!("user{i}@example.org");
            handler
                .process_message(
                    &from,
                    &[],
                    &message(&from, &format!("new@{DOMAIN}"), None, "seed"),
                )
                .await
                .unwrap()
        }
    };
    let replies = tokio::join!(post(1), post(2), post(3), post(4), post(5));
    assert_eq!(replies, (None, None, None, None, None));

    for n in 1..=5 {
        let name = format!("ml-{n:06}");
        assert!(
            env.store.get_ml(&name).await.unwrap().is_some(),
            "missing {name}"
        );
    }
    assert_eq!(env.outbox.lock().unwrap().len(), 5);
}
