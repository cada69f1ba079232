/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: outbound.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-05 10:40:31
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-29 11:48:26
 */

use crate::consts::ERROR_SUFFIX;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Message as OutboundMessage, MultiPart, SinglePart};
use log::debug;
use mail_parser::{Address, Message, MimeHeaders};
use regex::Regex;
use std::collections::HashSet;

/// RFC 2047 B-encode a subject per the tenant's charset. Pure ASCII goes
/// out verbatim. UTF-8 payload bytes are the only ones we can produce, so
/// a charset whose bytes we cannot emit falls back to a `utf-8` label
/// rather than mislabeling the encoded word.
fn encode_subject(subject: &str, charset: &str) -> String {
    if subject.is_ascii() {
        return subject.to_string();
    }
    let label = if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        charset
    } else {
        debug!("cannot transcode subject into {}; labeling utf-8", charset);
        "utf-8"
    };
    format!("=?{}?B?{}?=", label, BASE64.encode(subject.as_bytes()))
}

/// Strip any leading run of `Re:` / `[ml_name]` / whitespace from a
/// subject, case-insensitively.
pub fn strip_subject_prefixes(subject: &str, ml_name: &str) -> String {
    let pattern = format!(r"(?i)^(re:|\[{}\]|\s)*", regex::escape(ml_name));
    match Regex::new(&pattern) {
        Ok(re) => re.replace(subject, "").into_owned(),
        Err(_) => subject.to_string(),
    }
}

/// Normalize an outbound subject to carry exactly one `[ml_name] ` prefix.
pub fn prefix_subject(subject: &str, ml_name: &str) -> String {
    format!("[{}] {}", ml_name, strip_subject_prefixes(subject, ml_name))
}

fn author_mailbox(message: &Message<'_>) -> Option<Mailbox> {
    let addr = match message.from()? {
        Address::List(list) => list.first()?,
        Address::Group(groups) => groups.first()?.addresses.first()?,
    };
    let address = addr.address.as_ref()?.parse().ok()?;
    let name = addr.name.as_ref().map(|n| n.to_string());
    Some(Mailbox::new(name, address))
}

fn octet_stream() -> anyhow::Result<ContentType> {
    ContentType::parse("application/octet-stream")
        .map_err(|e| anyhow::anyhow!("Invalid content type: {}", e))
}

/// Rebuild an incoming post for the list. The original `To`, `Reply-To`
/// and `Return-Path` are discarded: `To` and `Reply-To` become the list
/// address and `Return-Path` the bounce address, so delivery failures come
/// back to the `-error` endpoint. The subject carries a single `[ml_name]`
/// prefix and is encoded per the tenant's charset. The body is always
/// emitted as multipart so the rendered template can ride along as a
/// named text part.
pub fn build_post(
    message: &Message<'_>,
    ml_name: &str,
    at_domain: &str,
    charset: &str,
    cc: &HashSet<String>,
    attachment: Option<(&str, &str)>,
) -> anyhow::Result<Vec<u8>> {
    let ml_address = format!("{ml_name}{at_domain}");
    let error_address = format!("{ml_name}{ERROR_SUFFIX}{at_domain}");

    let from = match author_mailbox(message) {
        Some(mailbox) => mailbox,
        None => error_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bounce address: {}", e))?,
    };
    let list_mailbox: Mailbox = ml_address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid list address: {}", e))?;
    let subject = prefix_subject(message.subject().unwrap_or(""), ml_name);
    let mut builder = OutboundMessage::builder()
        .from(from)
        .to(list_mailbox.clone())
        .reply_to(list_mailbox)
        .subject(encode_subject(&subject, charset));
    let mut sorted_cc: Vec<&String> = cc.iter().collect();
    sorted_cc.sort();
    for address in sorted_cc {
        if let Ok(mailbox) = address.parse::<Mailbox>() {
            builder = builder.cc(mailbox);
        }
    }

    let text = message
        .body_text(0)
        .map(|t| t.to_string())
        .unwrap_or_default();
    let mut multipart = MultiPart::mixed()
        .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(text));
    if !message.html_body.is_empty() {
        if let Some(html) = message.body_html(0) {
            multipart = multipart.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html.to_string()),
            );
        }
    }
    for part in message.attachments() {
        let filename = part.attachment_name().unwrap_or("attachment").to_string();
        let declared = part.content_type().map(|ct| match ct.subtype() {
            Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
            None => ct.ctype().to_string(),
        });
        let content_type = match declared {
            Some(value) => ContentType::parse(&value).or_else(|_| octet_stream())?,
            None => octet_stream()?,
        };
        multipart = multipart
            .singlepart(Attachment::new(filename).body(part.contents().to_vec(), content_type));
    }
    if let Some((content, filename)) = attachment {
        let content_type =
            ContentType::parse(&format!("text/plain; charset=utf-8; name=\"{filename}\""))
                .or_else(|_| octet_stream())?;
        multipart = multipart.singlepart(
            SinglePart::builder()
                .header(content_type)
                .body(content.to_string()),
        );
    }

    let formatted = builder
        .multipart(multipart)
        .map_err(|e| anyhow::anyhow!("Failed to build post: {}", e))?
        .formatted();
    Ok(with_return_path(formatted, &error_address))
}

/// Build a standalone notice (reviewer / reporter). `To` and `Reply-To`
/// carry the given addresses, `From` and `Return-Path` the error address;
/// the subject is encoded per the tenant's charset.
pub fn build_notice(
    from_address: &str,
    to_addresses: &[String],
    subject: &str,
    body: &str,
    charset: &str,
) -> anyhow::Result<Vec<u8>> {
    let from: Mailbox = from_address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid sender address: {}", e))?;
    let mut builder = OutboundMessage::builder()
        .from(from)
        .subject(encode_subject(subject, charset));
    for address in to_addresses {
        let mailbox: Mailbox = address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid recipient address: {}", e))?;
        builder = builder.to(mailbox.clone()).reply_to(mailbox);
    }
    let content_type = ContentType::parse(&format!("text/plain; charset={charset}"))
        .or_else(|_| {
            ContentType::parse("text/plain; charset=utf-8")
                .map_err(|e| anyhow::anyhow!("Invalid content type: {}", e))
        })?;
    let formatted = builder
        .singlepart(
            SinglePart::builder()
                .header(content_type)
                .body(body.to_string()),
        )
        .map_err(|e| anyhow::anyhow!("Failed to build notice: {}", e))?
        .formatted();
    Ok(with_return_path(formatted, from_address))
}

fn with_return_path(message: Vec<u8>, error_address: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + error_address.len() + 18);
    out.extend_from_slice(b"Return-Path: <");
    out.extend_from_slice(error_address.as_bytes());
    out.extend_from_slice(b">\r\n");
    out.extend_from_slice(&message);
    out
}
