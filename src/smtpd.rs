/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: smtpd.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-07 11:05:52
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-26 21:14:29
 */

use crate::handler::MailHandler;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

// Hard cap on accepted message bodies.
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Ingress endpoint: accepts SMTP connections and feeds each accepted
/// message into the handler. One spawned task per connection; tasks are
/// independent except through the store.
pub struct SmtpServer {
    handler: Arc<MailHandler>,
    domain: String,
}

impl SmtpServer {
    pub fn new(handler: Arc<MailHandler>, domain: &str) -> Self {
        Self {
            handler,
            domain: domain.to_string(),
        }
    }

    pub async fn run(
        &self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        info!("SMTP server listening on {:?}", listener.local_addr()?);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("SMTP server received shutdown signal");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let handler = self.handler.clone();
                    let domain = self.domain.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, &domain, handler).await {
                            error!("session with {} aborted: {:?}", peer, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

fn extract_path(argument: &str) -> String {
    let argument = argument.trim();
    let argument = match (argument.find('<'), argument.find('>')) {
        (Some(start), Some(end)) if start < end => &argument[start + 1..end],
        _ => argument.split_whitespace().next().unwrap_or(""),
    };
    argument.trim().to_string()
}

/// Drive one SMTP session. Generic over the stream so tests can run it
/// through an in-memory duplex pipe. A handler error (store I/O) aborts
/// the session; the listener stays up.
pub async fn serve_connection<S>(
    stream: S,
    domain: &str,
    handler: Arc<MailHandler>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let mut mailfrom: Option<String> = None;
    let mut rcpts: Vec<String> = Vec::new();

    writer
        .write_all(format!("220 {domain} ESMTP amane\r\n").as_bytes())
        .await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let command = line.trim_end_matches(['\r', '\n']);
        let upper = command.to_ascii_uppercase();

        let reply: String = if upper.starts_with("HELO") || upper.starts_with("EHLO") {
            mailfrom = None;
            rcpts.clear();
            format!("250 {domain}\r\n")
        } else if let Some(argument) = strip_verb(command, "MAIL FROM:") {
            mailfrom = Some(extract_path(argument));
            rcpts.clear();
            "250 OK\r\n".to_string()
        } else if let Some(argument) = strip_verb(command, "RCPT TO:") {
            if mailfrom.is_none() {
                "503 Error: need MAIL command\r\n".to_string()
            } else {
                rcpts.push(extract_path(argument));
                "250 OK\r\n".to_string()
            }
        } else if upper == "DATA" {
            if rcpts.is_empty() {
                "503 Error: need RCPT command\r\n".to_string()
            } else {
                writer
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;
                match read_data(&mut reader).await? {
                    Some(data) => {
                        let envelope_from = mailfrom.take().unwrap_or_default();
                        let result = handler
                            .process_message(&envelope_from, &rcpts, &data)
                            .await;
                        rcpts.clear();
                        match result {
                            Ok(None) => "250 OK\r\n".to_string(),
                            Ok(Some(status)) => format!("{status}\r\n"),
                            Err(e) => {
                                error!("message processing aborted: {:?}", e);
                                writer
                                    .write_all(b"451 Internal error in processing\r\n")
                                    .await?;
                                return Err(e);
                            }
                        }
                    }
                    None => {
                        warn!("oversized message dropped");
                        mailfrom = None;
                        rcpts.clear();
                        "552 Message exceeds maximum size\r\n".to_string()
                    }
                }
            }
        } else if upper == "RSET" {
            mailfrom = None;
            rcpts.clear();
            "250 OK\r\n".to_string()
        } else if upper == "NOOP" {
            "250 OK\r\n".to_string()
        } else if upper == "QUIT" {
            writer.write_all(b"221 Bye\r\n").await?;
            break;
        } else {
            "502 Command not implemented\r\n".to_string()
        };

        writer.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}

fn strip_verb<'a>(command: &'a str, verb: &str) -> Option<&'a str> {
    let head = command.get(..verb.len())?;
    head.eq_ignore_ascii_case(verb)
        .then(|| &command[verb.len()..])
}

/// Read a dot-terminated DATA body, undoing dot-stuffing. Returns `None`
/// when the message exceeds the size cap (the rest is drained so the
/// session can continue).
async fn read_data<R>(reader: &mut R) -> anyhow::Result<Option<Vec<u8>>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut data: Vec<u8> = Vec::new();
    let mut oversized = false;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "." {
            break;
        }
        if oversized {
            continue;
        }
        let unstuffed = trimmed.strip_prefix('.').unwrap_or(trimmed);
        data.extend_from_slice(unstuffed.as_bytes());
        data.extend_from_slice(b"\r\n");
        if data.len() > MAX_MESSAGE_SIZE {
            oversized = true;
        }
    }
    Ok(if oversized { None } else { Some(data) })
}

#[cfg(test)]
#[path = "./smtpd_tests.rs"]
mod smtpd_tests;
