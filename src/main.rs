/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: main.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 09:41:12
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-26 22:07:43
 */

mod addr;
mod config;
mod consts;
mod ctl;
mod handler;
mod models;
mod outbound;
mod relay;
mod reporter;
mod reviewer;
mod smtpd;
mod store;
mod template;
#[cfg(test)]
mod testutil;

use crate::config::AppConfig;
use crate::handler::MailHandler;
use crate::relay::Relay;
use crate::reporter::Reporter;
use crate::reviewer::Reviewer;
use crate::smtpd::SmtpServer;
use crate::store::FileStore;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::io::Write;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + 'static>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for w in &mut self.writers {
            let _ = w.write(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for w in &mut self.writers {
            let _ = w.flush();
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "AMANE_CONFIG_FILE")]
    config_file: Option<String>,

    /// Debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the SMTP ingress handler
    Serve,
    /// Run one reviewer pass over idle lists
    Review,
    /// Render and mail the per-tenant activity reports
    Report,
    /// Tenant operations
    #[command(subcommand)]
    Tenant(ctl::TenantCommand),
}

fn initialize_logger(config: &AppConfig, debug: bool) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::new();

    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    } else if let Some(level) = &config.log_level {
        builder.parse_filters(level);
    } else if let Ok(env_level) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env_level);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }

    if let Some(log_file) = &config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", log_file, e))?;

        let multi_writer = MultiWriter {
            writers: vec![Box::new(file), Box::new(std::io::stderr())],
        };
        builder.target(env_logger::Target::Pipe(Box::new(multi_writer)));
    }

    builder.init();
    Ok(())
}

async fn serve(config: &AppConfig, store: Arc<FileStore>) -> anyhow::Result<()> {
    let handler = Arc::new(MailHandler::new(
        store,
        Relay::new(config.relay()),
        &config.domain,
    ));
    let server = SmtpServer::new(handler, &config.domain);

    let listener = TcpListener::bind((config.listen_address.as_str(), config.listen_port)).await?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let server_task = tokio::spawn(async move { server.run(listener, shutdown_rx).await });

    match signal::ctrl_c().await {
        Ok(()) => warn!("Shutdown signal received (Ctrl+C). Stopping..."),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }
    let _ = shutdown_tx.send(());
    let _ = server_task.await?;

    info!("SMTP server stopped. Goodbye!");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config_file {
        Some(path) => AppConfig::new_from_file(path),
        None => AppConfig::new(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Failed to load config: {:?}", e);
        eprintln!(
            "Please create {} or point --config-file / AMANE_CONFIG_FILE at a configuration file.",
            config::DEFAULT_CONFIG_PATH
        );
        std::process::exit(1);
    });

    initialize_logger(&config, args.debug)?;

    // Store unavailability at startup is the one fatal condition.
    let store = Arc::new(FileStore::open(&config.db_url, &config.db_name)?);

    match args.command {
        Command::Serve => {
            info!("Starting amane on {}:{}", config.listen_address, config.listen_port);
            serve(&config, store).await
        }
        Command::Review => {
            Reviewer::new(store, Relay::new(config.relay()), &config.domain)
                .run()
                .await
        }
        Command::Report => {
            Reporter::new(store, Relay::new(config.relay()), &config.domain)
                .run()
                .await
        }
        Command::Tenant(command) => {
            let code = ctl::run(store, command).await?;
            std::process::exit(code);
        }
    }
}
