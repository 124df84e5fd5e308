// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// ferry-chat: send one prompt through a ferry relay and print the reply as
// it streams in.
//
// Usage:
//   ferry-chat --credentials ~/.ferry/credentials.json "hello"
//   FERRY_ID_TOKEN=... FERRY_ACCESS_TOKEN=... ferry-chat "hello"

use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ferry::client::{
    CredentialProvider, Credentials, FileCredentials, RetryPolicy, Role, SendPhase,
    StaticCredentials, StreamConsumer,
};

#[derive(Parser)]
#[command(name = "ferry-chat", about = "Stream one chat reply through a ferry relay.")]
struct Cli {
    /// Prompt to send.
    prompt: String,

    /// Base URL of the relay.
    #[arg(long, default_value = "http://127.0.0.1:9810", env = "FERRY_SERVER")]
    server: String,

    /// JSON file holding {"idToken": ..., "accessToken": ...}; re-read
    /// before every attempt.
    #[arg(long, value_name = "FILE", env = "FERRY_CREDENTIALS")]
    credentials: Option<String>,

    /// Identity token, when no credentials file is given.
    #[arg(long, env = "FERRY_ID_TOKEN", hide_env_values = true)]
    id_token: Option<String>,

    /// Access token, when no credentials file is given.
    #[arg(long, env = "FERRY_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Retries after the first attempt.
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Base backoff delay in milliseconds; doubles on each retry.
    #[arg(long, default_value_t = 500)]
    retry_delay_ms: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let provider: Arc<dyn CredentialProvider> = match (&cli.credentials, &cli.id_token, &cli.access_token) {
        (Some(path), _, _) => Arc::new(FileCredentials::new(path)),
        (None, Some(id), Some(access)) => {
            Arc::new(StaticCredentials::new(Credentials::new(id, access)))
        }
        _ => {
            tracing::error!("no credentials: pass --credentials or both --id-token and --access-token");
            std::process::exit(2);
        }
    };

    let retry = RetryPolicy {
        max_retries: cli.retries,
        base_delay: Duration::from_millis(cli.retry_delay_ms),
    };
    let consumer = match StreamConsumer::new(&cli.server, provider, retry) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(2);
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // Print only the part of the reply not yet shown.
    let mut view = consumer.store().subscribe();
    let printer = tokio::spawn(async move {
        let mut shown = 0;
        let mut stdout = std::io::stdout();
        while view.changed().await.is_ok() {
            let snapshot = view.borrow_and_update().clone();
            if let Some(reply) = snapshot
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant && !m.is_error)
            {
                if reply.text.len() > shown {
                    let _ = write!(stdout, "{}", &reply.text[shown..]);
                    let _ = stdout.flush();
                    shown = reply.text.len();
                }
            }
            if let SendPhase::Retrying { attempt, delay } = &snapshot.phase {
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
            }
            if snapshot.phase.is_terminal() {
                break;
            }
        }
        if shown > 0 {
            println!();
        }
    });

    let report = consumer.send_cancellable(&cli.prompt, cancel).await;
    let _ = printer.await;

    match report.phase() {
        SendPhase::Completed => {}
        SendPhase::Cancelled => std::process::exit(130),
        SendPhase::Failed(reason) => {
            tracing::error!(attempts = report.attempts, "{reason}");
            std::process::exit(1);
        }
        other => {
            tracing::error!(phase = ?other, "send ended in a non-terminal phase");
            std::process::exit(1);
        }
    }
}
