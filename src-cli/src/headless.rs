//! Stdin-driven loops for browsing and chatting without a GUI.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use scout_core::{Coordinator, SendOptions};

use crate::commands::{ask, is_http_url};
use crate::error::CommandResult;

/// One line of browse input: `<url> [tab-id]`.
#[derive(Debug, PartialEq, Eq)]
pub struct Visit {
    pub url: String,
    pub tab_id: Option<String>,
}

pub fn parse_visit(line: &str) -> Option<Visit> {
    let mut parts = line.split_whitespace();
    let url = parts.next()?;
    if url.starts_with('#') {
        return None;
    }
    Some(Visit {
        url: url.to_string(),
        tab_id: parts.next().map(str::to_string),
    })
}

/// Shadow-index every URL read from stdin until EOF or Ctrl+C.
pub async fn browse(coordinator: &Coordinator) -> CommandResult<()> {
    coordinator.set_shadow_mode(true).await;
    info!("Reading visited URLs from stdin. Press Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            // Let the page being watched finish before exiting.
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = coordinator.watcher.wait_idle() => {}
            }
            break;
        };

        let Some(visit) = parse_visit(&line) else {
            continue;
        };
        if !is_http_url(&visit.url) {
            warn!("Skipping {:?}: not an http(s) URL", visit.url);
            continue;
        }
        coordinator.navigate(&visit.url, visit.tab_id).await;
    }

    info!("Shutting down...");
    Ok(())
}

/// Ask one question per stdin line until EOF.
pub async fn chat_loop(coordinator: &Coordinator, options: SendOptions) -> CommandResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        // A failed reply is already reported as a toast; keep the session going.
        if let Err(e) = ask(coordinator, text, options.clone()).await {
            warn!("Reply failed: {}", e);
        }
    }
    Ok(())
}
