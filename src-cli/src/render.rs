//! Terminal rendering of coordinator events.

use std::collections::HashMap;
use std::io::Write;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scout_core::chat::MessageRole;
use scout_core::{JobStatusSummary, Level, UiEvent};

fn level_label(level: Level) -> &'static str {
    match level {
        Level::Info => "info",
        Level::Success => "ok",
        Level::Warning => "warn",
        Level::Error => "error",
    }
}

/// Turns events into terminal text.
///
/// Assistant replies are printed incrementally as they stream in.
pub struct Renderer {
    json: bool,
    printed: HashMap<String, usize>,
}

impl Renderer {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            printed: HashMap::new(),
        }
    }

    pub fn render(&mut self, event: &UiEvent) -> Option<String> {
        if self.json {
            return serde_json::to_string(event).ok().map(|line| line + "\n");
        }

        match event {
            UiEvent::Toast(toast) => {
                let mut line = format!("[{}] {}", level_label(toast.level), toast.message);
                if let Some(ref trace_id) = toast.trace_id {
                    line.push_str(&format!(" (trace {})", trace_id));
                }
                Some(line + "\n")
            }
            UiEvent::Log(entry) => Some(format!(
                "{} {:<5} {}\n",
                entry.at.format("%H:%M:%S"),
                level_label(entry.level),
                entry.message
            )),
            UiEvent::JobUpdated { summary } => Some(job_line(summary) + "\n"),
            UiEvent::MessageUpdated { message } => {
                if message.role != MessageRole::Assistant {
                    return None;
                }
                let printed = self.printed.entry(message.id.clone()).or_insert(0);
                let mut out = String::new();
                if let Some(fresh) = message.content.get(*printed..) {
                    out.push_str(fresh);
                    *printed = message.content.len();
                }
                if !message.streaming {
                    if let Some(ref error) = message.error {
                        out.push_str(&format!("\n[error] {}", error));
                    }
                    out.push('\n');
                    self.printed.remove(&message.id);
                }
                (!out.is_empty()).then_some(out)
            }
        }
    }
}

fn job_line(summary: &JobStatusSummary) -> String {
    let mut line = format!(
        "{} {:<7} {:>3}% {}",
        summary.job_id,
        summary.state.as_str(),
        summary.progress,
        summary.phase
    );
    if summary.stats.pages_fetched > 0 || summary.stats.docs_indexed > 0 {
        line.push_str(&format!(
            " pages={} docs={}",
            summary.stats.pages_fetched, summary.stats.docs_indexed
        ));
    }
    if let Some(ref url) = summary.last_url {
        line.push_str(&format!(" {}", url));
    }
    if let Some(ref error) = summary.error {
        line.push_str(&format!(" ({})", error));
    }
    line
}

/// Background task writing events to stdout.
pub struct Printer {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Printer {
    pub fn spawn(mut rx: mpsc::UnboundedReceiver<UiEvent>, json: bool) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            let mut renderer = Renderer::new(json);
            loop {
                tokio::select! {
                    biased;
                    Some(event) = rx.recv() => write_out(renderer.render(&event)),
                    _ = token.cancelled() => {
                        while let Ok(event) = rx.try_recv() {
                            write_out(renderer.render(&event));
                        }
                        break;
                    }
                    else => break,
                }
            }
        });
        Self { stop, handle }
    }

    /// Print whatever is still queued, then stop.
    pub async fn finish(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Event printer stopped abnormally: {}", e);
        }
    }
}

fn write_out(text: Option<String>) {
    let Some(text) = text else {
        return;
    };
    let mut stdout = std::io::stdout().lock();
    // A closed stdout leaves nothing to report to.
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::chat::ChatMessage;
    use scout_core::{JobState, Toast};

    #[test]
    fn test_job_line() {
        let mut summary = JobStatusSummary::new("job-1", "Crawl x.com");
        summary.state = JobState::Running;
        summary.phase = "fetching".to_string();
        summary.progress = 48;
        summary.last_url = Some("https://x.com/a".to_string());

        let mut renderer = Renderer::new(false);
        let text = renderer
            .render(&UiEvent::JobUpdated { summary })
            .unwrap();
        assert_eq!(text, "job-1 running  48% fetching https://x.com/a\n");
    }

    #[test]
    fn test_toast_with_trace_id() {
        let toast = Toast::new(Level::Error, "Chat failed: overloaded")
            .with_trace_id(Some("t-1".to_string()));
        let mut renderer = Renderer::new(false);
        assert_eq!(
            renderer.render(&UiEvent::Toast(toast)).unwrap(),
            "[error] Chat failed: overloaded (trace t-1)\n"
        );
    }

    #[test]
    fn test_streamed_reply_printed_incrementally() {
        let mut renderer = Renderer::new(false);
        let mut message = ChatMessage::placeholder();
        assert!(renderer
            .render(&UiEvent::MessageUpdated {
                message: message.clone()
            })
            .is_none());

        message.content.push_str("Hello");
        let first = renderer.render(&UiEvent::MessageUpdated {
            message: message.clone(),
        });
        assert_eq!(first.as_deref(), Some("Hello"));

        message.content.push_str(" world");
        message.streaming = false;
        let last = renderer.render(&UiEvent::MessageUpdated { message });
        assert_eq!(last.as_deref(), Some(" world\n"));

        // User messages are not echoed.
        let user = ChatMessage::user("hi");
        assert!(renderer
            .render(&UiEvent::MessageUpdated { message: user })
            .is_none());
    }

    #[test]
    fn test_json_lines() {
        let mut renderer = Renderer::new(true);
        let text = renderer
            .render(&UiEvent::Toast(Toast::new(Level::Success, "Indexed: Example")))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["kind"], "toast");
        assert_eq!(value["level"], "success");
        assert_eq!(value["message"], "Indexed: Example");
    }
}
