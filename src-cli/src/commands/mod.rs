//! Command handlers.

use std::sync::Arc;

use futures::StreamExt;
use tracing::info;

use scout_core::chat::{FileHistoryStore, HistoryStore};
use scout_core::{
    ChannelSink, Config, Coordinator, JobState, SendOptions, SendOutcome, Settings,
};

use crate::cli::{Cli, Command, HistoryAction, SettingsAction, SettingsUpdate};
use crate::error::{CommandError, CommandResult, ResultExt};
use crate::headless;
use crate::render::Printer;


/// Resolve configuration: defaults, then persisted settings, then flags.
pub fn load_config(cli: &Cli) -> (Config, Settings) {
    let mut config = match cli.data_dir {
        Some(ref dir) => Config::with_data_dir(dir),
        None => Config::load_or_default(),
    };
    let mut settings = Settings::load(&config.settings_file);
    if let Some(ref backend) = cli.backend {
        settings.backend_url = Some(backend.clone());
    }
    config.apply_settings(&settings);
    (config, settings)
}

pub async fn dispatch(cli: Cli) -> CommandResult<()> {
    let (config, settings) = load_config(&cli);
    info!("Data directory: {:?}", config.data_dir);

    match cli.command {
        Command::Settings { action } => return settings_command(&config, settings, action),
        Command::History { action } => return history_command(&config, action).await,
        _ => {}
    }

    let (sink, rx) = ChannelSink::new();
    let printer = Printer::spawn(rx, cli.json);
    let coordinator = Coordinator::new(config, &settings, Arc::new(sink))?;

    let result = match cli.command {
        Command::Crawl { url, query, detach } => crawl(&coordinator, url, query, detach).await,
        Command::Browse => headless::browse(&coordinator).await,
        Command::Chat {
            message,
            model,
            transport,
            conversation,
        } => {
            let options = SendOptions {
                model,
                transport: transport.into(),
            };
            chat(&coordinator, message, options, conversation).await
        }
        Command::Settings { .. } | Command::History { .. } => Ok(()),
    };

    coordinator.shutdown().await;
    drop(coordinator);
    printer.finish().await;
    result
}

pub fn is_http_url(url: &str) -> bool {
    let url = url.trim();
    ["http://", "https://"].iter().any(|scheme| {
        url.len() > scheme.len()
            && url
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

async fn crawl(
    coordinator: &Coordinator,
    url: Option<String>,
    query: Option<String>,
    detach: bool,
) -> CommandResult<()> {
    let mut updates = Box::pin(coordinator.registry.subscribe());

    let job_id = match (url, query) {
        (Some(url), _) => {
            if !is_http_url(&url) {
                return Err(CommandError::invalid_url(&url));
            }
            coordinator.crawl(&url).await?
        }
        (None, Some(query)) => coordinator.focused_crawl(&query).await?,
        (None, None) => return Err(CommandError::internal("Nothing to crawl")),
    };

    let Some(job_id) = job_id else {
        return Ok(());
    };
    if detach {
        println!("{}", job_id);
        return Ok(());
    }

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(job_id = %job_id, "Stopped following job");
            None
        }
        summary = async {
            while let Some(summary) = updates.next().await {
                if summary.job_id == job_id && summary.is_terminal() {
                    return Some(summary);
                }
            }
            None
        } => summary,
    };

    // The stream also ends when the fallback poller gave up.
    let summary = match finished {
        Some(summary) => summary,
        None => match coordinator.registry.get(&job_id).await {
            Some(summary) => summary,
            None => return Ok(()),
        },
    };

    match summary.state {
        JobState::Error => Err(CommandError::job_failed(job_id, summary.error.as_deref())),
        _ => Ok(()),
    }
}

async fn chat(
    coordinator: &Coordinator,
    message: Option<String>,
    options: SendOptions,
    conversation: Option<String>,
) -> CommandResult<()> {
    if let Some(id) = conversation {
        let store = FileHistoryStore::new(&coordinator.config.conversations_dir);
        let saved = store
            .load(&id)
            .await
            .storage_err()?
            .ok_or_else(CommandError::conversation_not_found)?;
        coordinator.chat.resume(saved).await;
    }

    match message {
        Some(text) => ask(coordinator, &text, options).await,
        None => headless::chat_loop(coordinator, options).await,
    }
}

/// Send one message; Ctrl+C cancels the reply instead of exiting.
pub(crate) async fn ask(
    coordinator: &Coordinator,
    text: &str,
    options: SendOptions,
) -> CommandResult<()> {
    let send = coordinator.send_message(text, options);
    tokio::pin!(send);

    let outcome = tokio::select! {
        outcome = &mut send => outcome,
        _ = tokio::signal::ctrl_c() => {
            coordinator.cancel_message().await;
            send.await
        }
    }?;

    if let SendOutcome::Cancelled(_) = outcome {
        info!("Reply cancelled");
    }
    Ok(())
}

fn settings_command(
    config: &Config,
    settings: Settings,
    action: SettingsAction,
) -> CommandResult<()> {
    let shown = match action {
        SettingsAction::Show => settings,
        SettingsAction::Set(update) => {
            // Flags like --backend are per-invocation; persist only what was asked for.
            let mut persisted = Settings::load(&config.settings_file);
            apply_update(&mut persisted, update)?;
            persisted.save(&config.settings_file).storage_err()?;
            info!("Settings saved to {:?}", config.settings_file);
            persisted
        }
    };
    let text = serde_json::to_string_pretty(&shown).internal_err()?;
    println!("{}", text);
    Ok(())
}

pub fn apply_update(settings: &mut Settings, update: SettingsUpdate) -> CommandResult<()> {
    if let Some(url) = update.backend_url {
        if !is_http_url(&url) {
            return Err(CommandError::invalid_url(&url));
        }
        settings.backend_url = Some(url);
    }
    if let Some(shadow_mode) = update.shadow_mode {
        settings.shadow_mode = shadow_mode;
    }
    if let Some(model) = update.model {
        settings.model = Some(model).filter(|m| !m.trim().is_empty());
    }
    if let Some(push) = update.push_transport {
        settings.push_transport = push;
    }
    if let Some(attempts) = update.poll_retry_attempts {
        settings.poll_retry_attempts = Some(attempts.max(1));
    }
    Ok(())
}

async fn history_command(config: &Config, action: HistoryAction) -> CommandResult<()> {
    let store = FileHistoryStore::new(&config.conversations_dir);
    match action {
        HistoryAction::List => {
            for summary in store.list().await.storage_err()? {
                println!("{}  {}  {}", summary.id, summary.updated_at, summary.title);
            }
        }
        HistoryAction::Show { id } => {
            let conversation = store
                .load(&id)
                .await
                .storage_err()?
                .ok_or_else(CommandError::conversation_not_found)?;
            println!("# {}", conversation.title);
            for message in conversation.messages {
                println!("\n{}:\n{}", message.role.as_str(), message.content);
            }
        }
    }
    Ok(())
}
