//! `flowboard chat`: talk to the board assistant from the terminal.
//!
//! With a message, runs one exchange. Without one, opens a prompt loop that
//! keeps the conversation going until an empty line or `exit`.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};

use flowboard::client::cache::TaskCache;
use flowboard::client::consumer::ConsumerEvent;
use flowboard::client::http::HttpTaskStore;
use flowboard::client::session::{ChatSession, TOOL_REFRESH_DELAY};
use flowboard::config::BoardConfig;

use super::board::{connect, print_columns};

pub async fn cmd_chat(config: &BoardConfig, message: Option<String>) -> Result<()> {
    let cache = connect(config)?;
    cache.refresh().await?;
    let mut session = ChatSession::new(&config.server_url, config.require_token()?);

    if let Some(message) = message {
        return exchange(&mut session, &cache, &message).await;
    }

    println!("{}", style("Chat with your board (empty line or `exit` to quit)").dim());
    loop {
        let line: String = Input::new()
            .with_prompt(style("you").cyan().to_string())
            .allow_empty(true)
            .interact_text()
            .context("Failed to read input")?;
        let line = line.trim();
        if line.is_empty() || line == "exit" {
            break;
        }
        // A failed exchange is reported but does not end the conversation.
        if let Err(e) = exchange(&mut session, &cache, line).await {
            eprintln!("{} {}", style("✗").red(), e);
        }
    }
    Ok(())
}

async fn exchange(
    session: &mut ChatSession,
    cache: &TaskCache<HttpTaskStore>,
    text: &str,
) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let tasks = cache.summaries().await;
    let mut started = false;
    let result = session
        .send(text, &tasks, |event, _| {
            if let ConsumerEvent::Content(delta) = event {
                if !started {
                    spinner.finish_and_clear();
                    print!("{} ", style("assistant").green().bold());
                    started = true;
                }
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            }
        })
        .await;
    spinner.finish_and_clear();
    if started {
        println!();
    }

    let outcome = result?;
    if outcome.tool_activity {
        // The relay inserts before confirming; give the write a moment to land.
        cache.schedule_refresh(TOOL_REFRESH_DELAY).await?;
        print_columns(&cache.columns().await);
    }
    Ok(())
}
