use anyhow::Result;
use cliclack::{input, spinner};
use console::style;
use parley::consumer::{ChatState, Consumer, Submission};
use parley::models::conversation::MAX_DISPLAYED_MESSAGES;
use parley::models::message::Role;
use std::io::{self, Write};
use std::sync::Arc;
use url::Url;

use super::render;

pub async fn run(endpoint: Url, token: Option<String>) -> Result<()> {
    let consumer = Arc::new(Consumer::new(endpoint, token));

    println!(
        "parley chat {}",
        style("- type \"exit\" to end the session, \"/history\" to show the transcript").dim()
    );
    println!();

    loop {
        let text: String = input("Message:").placeholder("").interact()?;
        match text.trim() {
            "" => continue,
            "exit" => break,
            "/history" => {
                print_history(&consumer.snapshot())?;
                continue;
            }
            _ => {}
        }

        match stream_reply(&consumer, text).await? {
            Submission::Failed(message) => {
                println!("\n{}", style(format!("Error: {}", message)).red().bold());
                consumer.dismiss_error();
            }
            Submission::Truncated => println!("\n{}", style("(reply ended early)").dim()),
            Submission::Completed | Submission::Ignored => println!(),
        }
        println!();
    }
    Ok(())
}

/// Submit `text` and print the reply as it streams in
async fn stream_reply(consumer: &Arc<Consumer>, text: String) -> Result<Submission> {
    let mut updates = consumer.subscribe();
    let mut task = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.submit(&text).await })
    };

    let spin = spinner();
    spin.start("awaiting reply");
    let mut spinning = true;
    let mut printed = 0;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if let Some(tail) = unprinted(&state, printed) {
                    if spinning {
                        spin.stop("");
                        spinning = false;
                    }
                    print!("{}", tail);
                    io::stdout().flush()?;
                    printed += tail.len();
                }
            }
            outcome = &mut task => {
                if spinning {
                    spin.stop("");
                }
                if let Some(tail) = unprinted(&consumer.snapshot(), printed) {
                    print!("{}", tail);
                }
                return Ok(outcome?);
            }
        }
    }

    Ok(task.await?)
}

/// Reply text that arrived since the last `printed` bytes were shown
fn unprinted(state: &ChatState, printed: usize) -> Option<String> {
    let last = state.conversation.last()?;
    if last.role != Role::Assistant || last.content.len() <= printed {
        return None;
    }
    last.content.get(printed..).map(String::from)
}

fn print_history(state: &ChatState) -> Result<()> {
    if state.conversation.is_display_truncated() {
        println!(
            "{}",
            style(format!(
                "Showing the last {} of {} messages",
                MAX_DISPLAYED_MESSAGES,
                state.conversation.len()
            ))
            .dim()
        );
    }

    for message in state.conversation.visible() {
        if message.content.is_empty() {
            continue;
        }
        match message.role {
            Role::User => println!("{} {}", style("you:").cyan().bold(), message.content),
            Role::Assistant => render(&message.content, "markdown")?,
            Role::System => println!("{} {}", style("system:").dim(), message.content),
        }
    }
    println!();
    Ok(())
}
