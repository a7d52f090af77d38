use std::path::PathBuf;

use anyhow::Result;
use client_core::AppController;
use shared::domain::{AspectRatio, Resolution};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::report;

#[derive(Debug, PartialEq)]
enum ChatCommand {
    Send(String),
    Aspect(AspectRatio),
    Resolution(Resolution),
    History,
    Select(usize),
    Save(PathBuf),
    Quit,
    Invalid(String),
}

fn parse_line(line: &str) -> ChatCommand {
    let line = line.trim();
    let Some(command) = line.strip_prefix(':') else {
        return ChatCommand::Send(line.to_string());
    };
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(name, arg)| (name, arg.trim()))
        .unwrap_or((command, ""));

    match name {
        "aspect" => arg
            .parse()
            .map(ChatCommand::Aspect)
            .unwrap_or_else(|err| ChatCommand::Invalid(err.to_string())),
        "resolution" => arg
            .parse()
            .map(ChatCommand::Resolution)
            .unwrap_or_else(|err| ChatCommand::Invalid(err.to_string())),
        "history" => ChatCommand::History,
        "select" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => ChatCommand::Select(n),
            _ => ChatCommand::Invalid("usage: :select <n> (see :history)".into()),
        },
        "save" if arg.is_empty() => ChatCommand::Save(PathBuf::from(".")),
        "save" => ChatCommand::Save(PathBuf::from(arg)),
        "quit" | "q" | "exit" => ChatCommand::Quit,
        other => ChatCommand::Invalid(format!("unknown command :{other}")),
    }
}

pub async fn run(mut controller: AppController) -> Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    println!("Describe a change, or :aspect, :resolution, :history, :select n, :save [dir], :quit");
    if let Some(outcome) = controller.generate_initial().await {
        report::print_outcome(&controller, &outcome);
    }

    loop {
        stdout.write_all(b"you> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_line(&line) {
            ChatCommand::Send(text) => {
                let outcome = controller.send_message(&text).await;
                report::print_outcome(&controller, &outcome);
                if controller.state().needs_reauth {
                    controller.acknowledge_reauth();
                }
                controller.dismiss_modal();
            }
            ChatCommand::Aspect(ratio) => {
                controller.set_aspect_ratio(ratio);
                if controller.current_image().is_none() {
                    println!("aspect {ratio}: no image yet, send a message to generate one");
                } else {
                    println!("aspect {ratio}");
                }
            }
            ChatCommand::Resolution(resolution) => {
                controller.set_resolution(resolution);
                println!("resolution {resolution}");
            }
            ChatCommand::History => {
                for (n, item) in controller.state().history.iter().enumerate() {
                    println!(
                        "{:>2}. [{} {}] {}",
                        n + 1,
                        item.settings.aspect_ratio,
                        item.settings.resolution,
                        item.prompt
                    );
                }
            }
            ChatCommand::Select(n) => {
                let id = controller
                    .state()
                    .history
                    .get(n - 1)
                    .map(|item| item.id.clone());
                match id {
                    Some(id) if controller.select_history(&id) => {
                        let settings = controller.state().settings;
                        println!(
                            "restored #{n} ({} {})",
                            settings.aspect_ratio, settings.resolution
                        );
                    }
                    _ => eprintln!("no history entry #{n}"),
                }
            }
            ChatCommand::Save(dir) => match controller.save_current_image(&dir).await {
                Ok(Some(path)) => println!("saved {}", path.display()),
                Ok(None) => eprintln!("nothing to save for this aspect ratio yet"),
                Err(err) => eprintln!("{err}"),
            },
            ChatCommand::Quit => break,
            ChatCommand::Invalid(message) => eprintln!("{message}"),
        }
    }
    Ok(())
}
