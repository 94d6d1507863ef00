//! Interactive chat REPL
//!
//! Readline input with history plus a few slash commands. Each line is one
//! assistant turn.

use std::path::PathBuf;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::assistant::Assistant;
use crate::commands::{
    print_dispatch_error, spinner, GlobalOpts, Runtime, BLUE, BOLD, DIM, GREEN, RESET, YELLOW,
};

const CYAN: &str = "\x1b[96m";
const MAGENTA: &str = "\x1b[95m";

/// What a slash command asks the loop to do
#[derive(Debug, PartialEq, Eq)]
enum SlashCommand {
    Help,
    Restart,
    Plugins,
    Exit,
    Unknown(String),
}

impl SlashCommand {
    fn parse(input: &str) -> Self {
        let cmd = input.split_whitespace().next().unwrap_or("").to_lowercase();
        match cmd.as_str() {
            "/help" | "/h" | "/?" => SlashCommand::Help,
            "/restart" | "/reset" => SlashCommand::Restart,
            "/plugins" => SlashCommand::Plugins,
            "/exit" | "/quit" | "/q" => SlashCommand::Exit,
            _ => SlashCommand::Unknown(cmd),
        }
    }
}

fn history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("capsule").join("history.txt"))
}

/// Run the interactive REPL
pub async fn run(opts: &GlobalOpts) -> Result<()> {
    let runtime = Runtime::bootstrap(opts).await?;
    let assistant = runtime.assistant();

    print_welcome(&runtime);
    restart(&assistant).await;

    let mut rl = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    loop {
        let prompt = format!("{}you>{} ", CYAN, RESET);

        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if line.starts_with('/') {
                    match SlashCommand::parse(line) {
                        SlashCommand::Help => print_help(),
                        SlashCommand::Restart => restart(&assistant).await,
                        SlashCommand::Plugins => print_plugins(&assistant),
                        SlashCommand::Exit => {
                            println!("{}Goodbye!{}", DIM, RESET);
                            break;
                        }
                        SlashCommand::Unknown(cmd) => {
                            eprintln!("{}Unknown command:{} {} (try /help)", YELLOW, RESET, cmd);
                        }
                    }
                    continue;
                }

                send_message(&assistant, line).await;
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}^C{}", DIM, RESET);
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("{}Goodbye!{}", DIM, RESET);
                break;
            }
            Err(e) => {
                eprintln!("{}Error:{} {}", YELLOW, RESET, e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = rl.save_history(path);
    }

    Ok(())
}

async fn send_message(assistant: &Assistant, text: &str) {
    let pb = spinner("Thinking...");
    let result = assistant.message(text).await;
    pb.finish_and_clear();

    match result {
        Ok(answer) => print_answer(&answer),
        Err(e) => print_dispatch_error(&e),
    }
}

async fn restart(assistant: &Assistant) {
    let pb = spinner("Starting a new conversation...");
    let result = assistant.reset().await;
    pb.finish_and_clear();

    match result {
        Ok(ack) => print_answer(&ack),
        Err(e) => print_dispatch_error(&e),
    }
}

fn print_answer(text: &str) {
    println!("{}capsule:{} {}", MAGENTA, RESET, text);
    println!();
}

fn print_plugins(assistant: &Assistant) {
    for (id, description) in assistant.registry().list() {
        println!("  {}{}{} - {}", BLUE, id, RESET, description);
    }
}

fn print_welcome(runtime: &Runtime) {
    println!();
    println!("{}capsule{} - {}", BOLD, RESET, runtime.client.model());
    println!(
        "{}{} capabilities loaded. Type /help for commands.{}",
        DIM,
        runtime.registry.len(),
        RESET
    );
    println!();
}

fn print_help() {
    println!("{}Commands{}", BOLD, RESET);
    println!("  {}/restart{}  Start a new conversation", GREEN, RESET);
    println!("  {}/plugins{}  List loaded capabilities", GREEN, RESET);
    println!("  {}/help{}     Show this help", GREEN, RESET);
    println!("  {}/exit{}     Quit", GREEN, RESET);
    println!();
    println!(
        "{}Capabilities created during a session load after /exit and a fresh start.{}",
        DIM, RESET
    );
}
