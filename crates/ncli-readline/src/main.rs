mod helper;
mod render;

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ncli_execution::{
    Client, ClientOptions, EventLoop, LogConfig, LoopInput, LoopOutput, SessionLog, init_tracing,
};
use ncli_infrastructure::{ConfigService, SessionConfigRepository};

use crate::helper::CliHelper;

const DEFAULT_LOG_LINES: usize = 20;

/// What the REPL does with one input line.
#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    Skip,
    Quit,
    Help,
    ShowLog(usize),
    Open(String),
    Forward(String),
}

fn classify(line: &str) -> std::result::Result<LineAction, String> {
    let trimmed = line.trim();
    let mut words = trimmed.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(LineAction::Skip);
    };
    if first.starts_with('#') {
        return Ok(LineAction::Skip);
    }
    match first {
        "quit" | "exit" => Ok(LineAction::Quit),
        "help" => Ok(LineAction::Help),
        "show-log" => match words.next() {
            None => Ok(LineAction::ShowLog(DEFAULT_LOG_LINES)),
            Some(n) => n
                .parse()
                .map(LineAction::ShowLog)
                .map_err(|_| format!("show-log: '{n}' is not a line count")),
        },
        "open" => match words.next() {
            Some(name) => Ok(LineAction::Open(name.to_string())),
            None => Err("open: saved session name required".to_string()),
        },
        _ => Ok(LineAction::Forward(trimmed.to_string())),
    }
}

struct Repl {
    editor: Editor<CliHelper, DefaultHistory>,
    help: Vec<(String, String)>,
    log: SessionLog,
    saved_sessions: SessionConfigRepository,
}

impl Repl {
    fn print_help(&self) {
        for (name, description) in &self.help {
            println!("  {:<20} {}", name.bright_cyan(), description);
        }
        println!("  {:<20} {}", "open NAME".bright_cyan(), "Connect using a saved session from sessions.toml");
        println!("  {:<20} {}", "show-log [N]".bright_cyan(), "Show recent session events");
        println!("  {:<20} {}", "quit".bright_cyan(), "Close every session and exit");
    }

    fn show_log(&self, n: usize) {
        let entries = self.log.recent(n);
        if entries.is_empty() {
            println!("{}", "no session events yet".bright_black());
        }
        for entry in &entries {
            println!("{}", render::log_line(entry));
        }
    }

    /// Reads until a line must go to the event loop. `None` means quit.
    fn read_command(&mut self, prompt: &str) -> Option<String> {
        loop {
            let read = tokio::task::block_in_place(|| self.editor.readline(prompt));
            match read {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = self.editor.add_history_entry(line.as_str());
                    }
                    match classify(&line) {
                        Ok(LineAction::Skip) => {}
                        Ok(LineAction::Quit) => return None,
                        Ok(LineAction::Help) => self.print_help(),
                        Ok(LineAction::ShowLog(n)) => self.show_log(n),
                        Ok(LineAction::Open(name)) => match self.saved_sessions.get(&name) {
                            Ok(saved) => return Some(saved.connect_line()),
                            Err(e) => eprintln!("{}", format!("Error: {e}").red()),
                        },
                        Ok(LineAction::Forward(line)) => return Some(line),
                        Err(message) => eprintln!("{}", message.red()),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "CTRL-C detected. Type 'quit' to exit.".yellow());
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "CTRL-D detected. Exiting...".bright_green());
                    return None;
                }
                Err(err) => {
                    eprintln!("{}", format!("Error: {err:?}").red());
                    return None;
                }
            }
        }
    }
}

fn load_history(editor: &mut Editor<CliHelper, DefaultHistory>, path: &Path) {
    if path.exists() {
        if let Err(e) = editor.load_history(path) {
            tracing::warn!("cannot read history {}: {e}", path.display());
        }
    }
}

/// Interactive NETCONF client.
///
/// The core runs inside an `EventLoop` task; this thread owns the line
/// editor and only reads when the loop sends a prompt. Ctrl-C while a
/// command is running interrupts it.
#[tokio::main]
async fn main() -> Result<()> {
    let client = Client::build(ClientOptions::default()).context("cannot start ncli")?;
    let log = init_tracing(&LogConfig::from(&client.config.logging))?;
    let paths = client.paths.clone();

    let schema = client.context.schema();
    let mut editor = Editor::new()?;
    editor.set_helper(Some(CliHelper::from_schema(schema)));
    load_history(&mut editor, &paths.history_file());
    let help = schema
        .command_names()
        .into_iter()
        .filter_map(|name| schema.find_object(None, &name))
        .map(|obj| (obj.name.clone(), obj.description.clone()))
        .collect();

    let mut repl = Repl {
        editor,
        help,
        log,
        saved_sessions: SessionConfigRepository::new(&paths),
    };

    let (input_tx, input_rx) = mpsc::channel::<LoopInput>(16);
    let (output_tx, mut output_rx) = mpsc::unbounded_channel::<LoopOutput>();
    let cancel = CancellationToken::new();
    let runner = tokio::spawn(EventLoop::new(client.context).run(input_rx, output_tx, cancel.clone()));

    println!("{}", "=== ncli ===".bright_magenta().bold());
    println!("{}", "Type 'help' for commands, 'quit' to exit.".bright_black());
    println!();

    loop {
        tokio::select! {
            out = output_rx.recv() => match out {
                Some(LoopOutput::Events(events)) => {
                    for event in &events {
                        for line in render::event_lines(event) {
                            println!("{line}");
                        }
                    }
                }
                Some(LoopOutput::Error(e)) => eprintln!("{}", format!("Error: {e}").red()),
                Some(LoopOutput::Prompt(prompt)) => {
                    let input = match repl.read_command(&prompt) {
                        Some(line) => LoopInput::Line(line),
                        None => LoopInput::Quit,
                    };
                    let quitting = input == LoopInput::Quit;
                    if input_tx.send(input).await.is_err() || quitting {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "interrupted".yellow());
                if input_tx.send(LoopInput::Interrupt).await.is_err() {
                    break;
                }
            }
        }
    }

    let ctx = match runner.await {
        Ok(ctx) => ctx,
        Err(e) => {
            cancel.cancel();
            return Err(e).context("event loop failed");
        }
    };
    // leftover events from the shutdown
    while let Ok(LoopOutput::Events(events)) = output_rx.try_recv() {
        for event in &events {
            for line in render::event_lines(event) {
                println!("{line}");
            }
        }
    }

    ConfigService::new(&paths).save_defaults(ctx.defaults())?;
    if let Some(dir) = paths.history_file().parent() {
        std::fs::create_dir_all(dir)?;
    }
    if let Err(e) = repl.editor.save_history(&paths.history_file()) {
        tracing::warn!("cannot save history: {e}");
    }
    println!("{}", "Goodbye!".bright_green());
    Ok(())
}
