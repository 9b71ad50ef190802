use std::borrow::Cow::{self, Borrowed, Owned};
use std::collections::BTreeMap;

use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};

use ncli_core::schema::SchemaModel;

/// Commands the REPL answers itself.
pub const REPL_COMMANDS: [&str; 5] = ["help", "show-log", "open", "quit", "exit"];

/// rustyline helper completing command and parameter names.
#[derive(Clone, Default)]
pub struct CliHelper {
    /// command name -> parameter names
    commands: BTreeMap<String, Vec<String>>,
}

impl CliHelper {
    pub fn from_schema(schema: &dyn SchemaModel) -> Self {
        let mut commands = BTreeMap::new();
        for name in schema.command_names() {
            let params = schema
                .find_object(None, &name)
                .map(|obj| obj.params.iter().map(|p| p.name.clone()).collect())
                .unwrap_or_default();
            commands.insert(name, params);
        }
        for name in REPL_COMMANDS {
            commands.entry(name.to_string()).or_default();
        }
        Self { commands }
    }

    fn is_command(&self, word: &str) -> bool {
        self.commands.contains_key(word)
    }

    fn candidates(&self, line: &str) -> (usize, Vec<String>) {
        let word_start = line.rfind(' ').map(|i| i + 1).unwrap_or(0);
        let word = &line[word_start..];

        // assignments complete on the right-hand side
        let rhs = match line.find('=') {
            Some(eq) if line[..eq].trim_start().starts_with(['$', '@']) => line[eq + 1..].trim_start(),
            _ => line,
        };
        let mut words = rhs.split_whitespace();
        let first = words.next();

        let finished_first = rhs.ends_with(' ') || words.next().is_some();
        match first {
            Some(command) if finished_first => {
                let Some(params) = self.commands.get(command) else {
                    return (word_start, Vec::new());
                };
                let already: Vec<&str> = rhs
                    .split_whitespace()
                    .skip(1)
                    .filter_map(|w| w.split('=').next())
                    .collect();
                let found = params
                    .iter()
                    .filter(|p| p.starts_with(word) && !already.contains(&p.as_str()))
                    .cloned()
                    .collect();
                (word_start, found)
            }
            _ => {
                let found = self
                    .commands
                    .keys()
                    .filter(|c| c.starts_with(word))
                    .cloned()
                    .collect();
                (word_start, found)
            }
        }
    }
}

impl Helper for CliHelper {}

impl Completer for CliHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, names) = self.candidates(&line[..pos]);
        let pairs = names
            .into_iter()
            .map(|name| Pair {
                display: name.clone(),
                replacement: name,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Highlighter for CliHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let first = line.split_whitespace().next().unwrap_or("");
        if first.starts_with('$') || first.starts_with('@') {
            Owned(line.bright_yellow().to_string())
        } else if self.is_command(first) {
            Owned(line.bright_cyan().to_string())
        } else {
            Borrowed(line)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Hinter for CliHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let line = &line[..pos];
        if line.is_empty() || line.contains(' ') {
            return None;
        }
        self.commands
            .keys()
            .find(|cmd| cmd.starts_with(line) && cmd.len() > line.len())
            .map(|cmd| cmd[line.len()..].bright_black().to_string())
    }
}

impl Validator for CliHelper {}
