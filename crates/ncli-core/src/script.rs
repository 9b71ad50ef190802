//! Run stack of nested scripts.
//!
//! Each frame owns its lines and its local variables. Interactive input has
//! its own base frame of locals, so a `$x` set at the prompt is not visible
//! inside a script and the reverse.

use crate::error::{NcliError, Result};
use crate::vars::Locals;
use std::collections::VecDeque;

pub const MAX_SCRIPT_DEPTH: usize = 32;

#[derive(Debug, Clone)]
struct ScriptFrame {
    name: String,
    lines: VecDeque<String>,
    line_no: usize,
    locals: Locals,
}

/// A line taken from a script, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    pub text: String,
    pub script: String,
    pub line_no: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunStack {
    base_locals: Locals,
    frames: Vec<ScriptFrame>,
}

impl RunStack {
    /// Starts a nested script. Blank lines and `#` comments are dropped.
    pub fn push<I, S>(&mut self, name: &str, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.frames.len() >= MAX_SCRIPT_DEPTH {
            return Err(NcliError::execution(format!(
                "script '{name}' exceeds the maximum nesting depth of {MAX_SCRIPT_DEPTH}"
            )));
        }
        let lines = lines
            .into_iter()
            .map(|l| l.as_ref().trim_end().to_string())
            .filter(|l| {
                let t = l.trim_start();
                !t.is_empty() && !t.starts_with('#')
            })
            .collect();
        self.frames.push(ScriptFrame {
            name: name.to_string(),
            lines,
            line_no: 0,
            locals: Locals::new(),
        });
        Ok(())
    }

    /// Next line from the innermost script that still has lines. Finished
    /// frames are popped here, so a frame stays alive until its last
    /// command's reply has been handled.
    pub fn next_line(&mut self) -> Option<ScriptLine> {
        while let Some(frame) = self.frames.last_mut() {
            if let Some(text) = frame.lines.pop_front() {
                frame.line_no += 1;
                return Some(ScriptLine {
                    text,
                    script: frame.name.clone(),
                    line_no: frame.line_no,
                });
            }
            self.frames.pop();
        }
        None
    }

    /// Number of active script frames.
    pub fn level(&self) -> usize {
        self.frames.len()
    }

    pub fn is_running(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Aborts every running script. Returns how many frames were dropped.
    pub fn cancel(&mut self) -> usize {
        let n = self.frames.len();
        self.frames.clear();
        n
    }

    /// Locals of the innermost frame, or of the interactive base frame.
    pub fn locals(&self) -> &Locals {
        self.frames
            .last()
            .map(|f| &f.locals)
            .unwrap_or(&self.base_locals)
    }

    pub fn locals_mut(&mut self) -> &mut Locals {
        match self.frames.last_mut() {
            Some(frame) => &mut frame.locals,
            None => &mut self.base_locals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::VarValue;

    #[test]
    fn test_nested_frames_run_innermost_first() {
        let mut rs = RunStack::default();
        rs.push("outer", ["a", "# comment", "", "b"]).unwrap();
        assert_eq!(rs.next_line().unwrap().text, "a");
        rs.push("inner", ["x"]).unwrap();
        let line = rs.next_line().unwrap();
        assert_eq!((line.text.as_str(), line.script.as_str()), ("x", "inner"));
        assert_eq!(rs.next_line().unwrap().text, "b");
        assert!(rs.next_line().is_none());
        assert_eq!(rs.level(), 0);
    }

    #[test]
    fn test_locals_are_per_frame() {
        let mut rs = RunStack::default();
        rs.locals_mut().insert("x".into(), VarValue::Text("top".into()));
        rs.push("s", ["cmd"]).unwrap();
        assert!(rs.locals().get("x").is_none());
        rs.cancel();
        assert!(rs.locals().contains_key("x"));
    }

    #[test]
    fn test_max_depth() {
        let mut rs = RunStack::default();
        for i in 0..MAX_SCRIPT_DEPTH {
            rs.push(&format!("s{i}"), ["x"]).unwrap();
        }
        assert!(rs.push("deep", ["x"]).is_err());
    }
}
