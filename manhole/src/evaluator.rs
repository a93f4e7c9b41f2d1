// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! The pluggable seam where a real interactive evaluator plugs in.
//!
//! This crate ships no general expression engine: the core only needs
//! *something* behind stdin/stdout once it has redirected them.
//! [`Evaluator`] and [`LineExecutor`] are that seam; the reference
//! implementations here are deliberately minimal — just enough to make a
//! session observable end to end without a host-supplied evaluator.

use std::io::{BufRead, Write};

use crate::config::Locals;

/// Drives an interactive session over already-redirected stdin/stdout.
///
/// Implementations read statements from `input` and write results/errors
/// to `output` until the peer disconnects (EOF) or the operator asks to
/// exit.
pub trait Evaluator: Send + Sync {
    fn run(&self, input: &mut dyn BufRead, output: &mut dyn Write, locals: &Locals);
}

/// A minimal line-oriented stand-in REPL.
///
/// Understands exactly enough syntax to exercise the crate end to end:
/// `print(<literal>)` echoes `<literal>` back, bare `exit`/`quit` ends the
/// session, anything else is echoed back prefixed with `...`. Hosts are
/// expected to supply their own [`Evaluator`] backed by a real expression
/// engine; this one exists so `manhole` is runnable and testable without
/// one.
#[derive(Default)]
pub struct DefaultEvaluator;

impl Evaluator for DefaultEvaluator {
    fn run(&self, input: &mut dyn BufRead, output: &mut dyn Write, locals: &Locals) {
        let _ = write!(output, ">>> ");
        let _ = output.flush();
        let mut line = String::new();
        loop {
            line.clear();
            let read = match input.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let _ = read;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                let _ = write!(output, ">>> ");
                let _ = output.flush();
                continue;
            }
            if trimmed == "exit" || trimmed == "quit" {
                break;
            }
            match eval_line(trimmed, locals) {
                Some(result) => {
                    let _ = writeln!(output, "{result}");
                }
                None => {
                    let _ = writeln!(output, "*** Unknown command: {trimmed}");
                }
            }
            let _ = write!(output, ">>> ");
            let _ = output.flush();
        }
    }
}

fn eval_line(line: &str, locals: &Locals) -> Option<String> {
    if let Some(inner) = line
        .strip_prefix("print(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let literal = inner.trim().trim_matches(|c| c == '\'' || c == '"');
        return Some(literal.to_string());
    }
    if line == "locals" {
        let rendered = locals
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        return Some(rendered);
    }
    if let Some((_, value)) = locals.iter().find(|(k, _)| k == line) {
        return Some(value.clone());
    }
    None
}

/// Executes newline-terminated statements read directly from the client
/// socket, with no stdio redirection involved.
pub trait LineExecutor: Send + Sync {
    fn execute(&self, line: &str, output: &mut dyn Write);
}

/// Reference EXEC handler: echoes each line back. A host wiring in a real
/// interpreter replaces this with one that actually executes `line`.
#[derive(Default)]
pub struct PassthroughLineExecutor;

impl LineExecutor for PassthroughLineExecutor {
    fn execute(&self, line: &str, output: &mut dyn Write) {
        let _ = writeln!(output, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn default_evaluator_echoes_print_literal() {
        let evaluator = DefaultEvaluator;
        let mut input = Cursor::new(b"print('FOOBAR')\nexit\n".to_vec());
        let mut output = Vec::new();
        evaluator.run(&mut input, &mut output, &Vec::new());
        let rendered = String::from_utf8(output).unwrap();
        assert!(rendered.contains("FOOBAR"));
        assert!(rendered.contains(">>>"));
    }

    #[test]
    fn default_evaluator_surfaces_locals() {
        let evaluator = DefaultEvaluator;
        let locals = vec![("greeting".to_string(), "hello".to_string())];
        let mut input = Cursor::new(b"locals\nexit\n".to_vec());
        let mut output = Vec::new();
        evaluator.run(&mut input, &mut output, &locals);
        let rendered = String::from_utf8(output).unwrap();
        assert!(rendered.contains("greeting=hello"));
    }

    #[test]
    fn passthrough_executor_echoes_line() {
        let executor = PassthroughLineExecutor;
        let mut output = Vec::new();
        executor.execute("1 + 1", &mut output);
        assert_eq!(String::from_utf8(output).unwrap(), "1 + 1\n");
    }
}
