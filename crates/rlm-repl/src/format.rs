//! Rendering of completed iterations into next-turn messages.

use crate::{iteration::Iteration, message::Message, namespace::is_user_visible, result::ReplResult};

/// Default cap on one formatted result, in characters.
pub const DEFAULT_MAX_CHARACTER_LENGTH: usize = 20_000;

/// Placeholder used when a result has nothing to show.
pub const NO_OUTPUT: &str = "No output";

/// Formats `iteration` as the messages to append before the next model call.
///
/// The response comes first as an assistant message, followed by one user message per
/// executed block. Each formatted result longer than `max_character_length` characters
/// is cut to exactly that many characters and followed by a marker naming how many were
/// dropped.
#[must_use]
pub fn format_iteration(iteration: &Iteration, max_character_length: usize) -> Vec<Message> {
    let mut messages = Vec::with_capacity(iteration.code_blocks.len() + 1);
    messages.push(Message::assistant(iteration.response.as_str()));
    for block in &iteration.code_blocks {
        let output = truncate(format_execution_result(&block.result), max_character_length);
        messages.push(Message::user(format!(
            "Code executed:\n```python\n{}\n```\n\nREPL output:\n{output}",
            block.code
        )));
    }
    messages
}

/// Formats one result: stdout, stderr, then the names of user-visible data variables.
#[must_use]
pub fn format_execution_result(result: &ReplResult) -> String {
    let mut parts = Vec::new();
    if !result.stdout.is_empty() {
        parts.push(format!("\n{}", result.stdout));
    }
    if !result.stderr.is_empty() {
        parts.push(format!("\n{}", result.stderr));
    }

    let names: Vec<&str> = result
        .locals
        .iter()
        .filter(|(name, value)| is_user_visible(name) && value.is_data())
        .map(|(name, _)| name.as_str())
        .collect();
    if !names.is_empty() {
        // names are identifiers, so they never need escaping
        let quoted: Vec<String> = names.iter().map(|name| format!("'{name}'")).collect();
        let listing = format!("REPL variables: [{}]\n", quoted.join(", "));
        parts.push(listing);
    }

    if parts.is_empty() {
        NO_OUTPUT.to_owned()
    } else {
        parts.join("\n\n")
    }
}

fn truncate(text: String, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let cut = text.char_indices().nth(max_chars).map_or(text.len(), |(i, _)| i);
    format!("{}... + [{} chars...]", &text[..cut], total - max_chars)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{iteration::CodeBlock, message::Role, value::Value};

    fn result(stdout: &str, stderr: &str, locals: &[(&str, Value)]) -> ReplResult {
        ReplResult {
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
            locals: locals.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect(),
            execution_time: Duration::ZERO,
            llm_calls: Vec::new(),
        }
    }

    #[test]
    fn empty_result_is_placeholder() {
        assert_eq!(format_execution_result(&ReplResult::default()), "No output");
    }

    #[test]
    fn result_sections() {
        let r = result(
            "3\n",
            "",
            &[
                ("x", Value::Int(3)),
                ("math", Value::Repr {
                    type_name: "module".to_owned(),
                    repr: "<module 'math'>".to_owned(),
                }),
                ("names", Value::List(vec![])),
            ],
        );
        assert_eq!(format_execution_result(&r), "\n3\n\n\nREPL variables: ['x', 'names']\n");
    }

    #[test]
    fn stderr_follows_stdout() {
        let r = result("partial\n", "ZeroDivisionError: division by zero", &[]);
        assert_eq!(
            format_execution_result(&r),
            "\npartial\n\n\n\nZeroDivisionError: division by zero"
        );
    }

    #[test]
    fn iteration_messages() {
        let iteration = Iteration {
            response: "```repl\nprint(1)\n```".to_owned(),
            code_blocks: vec![CodeBlock {
                code: "print(1)".to_owned(),
                result: result("1\n", "", &[]),
            }],
        };
        let messages = format_iteration(&iteration, DEFAULT_MAX_CHARACTER_LENGTH);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, iteration.response);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(
            messages[1].content,
            "Code executed:\n```python\nprint(1)\n```\n\nREPL output:\n\n1\n"
        );
    }

    #[test]
    fn truncation_reports_true_excess() {
        let long = "é".repeat(30);
        let truncated = truncate(long, 10);
        assert_eq!(truncated, format!("{}... + [20 chars...]", "é".repeat(10)));
        assert_eq!(truncate("short".to_owned(), 10), "short");
    }
}
