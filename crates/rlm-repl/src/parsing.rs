//! Extraction of agent intents from raw model text.
//!
//! Grammar (all markers are case-sensitive):
//!
//! ```text
//! code_block   := "```repl" WS* NEWLINE body NEWLINE "```"     (body is non-greedy)
//! final_var    := LINE_START WS* "FINAL_VAR(" arg ")"
//! final        := LINE_START WS* "FINAL(" arg ")"
//! ```
//!
//! `arg` is non-greedy and may span lines, so it ends at the first `)`. When both final
//! forms appear anywhere in the text, `FINAL_VAR` wins.

use std::sync::LazyLock;

use regex::Regex;

use crate::{environment::Environment, error::EnvError, helpers::clean_variable_name};

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```repl\s*\n(.*?)\n```").expect("code block pattern is valid"));
static FINAL_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)^\s*FINAL_VAR\((.*?)\)").expect("FINAL_VAR pattern is valid"));
static FINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)^\s*FINAL\((.*?)\)").expect("FINAL pattern is valid"));

/// A final-answer declaration found in a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalAnswer {
    /// `FINAL(text)`: the answer is given inline.
    Literal(String),
    /// `FINAL_VAR(name)`: the answer is the stringified value of a namespace variable.
    Variable(String),
}

impl FinalAnswer {
    /// The marker name, `"FINAL"` or `"FINAL_VAR"`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Literal(_) => "FINAL",
            Self::Variable(_) => "FINAL_VAR",
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Literal(content) | Self::Variable(content) => content,
        }
    }
}

/// Returns the contents of every ```` ```repl ```` block, trimmed, in document order.
#[must_use]
pub fn find_code_blocks(text: &str) -> Vec<String> {
    CODE_BLOCK
        .captures_iter(text)
        .map(|captures| captures[1].trim().to_owned())
        .collect()
}

/// Finds the final-answer declaration in `text`, if any.
///
/// Variable names have surrounding whitespace and quotes stripped, so
/// `FINAL_VAR("answer")` refers to `answer`.
#[must_use]
pub fn find_final_answer(text: &str) -> Option<FinalAnswer> {
    if let Some(captures) = FINAL_VAR.captures(text) {
        return Some(FinalAnswer::Variable(clean_variable_name(&captures[1]).to_owned()));
    }
    FINAL
        .captures(text)
        .map(|captures| FinalAnswer::Literal(captures[1].trim().to_owned()))
}

/// Resolves the final answer of a response against an environment.
///
/// A `FINAL_VAR` answer is the interpreter's `str()` of the variable. Returns
/// `Ok(None)` when the response declares no answer yet, or when it names a variable
/// that is not bound.
pub fn resolve_final_answer<E: Environment + ?Sized>(text: &str, env: &E) -> Result<Option<String>, EnvError> {
    match find_final_answer(text) {
        None => Ok(None),
        Some(FinalAnswer::Literal(answer)) => Ok(Some(answer)),
        Some(FinalAnswer::Variable(name)) => {
            let answer = env.get_variable_str(&name)?;
            if answer.is_none() {
                tracing::warn!(%name, "FINAL_VAR names a variable that is not bound");
            }
            Ok(answer)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn code_blocks_in_document_order() {
        let text = "Let me look.\n```repl\nx = 1\n```\nthen\n```python\nignored\n```\n```repl\n  print(x)  \n```\n";
        assert_eq!(find_code_blocks(text), ["x = 1", "print(x)"]);
    }

    #[test]
    fn no_code_blocks_is_empty() {
        assert!(find_code_blocks("just prose").is_empty());
        // the closing fence must sit on its own line
        assert!(find_code_blocks("```repl x = 1```").is_empty());
    }

    #[test]
    fn final_var_strips_quotes() {
        let answer = find_final_answer("FINAL_VAR(\"answer\")\n").unwrap();
        assert_eq!(answer, FinalAnswer::Variable("answer".to_owned()));
        assert_eq!((answer.kind(), answer.content()), ("FINAL_VAR", "answer"));
    }

    #[test]
    fn final_literal() {
        assert_eq!(
            find_final_answer("Done.\n  FINAL( 42 apples )"),
            Some(FinalAnswer::Literal("42 apples".to_owned()))
        );
    }

    #[test]
    fn final_var_takes_precedence() {
        let text = "FINAL(inline)\nFINAL_VAR(result)";
        assert_eq!(find_final_answer(text), Some(FinalAnswer::Variable("result".to_owned())));
    }

    #[test]
    fn markers_must_start_a_line() {
        assert_eq!(find_final_answer("no marker here"), None);
        assert_eq!(find_final_answer("I will call FINAL(x) later"), None);
    }
}
