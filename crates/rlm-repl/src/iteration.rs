use crate::{
    environment::Environment,
    error::EnvError,
    parsing::{FinalAnswer, find_code_blocks, find_final_answer},
    result::ReplResult,
};

/// One executed code block and its outcome.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CodeBlock {
    pub code: String,
    pub result: ReplResult,
}

/// One agent turn: the model response plus every block it triggered, in order.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Iteration {
    pub response: String,
    pub code_blocks: Vec<CodeBlock>,
}

impl Iteration {
    #[must_use]
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            code_blocks: Vec::new(),
        }
    }

    /// The final-answer declaration in the response, if any.
    #[must_use]
    pub fn final_answer(&self) -> Option<FinalAnswer> {
        find_final_answer(&self.response)
    }
}

/// Executes every REPL block of `response` against `env`, in document order.
///
/// A block that faults does not stop the rest: its error is part of its result, and
/// later blocks see whatever bindings it made before failing.
pub fn execute_response<E: Environment + ?Sized>(env: &mut E, response: impl Into<String>) -> Result<Iteration, EnvError> {
    let mut iteration = Iteration::new(response);
    for code in find_code_blocks(&iteration.response) {
        let result = env.execute_code(&code)?;
        iteration.code_blocks.push(CodeBlock { code, result });
    }
    Ok(iteration)
}
