//! End-to-end tests of the text protocol: parse a model response, execute its blocks,
//! format the iteration and resolve the final answer.

use pretty_assertions::assert_eq;
use rlm_repl::{
    DEFAULT_MAX_CHARACTER_LENGTH, FinalAnswer, LocalRepl, ReplConfig, Role, execute_response, find_code_blocks,
    find_final_answer, format_iteration, resolve_final_answer,
};

// ============================================================================
// parsing
// ============================================================================

#[test]
fn two_blocks_in_document_order() {
    let text = "First:\n```repl\na = 1\n```\nSecond:\n```repl\nb = a + 1\n```\n";
    assert_eq!(find_code_blocks(text), ["a = 1", "b = a + 1"]);
    assert!(find_code_blocks("no blocks at all").is_empty());
}

#[test]
fn final_answer_forms() {
    let answer = find_final_answer("FINAL_VAR(\"answer\")\n").unwrap();
    assert_eq!((answer.kind(), answer.content()), ("FINAL_VAR", "answer"));
    assert_eq!(find_final_answer("no marker here"), None);
    assert_eq!(
        find_final_answer("FINAL(Paris)"),
        Some(FinalAnswer::Literal("Paris".to_owned()))
    );
}

// ============================================================================
// execute + format
// ============================================================================

#[test]
fn blocks_run_in_order_and_faults_do_not_stop_later_blocks() {
    let mut repl = LocalRepl::new(ReplConfig::new()).unwrap();
    let response = "```repl\nx = 10\n```\n```repl\n1 / 0\n```\n```repl\nprint(x * 2)\n```";

    let iteration = execute_response(&mut repl, response).unwrap();

    assert_eq!(iteration.code_blocks.len(), 3);
    assert!(iteration.code_blocks[1].result.stderr.contains("ZeroDivisionError"));
    assert_eq!(iteration.code_blocks[2].result.stdout, "20\n");
}

#[test]
fn formatted_iteration_messages() {
    let mut repl = LocalRepl::new(ReplConfig::new()).unwrap();
    let response = "Computing.\n```repl\nx = 6 * 7\nprint(x)\n```";
    let iteration = execute_response(&mut repl, response).unwrap();

    let messages = format_iteration(&iteration, DEFAULT_MAX_CHARACTER_LENGTH);

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::Assistant);
    assert_eq!(messages[0].content, response);
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(
        messages[1].content,
        "Code executed:\n```python\nx = 6 * 7\nprint(x)\n```\n\nREPL output:\n\n42\n\n\nREPL variables: ['x']\n"
    );
}

#[test]
fn long_output_is_truncated_with_exact_excess() {
    let mut repl = LocalRepl::new(ReplConfig::new()).unwrap();
    let iteration = execute_response(&mut repl, "```repl\nprint('a' * 500)\n```").unwrap();

    let messages = format_iteration(&iteration, 100);

    // "\n" + 500 chars + "\n" = 502 characters of formatted output
    let expected_output = format!("\n{}... + [402 chars...]", "a".repeat(99));
    assert!(messages[1].content.ends_with(&expected_output), "{}", messages[1].content);
}

#[test]
fn response_without_blocks_yields_only_the_response() {
    let mut repl = LocalRepl::new(ReplConfig::new()).unwrap();
    let iteration = execute_response(&mut repl, "Just thinking.").unwrap();
    assert!(iteration.code_blocks.is_empty());
    assert_eq!(format_iteration(&iteration, 10).len(), 1);
}

// ============================================================================
// final answers
// ============================================================================

#[test]
fn final_var_resolves_against_the_namespace() {
    let mut repl = LocalRepl::new(ReplConfig::new()).unwrap();
    let response = "```repl\nresult = [1, 2]\n```\nFINAL_VAR(result)";
    let iteration = execute_response(&mut repl, response).unwrap();

    assert_eq!(iteration.final_answer(), Some(FinalAnswer::Variable("result".to_owned())));
    assert_eq!(resolve_final_answer(response, &repl).unwrap().as_deref(), Some("[1, 2]"));
}

#[test]
fn unresolved_final_var_is_not_final() {
    let repl = LocalRepl::new(ReplConfig::new()).unwrap();
    assert_eq!(resolve_final_answer("FINAL_VAR(missing)", &repl).unwrap(), None);
    assert_eq!(resolve_final_answer("still working", &repl).unwrap(), None);
}

#[test]
fn literal_final_answer_needs_no_lookup() {
    let repl = LocalRepl::new(ReplConfig::new()).unwrap();
    assert_eq!(
        resolve_final_answer("All done.\nFINAL(The answer is 42)", &repl)
            .unwrap()
            .as_deref(),
        Some("The answer is 42")
    );
}

#[test]
fn final_var_answer_is_the_interpreter_str() {
    let mut repl = LocalRepl::new(ReplConfig::new()).unwrap();
    let setup = "```repl\n\
        import datetime\n\
        class Pretty:\n    def __str__(self):\n        return 'pretty'\n\
        obj = Pretty()\n\
        day = datetime.date(2024, 1, 2)\n\
        big = 1e20\n\
        small = 1e-7\n\
        ```";
    let iteration = execute_response(&mut repl, setup).unwrap();
    assert_eq!(iteration.code_blocks[0].result.stderr, "");

    let resolve = |name: &str| resolve_final_answer(&format!("FINAL_VAR({name})"), &repl).unwrap();
    assert_eq!(resolve("obj").as_deref(), Some("pretty"));
    assert_eq!(resolve("day").as_deref(), Some("2024-01-02"));
    assert_eq!(resolve("big").as_deref(), Some("1e+20"));
    assert_eq!(resolve("small").as_deref(), Some("1e-07"));
}
