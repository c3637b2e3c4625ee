#![doc = include_str!("../../../README.md")]

mod builtins;
mod config;
mod context;
mod convert;
mod environment;
mod error;
mod format;
mod helpers;
mod io;
mod iteration;
mod lm_client;
mod message;
mod namespace;
mod parsing;
mod repl;
mod resource;
mod result;
mod value;

pub use crate::{
    builtins::{BLOCKED_BUILTINS, SAFE_BUILTINS, SAFE_EXCEPTIONS, is_allowed, is_blocked},
    config::{DEFAULT_LM_REQUEST_TIMEOUT, DEFAULT_MAX_DURATION, ExecutionLimits, HandlerAddress, ReplConfig},
    context::ContextPayload,
    environment::{Environment, EnvironmentKind, IsolatedRepl, LifecycleState, ReplEnvironment, SandboxBackend},
    error::{ConfigError, EnvError},
    format::{DEFAULT_MAX_CHARACTER_LENGTH, NO_OUTPUT, format_execution_result, format_iteration},
    iteration::{CodeBlock, Iteration, execute_response},
    lm_client::{LmClient, LmCompletion, LmError},
    message::{Message, Role},
    namespace::{HELPER_NAMES, RESERVED_PREFIX, is_user_visible},
    parsing::{FinalAnswer, find_code_blocks, find_final_answer, resolve_final_answer},
    repl::{LocalRepl, TIMEOUT_MARKER},
    resource::ResourceError,
    result::ReplResult,
    value::Value,
};
