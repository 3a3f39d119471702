//! Command dispatcher - maps a command id and its payloads to a local script

use std::path::{Path, PathBuf};

use cmdlink_common::ConfigPayload;

/// Directory scripts are resolved against when none is configured
pub const DEFAULT_SCRIPTS_DIR: &str = "./sc";

/// The closed set of scripts the agent is allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// `script0.sh`, run for command `0`
    Script0,
    /// `script1.sh`, run for command `1`
    Script1,
    /// `script2.sh`, run for command `2`
    Script2,
    /// `script3.sh`, run for command `3`
    Script3,
    /// Does nothing; answers `-1` and unrecognized commands
    Noop,
}

impl Script {
    /// File name of the script inside the scripts directory
    pub fn file_name(self) -> &'static str {
        match self {
            Script::Script0 => "script0.sh",
            Script::Script1 => "script1.sh",
            Script::Script2 => "script2.sh",
            Script::Script3 => "script3.sh",
            Script::Noop => "null.sh",
        }
    }
}

/// How the argument list is derived from the request payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRule {
    /// `data[0].config` is required and becomes the only argument
    RunWithSingleConfig(Script),
    /// Every payload contributes `filename` then `config`
    RunWithFlattenedPairs(Script),
    /// Runs the script with no arguments; payloads are ignored
    RunNoArgs(Script),
}

impl ActionRule {
    /// The script this rule runs
    pub fn script(self) -> Script {
        match self {
            ActionRule::RunWithSingleConfig(script)
            | ActionRule::RunWithFlattenedPairs(script)
            | ActionRule::RunNoArgs(script) => script,
        }
    }
}

/// Exact-match command table; anything absent falls back to [`FALLBACK_RULE`]
pub const COMMAND_TABLE: &[(&str, ActionRule)] = &[
    ("0", ActionRule::RunWithSingleConfig(Script::Script0)),
    ("1", ActionRule::RunWithFlattenedPairs(Script::Script1)),
    ("2", ActionRule::RunWithSingleConfig(Script::Script2)),
    ("3", ActionRule::RunNoArgs(Script::Script3)),
    ("-1", ActionRule::RunNoArgs(Script::Noop)),
];

/// Rule applied to commands missing from [`COMMAND_TABLE`]
pub const FALLBACK_RULE: ActionRule = ActionRule::RunNoArgs(Script::Noop);

/// Look up the rule for a command, `None` when the command is unrecognized
pub fn rule_for(command: &str) -> Option<ActionRule> {
    COMMAND_TABLE
        .iter()
        .find(|(id, _)| *id == command)
        .map(|(_, rule)| *rule)
}

/// A script invocation ready to hand to the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub executable_path: PathBuf,
    pub arguments:       Vec<String>,
}

/// Result of dispatching one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Run(ResolvedAction),
    /// Required data was missing; the request is dropped without a response
    Skip,
}

/// Resolves commands to scripts under a fixed directory
#[derive(Debug, Clone)]
pub struct Dispatcher {
    scripts_dir: PathBuf,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SCRIPTS_DIR)
    }
}

impl Dispatcher {
    /// Create a dispatcher resolving script names against `scripts_dir`
    pub fn new<P: Into<PathBuf>>(scripts_dir: P) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Directory script names are joined onto
    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Map a command and its payloads to a script invocation.
    ///
    /// Pure apart from logging: the same input always resolves to the same
    /// action.
    pub fn dispatch(&self, command: &str, data: &[ConfigPayload]) -> Dispatch {
        let rule = rule_for(command).unwrap_or_else(|| {
            tracing::warn!("⚠️ Using default script for unknown command: {}", command);
            FALLBACK_RULE
        });

        let arguments = match rule {
            ActionRule::RunWithSingleConfig(_) => match data.first() {
                Some(payload) if !payload.config.is_empty() => vec![payload.config.clone()],
                _ => {
                    tracing::warn!("⚠️ Config data is required for command {}", command);
                    return Dispatch::Skip;
                }
            },
            ActionRule::RunWithFlattenedPairs(_) => data
                .iter()
                .flat_map(|payload| [payload.filename.clone(), payload.config.clone()])
                .collect(),
            ActionRule::RunNoArgs(_) => Vec::new(),
        };

        Dispatch::Run(ResolvedAction {
            executable_path: self.scripts_dir.join(rule.script().file_name()),
            arguments,
        })
    }
}
