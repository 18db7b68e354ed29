//! Command descriptor model
//!
//! A descriptor is one registry entry: the command's kind, the catalog
//! target it resolves to, its owner-configured parameters and, for Auto
//! commands, the runtime bookkeeping the scheduler keeps on it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter name -> value, in configuration order
pub type Params = IndexMap<String, Value>;

/// Conversation key -> ordered turns
pub type ChatHistory = IndexMap<String, Vec<ChatTurn>>;

/// How a command gets invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Invoked by a matching inbound message
    Manual,
    /// Invoked by the scheduler
    Auto,
    /// Invoked once during shutdown drain
    Post,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [CommandKind::Manual, CommandKind::Auto, CommandKind::Post];

    /// Name of the configuration table holding commands of this kind
    pub fn table_name(&self) -> &'static str {
        match self {
            CommandKind::Manual => "ManualCommands",
            CommandKind::Auto => "AutoCommands",
            CommandKind::Post => "PostCommands",
        }
    }
}

fn default_num_process() -> u32 {
    1
}

/// Scheduling policy of an Auto command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoParams {
    pub run: bool,
    /// Seconds between two launch rounds
    pub min_execution_interval: f64,
    /// Seconds without a launch after which running workers are presumed dead
    pub longest_idle_interval: f64,
    #[serde(default = "default_num_process")]
    pub num_process: u32,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub target_id: i64,
    #[serde(default)]
    pub send: bool,
}

/// Runtime-only scheduling state of an Auto command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivingParams {
    pub running_process: u32,
    /// Milliseconds since epoch of the last launch, 0 when never launched
    pub last_runtime_ms: u64,
}

/// One turn of a stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Extra parameters: two reserved sections plus free entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraParams {
    /// Owner command -> names borrowed from its `params` at call time
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub shared_params: IndexMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_params: Option<AutoParams>,
    /// Free entries, merged over static params at call time
    #[serde(flatten)]
    pub extra: Params,
}

impl ExtraParams {
    pub fn is_empty(&self) -> bool {
        self.shared_params.is_empty() && self.auto_params.is_none() && self.extra.is_empty()
    }

    /// Kind used for bare-value results
    pub fn reply_kind(&self) -> &str {
        self.extra
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("text")
    }
}

/// A command as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub target: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: Params,
    #[serde(default, skip_serializing_if = "ExtraParams::is_empty")]
    pub extra_params: ExtraParams,
}

/// A registered command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub kind: CommandKind,
    pub target: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub extra_params: ExtraParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub living_params: Option<LivingParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<ChatHistory>,
}

impl Descriptor {
    /// Build a descriptor; Auto commands start with zeroed living params
    pub fn new(kind: CommandKind, target: String, params: Params, extra_params: ExtraParams) -> Self {
        let living_params = match kind {
            CommandKind::Auto => Some(LivingParams::default()),
            _ => None,
        };
        Self {
            kind,
            target,
            params,
            extra_params,
            living_params,
            chat_history: None,
        }
    }

    pub fn auto_params(&self) -> Option<&AutoParams> {
        self.extra_params.auto_params.as_ref()
    }

    /// Configuration fragment for this command, without runtime state
    pub fn to_config(&self) -> CommandConfig {
        CommandConfig {
            target: self.target.clone(),
            params: self.params.clone(),
            extra_params: self.extra_params.clone(),
        }
    }
}
