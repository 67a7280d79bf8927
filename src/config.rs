//! Command file loading, validation and write-back.
//!
//! The file is a JSON object with a `commands` array. Entries are checked once
//! at load time and turned into [`CommandRule`]s; nothing downstream ever sees
//! an unvalidated entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::hex::{normalize_id, sanitize_hex_input};

/// Largest accepted `resp_data_len`, in byte pairs.
pub const MAX_RESP_DATA_LEN: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("command #{index}: invalid {field}: {value:?}")]
    BadField {
        index: usize,
        field: &'static str,
        value: String,
    },
    #[error("command id {0} configured more than once")]
    Duplicate(String),
    #[error("override for unknown command id {0}")]
    UnknownOverride(String),
}

/// One configured command, validated and normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRule {
    pub name: String,
    pub cmd_id: String,
    pub resp_id: String,
    pub resp_data_len: Option<usize>,
    /// Space-joined uppercase byte pairs, never longer than `resp_data_len`.
    pub resp_hex: String,
    pub delay_ms: u64,
    /// Extra consecutive arrivals required before the first response.
    pub trigger_after: u32,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    commands: Vec<RawCommand>,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cmd_id: String,
    #[serde(default)]
    resp_id: String,
    // integer, null or anything else; only a non-negative integer constrains length
    #[serde(default)]
    resp_data_len: Value,
    #[serde(default)]
    resp_hex: String,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    trigger_after: u32,
}

#[derive(Debug, Serialize)]
struct SavedCommand<'a> {
    name: &'a str,
    cmd_id: &'a str,
    resp_id: &'a str,
    resp_data_len: Option<usize>,
    resp_hex: &'a str,
    delay_ms: u64,
    trigger_after: u32,
}

/// Per-command runtime parameters given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub delay_ms: Vec<(String, u64)>,
    pub trigger_after: Vec<(String, u32)>,
    pub resp_hex: Vec<(String, String)>,
}

pub fn load_config(path: &Path) -> Result<Vec<CommandRule>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text).map_err(|e| match e {
        ConfigError::Json { source, .. } => ConfigError::Json {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

pub fn parse_config(text: &str) -> Result<Vec<CommandRule>, ConfigError> {
    let file: ConfigFile = serde_json::from_str(text).map_err(|source| ConfigError::Json {
        path: PathBuf::new(),
        source,
    })?;

    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(file.commands.len());
    for (index, raw) in file.commands.into_iter().enumerate() {
        let rule = validate(index, raw)?;
        if !seen.insert(rule.cmd_id.clone()) {
            return Err(ConfigError::Duplicate(rule.cmd_id));
        }
        rules.push(rule);
    }
    Ok(rules)
}

fn validate(index: usize, raw: RawCommand) -> Result<CommandRule, ConfigError> {
    let bad = |field, value: &str| ConfigError::BadField {
        index,
        field,
        value: value.to_string(),
    };
    let cmd_id = normalize_id(&raw.cmd_id).ok_or_else(|| bad("cmd_id", &raw.cmd_id))?;
    let resp_id = normalize_id(&raw.resp_id).ok_or_else(|| bad("resp_id", &raw.resp_id))?;
    let resp_data_len = match raw.resp_data_len.as_u64() {
        Some(n) => Some(
            usize::try_from(n)
                .ok()
                .filter(|&n| n <= MAX_RESP_DATA_LEN)
                .ok_or_else(|| bad("resp_data_len", &n.to_string()))?,
        ),
        None => None,
    };
    let resp_hex = response_data(&raw.resp_hex, resp_data_len);

    Ok(CommandRule {
        name: raw
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("CMD {}", index + 1)),
        cmd_id,
        resp_id,
        resp_data_len,
        resp_hex,
        delay_ms: raw.delay_ms,
        trigger_after: raw.trigger_after,
    })
}

/// Sanitized response data, zero-filled to `len` pairs when nothing usable was given.
fn response_data(hex: &str, len: Option<usize>) -> String {
    let data = sanitize_hex_input(hex, len);
    match len {
        Some(n) if data.is_empty() && n > 0 => vec!["00"; n].join(" "),
        _ => data,
    }
}

pub fn apply_overrides(rules: &mut [CommandRule], ov: &Overrides) -> Result<(), ConfigError> {
    fn find<'a>(
        rules: &'a mut [CommandRule],
        id: &str,
    ) -> Result<&'a mut CommandRule, ConfigError> {
        let norm = normalize_id(id).ok_or_else(|| ConfigError::UnknownOverride(id.to_string()))?;
        rules
            .iter_mut()
            .find(|r| r.cmd_id == norm)
            .ok_or(ConfigError::UnknownOverride(norm))
    }

    for (id, ms) in &ov.delay_ms {
        find(rules, id)?.delay_ms = *ms;
    }
    for (id, n) in &ov.trigger_after {
        find(rules, id)?.trigger_after = *n;
    }
    for (id, hex) in &ov.resp_hex {
        let rule = find(rules, id)?;
        rule.resp_hex = response_data(hex, rule.resp_data_len);
    }
    Ok(())
}

/// Write rules back to `path`.
///
/// An existing file keeps its other fields; entries are matched by position and
/// get the current `resp_hex`, `delay_ms` and `trigger_after`. A missing or
/// unreadable file, or one without commands, is rewritten from `rules`.
pub fn save_config(path: &Path, rules: &[CommandRule]) -> Result<(), ConfigError> {
    let mut doc = fs::read_to_string(path)
        .ok()
        .and_then(|t| serde_json::from_str::<Value>(&t).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Default::default()));

    let existing = doc
        .get_mut("commands")
        .and_then(Value::as_array_mut)
        .filter(|a| !a.is_empty());

    let commands = match existing {
        Some(entries) => {
            for (entry, rule) in entries.iter_mut().zip(rules) {
                if let Some(obj) = entry.as_object_mut() {
                    obj.insert("resp_hex".into(), rule.resp_hex.clone().into());
                    obj.insert("delay_ms".into(), rule.delay_ms.into());
                    obj.insert("trigger_after".into(), rule.trigger_after.into());
                }
            }
            Value::Array(std::mem::take(entries))
        }
        None => {
            let saved: Vec<SavedCommand> = rules
                .iter()
                .map(|r| SavedCommand {
                    name: &r.name,
                    cmd_id: &r.cmd_id,
                    resp_id: &r.resp_id,
                    resp_data_len: r.resp_data_len,
                    resp_hex: &r.resp_hex,
                    delay_ms: r.delay_ms,
                    trigger_after: r.trigger_after,
                })
                .collect();
            serde_json::to_value(saved).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?
        }
    };
    doc["commands"] = commands;

    let text = serde_json::to_string_pretty(&doc).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// `*.json` files directly inside `dir`, sorted.
pub fn scan_config_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "json"))
        .collect();
    files.sort();
    Ok(files)
}
