//! Command micro-protocol
//!
//! Commands are ASCII strings whose fields are joined by `/`:
//! `name/param1/param2/...`. A `CommandRegistry` holds the command names a
//! broker or consumer understands, each with a parameter template such as
//! `{game}/{region}` used to name the positional parameters.
//!
//! `subscribe` and `unsubscribe` are reserved: consumers send them to the
//! broker with the target command name as the only parameter. They are never
//! registered and are recognized with [`split`] instead of [`CommandRegistry::parse`].

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::utils::{Error, Result};

pub const CMD_SUBSCRIBE: &str = "subscribe";
pub const CMD_UNSUBSCRIBE: &str = "unsubscribe";

const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub params: String,
    pub description: String,
}

/// A command payload resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub params: Vec<String>,
    pub vars: HashMap<String, String>,
}

/// Subscription control message sent by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, CommandSpec>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from bare command names, without parameter templates.
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        for name in names {
            registry.register(name, "", "");
        }
        registry
    }

    /// Register a command. Re-registering a name replaces its spec.
    pub fn register(
        &self,
        name: impl Into<String>,
        params: impl Into<String>,
        description: impl Into<String>,
    ) {
        let name = name.into();
        self.commands.write().insert(
            name.clone(),
            CommandSpec {
                name,
                params: params.into(),
                description: description.into(),
            },
        );
    }

    pub fn unregister(&self, name: &str) -> Option<CommandSpec> {
        self.commands.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<CommandSpec> {
        self.commands.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse `data` as a registered command.
    ///
    /// Template parameters missing from the payload map to an empty string;
    /// extra payload parameters are kept in `params` but left unnamed.
    pub fn parse(&self, data: &[u8]) -> Result<ParsedCommand> {
        let (name, params) = split(data)?;
        let spec = self
            .get(&name)
            .ok_or_else(|| Error::CommandNotFound(name.clone()))?;

        let vars = spec
            .params
            .split(SEPARATOR)
            .take_while(|p| !p.is_empty())
            .enumerate()
            .map(|(i, p)| {
                let key = p.trim_matches(|c| c == '{' || c == '}').to_string();
                (key, params.get(i).cloned().unwrap_or_default())
            })
            .collect();

        Ok(ParsedCommand { name, params, vars })
    }
}

/// Split a command payload into its name and positional parameters.
pub fn split(data: &[u8]) -> Result<(String, Vec<String>)> {
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::InvalidCommand(format!("not utf-8: {e}")))?;
    let mut parts = text.split(SEPARATOR);
    let name = parts.next().unwrap_or_default();
    if name.is_empty() {
        return Err(Error::InvalidCommand("empty command name".to_string()));
    }
    Ok((name.to_string(), parts.map(str::to_string).collect()))
}

/// Recognize a `subscribe/<cmd>` or `unsubscribe/<cmd>` control message.
pub fn parse_control(data: &[u8]) -> Option<Control> {
    let (name, params) = split(data).ok()?;
    let target = params.into_iter().next().filter(|t| !t.is_empty())?;
    match name.as_str() {
        CMD_SUBSCRIBE => Some(Control::Subscribe(target)),
        CMD_UNSUBSCRIBE => Some(Control::Unsubscribe(target)),
        _ => None,
    }
}

/// Encode a control message for `command`.
pub fn subscribe_message(command: &str) -> String {
    format!("{CMD_SUBSCRIBE}{SEPARATOR}{command}")
}

pub fn unsubscribe_message(command: &str) -> String {
    format!("{CMD_UNSUBSCRIBE}{SEPARATOR}{command}")
}
