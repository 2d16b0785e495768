//! Turns request lines into [`Command`]s.
//!
//! A line is `NAME`, `NAME?` or `NAME ARGUMENT`. Names are looked up in a
//! [`CommandRegistry`], case-insensitively and on the full mnemonic, so
//! `VOLTage:SETPoint` is spelled `voltage:setpoint` or `VOLTAGE:SETPOINT`.

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    command::{ApplyGuards, Command, CommandKind},
    error::CommandError,
    register::State,
    setting::Parameter,
};

/// A request line split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    pub name: &'a str,
    pub argument: Option<&'a str>,
    pub query: bool,
}

/// Split a line into name, optional argument and the query marker.
pub fn parse_line(line: &str) -> Result<ParsedLine<'_>, CommandError> {
    let line = line.trim();
    let query = line.ends_with('?');
    let body = line.trim_matches(|c: char| c == '?' || c.is_whitespace());

    let mut tokens = body.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| CommandError::Parse("empty request".into()))?;
    let argument = tokens.next();
    if tokens.next().is_some() {
        return Err(CommandError::Parse(format!("too many tokens in '{body}'")));
    }
    Ok(ParsedLine {
        name,
        argument,
        query,
    })
}

/// The mutating side of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutateKind {
    Set(Parameter),
    SetSetpoint(Parameter),
    Increment(Parameter),
    Apply(Parameter),
    Output,
    Buzzer,
}

impl MutateKind {
    pub fn takes_argument(self) -> bool {
        !matches!(self, MutateKind::Apply(_))
    }

    fn build(
        self,
        argument: Option<&str>,
        guards: &Arc<ApplyGuards>,
    ) -> Result<Command, CommandError> {
        let argument = match (self, argument) {
            (MutateKind::Apply(parameter), None) => return Ok(Command::apply(parameter, guards)),
            (MutateKind::Apply(_), Some(_)) => {
                return Err(CommandError::Parse("unexpected argument".into()));
            }
            (_, None) => return Err(CommandError::Parse("missing argument".into())),
            (_, Some(argument)) => argument,
        };

        let command = match self {
            MutateKind::Set(parameter) => number(argument, |x| CommandKind::Set(parameter, x)),
            MutateKind::SetSetpoint(parameter) => {
                number(argument, |x| CommandKind::SetSetpoint(parameter, x))
            }
            MutateKind::Increment(parameter) => {
                number(argument, |x| CommandKind::Increment(parameter, x))
            }
            MutateKind::Output => switch(argument, CommandKind::SetOutput),
            MutateKind::Buzzer => switch(argument, CommandKind::SetBuzzer),
            MutateKind::Apply(parameter) => Command::apply(parameter, guards),
        };
        Ok(command)
    }
}

fn number(argument: &str, make: impl Fn(f64) -> CommandKind) -> Command {
    match argument.parse::<f64>() {
        Ok(value) if value.is_finite() => Command::new(make(value)),
        _ => {
            debug!("bad float '{}'", argument);
            Command::rejected(make(0.0), "bad float")
        }
    }
}

fn switch(argument: &str, make: impl Fn(State) -> CommandKind) -> Command {
    match argument.parse::<State>() {
        Ok(state) => Command::new(make(state)),
        Err(()) => Command::rejected(make(State::Off), "bad on/off"),
    }
}

/// What a name can do. Either side may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Entry {
    pub query: Option<CommandKind>,
    pub mutate: Option<MutateKind>,
}

impl Entry {
    pub fn query(kind: CommandKind) -> Self {
        Self {
            query: Some(kind),
            mutate: None,
        }
    }

    pub fn mutate(kind: MutateKind) -> Self {
        Self {
            query: None,
            mutate: Some(kind),
        }
    }

    pub fn both(query: CommandKind, mutate: MutateKind) -> Self {
        Self {
            query: Some(query),
            mutate: Some(mutate),
        }
    }
}

/// Recognized command names.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: HashMap<String, Entry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The HM305 vocabulary.
    pub fn hm305() -> Self {
        let mut registry = Self::new();
        for (parameter, prefix) in [(Parameter::Voltage, "VOLTage"), (Parameter::Current, "CURRent")] {
            registry.register(
                prefix,
                Entry::both(CommandKind::Measure(parameter), MutateKind::Set(parameter)),
            );
            registry.register(
                &format!("{prefix}:SETPoint"),
                Entry::both(
                    CommandKind::Setpoint(parameter),
                    MutateKind::SetSetpoint(parameter),
                ),
            );
            registry.register(
                &format!("{prefix}:APPLY"),
                Entry::mutate(MutateKind::Apply(parameter)),
            );
            registry.register(
                &format!("{prefix}:INCRement"),
                Entry::mutate(MutateKind::Increment(parameter)),
            );
        }
        registry.register("OUTput", Entry::both(CommandKind::Output, MutateKind::Output));
        registry.register("BEEPer", Entry::both(CommandKind::Buzzer, MutateKind::Buzzer));
        registry.register("POWer", Entry::query(CommandKind::Power));
        registry.register("PROTection", Entry::query(CommandKind::Protection));
        registry.register("MODel", Entry::query(CommandKind::Model));
        registry
    }

    /// Add or replace a name.
    pub fn register(&mut self, name: &str, entry: Entry) {
        self.entries.insert(name.to_ascii_uppercase(), entry);
    }

    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.entries.get(&name.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds commands from text, sharing the dispatcher's apply guards.
#[derive(Debug, Clone)]
pub struct CommandFactory {
    registry: CommandRegistry,
    guards: Arc<ApplyGuards>,
}

impl CommandFactory {
    pub fn new(registry: CommandRegistry, guards: Arc<ApplyGuards>) -> Self {
        Self { registry, guards }
    }

    pub fn guards(&self) -> &Arc<ApplyGuards> {
        &self.guards
    }

    pub fn parse(&self, line: &str) -> Result<Command, CommandError> {
        let parsed = parse_line(line)?;
        let entry = self
            .registry
            .lookup(parsed.name)
            .ok_or_else(|| CommandError::UnknownCommand(parsed.name.to_string()))?;

        if parsed.query {
            let kind = entry
                .query
                .ok_or_else(|| CommandError::UnknownCommand(format!("{}?", parsed.name)))?;
            if parsed.argument.is_some() {
                return Err(CommandError::Parse("query takes no argument".into()));
            }
            Ok(Command::new(kind))
        } else {
            let mutate = entry
                .mutate
                .ok_or_else(|| CommandError::UnknownCommand(parsed.name.to_string()))?;
            mutate.build(parsed.argument, &self.guards)
        }
    }
}
