//! Typed commands and their lifecycle.
//!
//! A [`Command`] is built once per request line, consumed once by a worker and
//! then only read. Its lifecycle is
//! `Created -> (stale) -> Enqueued -> Invoked -> Completed`; a stale command is
//! completed without ever touching the device.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::{
    psu::{Hm305, Setpoints},
    register::{ProtectionFlags, State},
    setting::Parameter,
};

/// Which worker a command runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Needs a round trip on the serial link.
    Serial,
    /// Only touches the setpoint caches.
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandKind {
    /// Fresh reading of the live value.
    Measure(Parameter),
    /// Clamp and write a setpoint to the device. The server splits this into
    /// [`SetSetpoint`](Self::SetSetpoint) followed by [`Apply`](Self::Apply).
    Set(Parameter, f64),
    SetSetpoint(Parameter, f64),
    /// The cached setpoint.
    Setpoint(Parameter),
    Increment(Parameter, f64),
    /// Push the cached setpoint to the device.
    Apply(Parameter),
    Output,
    SetOutput(State),
    Buzzer,
    SetBuzzer(State),
    Power,
    Protection,
    Model,
}

impl CommandKind {
    pub fn lane(&self) -> Lane {
        match self {
            CommandKind::SetSetpoint(..) | CommandKind::Setpoint(_) | CommandKind::Increment(..) => {
                Lane::Fast
            }
            _ => Lane::Serial,
        }
    }

    pub fn uses_serial_port(&self) -> bool {
        self.lane() == Lane::Serial
    }

    /// Whether the client waits for the outcome instead of getting `DONE`.
    pub fn wait_for_result(&self) -> bool {
        !matches!(
            self,
            CommandKind::Apply(_) | CommandKind::SetOutput(_) | CommandKind::SetBuzzer(_)
        )
    }
}

/// What a completed command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(f64),
    Switch(State),
    Word(u16),
    Protection(ProtectionFlags),
    /// The command ran (or was rejected) without a usable result.
    Failed(String),
}

impl core::fmt::Display for Outcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Outcome::Value(value) => write!(f, "{value:.3}"),
            Outcome::Switch(state) => write!(f, "{state}"),
            Outcome::Word(word) => write!(f, "{word}"),
            Outcome::Protection(flags) => write!(f, "{flags}"),
            Outcome::Failed(reason) => write!(f, "error: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Created,
    Enqueued,
    Invoked,
    Completed,
}

/// One "apply pending" flag per parameter.
///
/// While an apply command for a parameter is waiting in the serial queue, any
/// further apply for that parameter is built stale: the pending one will push
/// the latest cached value anyway.
#[derive(Debug, Default)]
pub struct ApplyGuards {
    voltage: AtomicBool,
    current: AtomicBool,
}

impl ApplyGuards {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn flag(&self, parameter: Parameter) -> &AtomicBool {
        match parameter {
            Parameter::Voltage => &self.voltage,
            Parameter::Current => &self.current,
        }
    }

    pub fn is_pending(&self, parameter: Parameter) -> bool {
        self.flag(parameter).load(Ordering::Acquire)
    }

    /// Take the flag for `parameter`, unless someone else holds it.
    pub fn try_claim(self: &Arc<Self>, parameter: Parameter) -> Option<ApplyClaim> {
        self.flag(parameter)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ApplyClaim {
                guards: Arc::clone(self),
                parameter,
            })
    }
}

/// Holds an [`ApplyGuards`] flag; clears it when dropped.
#[derive(Debug)]
pub struct ApplyClaim {
    guards: Arc<ApplyGuards>,
    parameter: Parameter,
}

impl Drop for ApplyClaim {
    fn drop(&mut self) {
        self.guards
            .flag(self.parameter)
            .store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct Status {
    phase: Phase,
    stale: bool,
    result: Option<Outcome>,
    claim: Option<ApplyClaim>,
}

#[derive(Debug)]
pub struct Command {
    kind: CommandKind,
    status: Mutex<Status>,
    completed: Condvar,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            status: Mutex::new(Status {
                phase: Phase::Created,
                stale: false,
                result: None,
                claim: None,
            }),
            completed: Condvar::new(),
        }
    }

    /// An apply command, stale from the start if another apply of the same
    /// parameter is still pending.
    pub fn apply(parameter: Parameter, guards: &Arc<ApplyGuards>) -> Self {
        let command = Self::new(CommandKind::Apply(parameter));
        match guards.try_claim(parameter) {
            Some(claim) => command.status.lock().claim = Some(claim),
            None => {
                debug!("{} apply already pending, coalescing", parameter);
                command.status.lock().stale = true;
            }
        }
        command
    }

    /// A command whose argument could not be understood. It is stale and
    /// already carries the failure.
    pub fn rejected(kind: CommandKind, reason: impl Into<String>) -> Self {
        let command = Self::new(kind);
        {
            let mut status = command.status.lock();
            status.stale = true;
            status.result = Some(Outcome::Failed(reason.into()));
        }
        command
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn lane(&self) -> Lane {
        self.kind.lane()
    }

    pub fn uses_serial_port(&self) -> bool {
        self.kind.uses_serial_port()
    }

    pub fn phase(&self) -> Phase {
        self.status.lock().phase
    }

    pub fn is_stale(&self) -> bool {
        self.status.lock().stale
    }

    pub fn is_complete(&self) -> bool {
        self.phase() == Phase::Completed
    }

    pub fn result(&self) -> Option<Outcome> {
        self.status.lock().result.clone()
    }

    /// Whether the client should see the outcome rather than `DONE`.
    pub fn reports_result(&self) -> bool {
        self.kind.wait_for_result() || self.status.lock().result.is_some()
    }

    /// Skip this command when its turn comes. Releases any apply flag it holds.
    pub fn mark_stale(&self) {
        let mut status = self.status.lock();
        status.stale = true;
        status.claim = None;
    }

    pub(crate) fn mark_enqueued(&self) {
        let mut status = self.status.lock();
        if status.phase == Phase::Created {
            status.phase = Phase::Enqueued;
        }
    }

    /// Complete a stale command without doing anything.
    pub fn skip(&self) {
        debug!("skipping stale {:?}", self.kind);
        self.finish(None);
    }

    /// Run on the serial worker, which has the device all to itself.
    pub fn invoke_serial<S, const L: usize>(&self, psu: &mut Hm305<S, L>)
    where
        S: embedded_io::Read + embedded_io::Write,
    {
        if !self.begin() {
            return;
        }
        let outcome = match self.kind {
            CommandKind::Measure(parameter) => psu.read_measurement(parameter).map(Outcome::Value),
            CommandKind::Set(parameter, value) => {
                psu.push_setpoint(parameter, value).map(Outcome::Value)
            }
            CommandKind::Apply(parameter) => psu.apply(parameter).map(Outcome::Value),
            CommandKind::Output => psu.get_output_state().map(Outcome::Switch),
            CommandKind::SetOutput(state) => psu.set_output_state(state).map(|_| Outcome::Switch(state)),
            CommandKind::Buzzer => psu.get_buzzer_state().map(Outcome::Switch),
            CommandKind::SetBuzzer(state) => psu.set_buzzer_state(state).map(|_| Outcome::Switch(state)),
            CommandKind::Power => psu.read_power_w().map(Outcome::Value),
            CommandKind::Protection => psu.get_protection_status().map(Outcome::Protection),
            CommandKind::Model => psu.get_model().map(Outcome::Word),
            CommandKind::SetSetpoint(..) | CommandKind::Setpoint(_) | CommandKind::Increment(..) => {
                Ok(self.run_fast(psu.setpoints()))
            }
        };
        let outcome = outcome.unwrap_or_else(|e| {
            error!("{:?} failed: {}", self.kind, e);
            Outcome::Failed(e.to_string())
        });
        self.finish(Some(outcome));
    }

    /// Run on the fast worker. Serial commands never get here.
    pub fn invoke_fast(&self, setpoints: &Setpoints) {
        if !self.begin() {
            return;
        }
        let outcome = if self.uses_serial_port() {
            error!("{:?} reached the fast worker", self.kind);
            Outcome::Failed("requires the serial port".into())
        } else {
            self.run_fast(setpoints)
        };
        self.finish(Some(outcome));
    }

    fn run_fast(&self, setpoints: &Setpoints) -> Outcome {
        match self.kind {
            CommandKind::SetSetpoint(parameter, value) => {
                setpoints.get(parameter).set_cached_setpoint(value);
                Outcome::Value(value)
            }
            CommandKind::Setpoint(parameter) => {
                Outcome::Value(setpoints.get(parameter).cached_setpoint())
            }
            CommandKind::Increment(parameter, delta) => {
                Outcome::Value(setpoints.get(parameter).increment(delta))
            }
            other => Outcome::Failed(format!("{other:?} needs the serial port")),
        }
    }

    /// Move to `Invoked`, releasing the apply flag. Stale commands are skipped instead.
    fn begin(&self) -> bool {
        let mut status = self.status.lock();
        if status.stale {
            drop(status);
            self.skip();
            return false;
        }
        status.phase = Phase::Invoked;
        status.claim = None;
        true
    }

    fn finish(&self, outcome: Option<Outcome>) {
        let mut status = self.status.lock();
        status.claim = None;
        if outcome.is_some() {
            status.result = outcome;
        }
        status.phase = Phase::Completed;
        self.completed.notify_all();
    }

    /// Block until a worker has completed this command.
    pub fn wait(&self) {
        let mut status = self.status.lock();
        while status.phase != Phase::Completed {
            self.completed.wait(&mut status);
        }
    }

    /// Split a top-level set into its cache update and the parameter to apply.
    ///
    /// The apply must only be built with [`Command::apply`] once the update has
    /// completed, so that a coalesced apply still finds the new value in the
    /// cache. Returns `None` for anything else, including a rejected set.
    pub fn split_set(&self) -> Option<(Command, Parameter)> {
        match self.kind {
            CommandKind::Set(parameter, value) if !self.is_stale() => Some((
                Command::new(CommandKind::SetSetpoint(parameter, value)),
                parameter,
            )),
            _ => None,
        }
    }

    /// Text sent back to the client, without the line terminator.
    pub fn response(&self) -> String {
        match &self.status.lock().result {
            Some(outcome) => outcome.to_string(),
            None => "DONE".to_string(),
        }
    }
}
