//! Simulated Isotope board for testing
//!
//! An in-memory [`CommunicationChannel`] that answers like the firmware does,
//! so the whole stack can run without hardware. Long-running commands reply
//! `ACK` at once and complete later under the same sequence number; those
//! delayed replies are released by the read side as their time comes.
//!
//! The [`SimulatedBoardHandle`] returned next to the board steers it after the
//! channel has been handed to a connection (forced error codes, dropped
//! completion notifications, muted replies, raw line injection) and records
//! every command received.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::port::Capability;
use crate::protocol::frame::{decode_command, encode_reply};
use crate::protocol::{
    Command, CommandKind, CommunicationChannel, Reply, ReplyStatus, Section, BOARD_NAME,
};

/// Identity payload of a current-firmware board
pub fn identity_payload(name: &str, firmware: &str) -> String {
    format!("name={},firmware={}", name, firmware)
}

#[derive(Debug, Clone, Copy, Default)]
struct MotorSim {
    enabled: bool,
    /// Sequence of the motion in progress
    in_flight: Option<u16>,
    busy_until: Option<Instant>,
}

impl MotorSim {
    fn is_busy(&self, now: Instant) -> bool {
        self.in_flight.is_some() && self.busy_until.is_some_and(|until| until > now)
    }
}

struct Scheduled {
    due: Instant,
    reply: Reply,
    /// Motor whose motion this reply completes
    motor: Option<usize>,
}

struct State {
    /// Bytes waiting to be read by the host
    output: VecDeque<u8>,
    /// Partial line written by the host
    input: Vec<u8>,
    scheduled: Vec<Scheduled>,
    commands: Vec<(u16, Command)>,
    identity: String,
    forced: HashMap<Section, String>,
    drop_completions: bool,
    muted: bool,
    fail_writes: bool,
    closed: bool,
    motion_duration: Duration,
    temperature_delay: Duration,
    temperatures: HashMap<usize, i64>,
    analog_values: HashMap<usize, i64>,
    /// Last value written per (section, item)
    stored: HashMap<(Section, usize), Vec<i64>>,
    motors: Vec<MotorSim>,
    rng: StdRng,
}

impl State {
    fn new(seed: u64) -> Self {
        Self {
            output: VecDeque::new(),
            input: Vec::new(),
            scheduled: Vec::new(),
            commands: Vec::new(),
            identity: identity_payload(BOARD_NAME, "1.0.0"),
            forced: HashMap::new(),
            drop_completions: false,
            muted: false,
            fail_writes: false,
            closed: false,
            motion_duration: Duration::from_millis(50),
            temperature_delay: Duration::from_millis(20),
            temperatures: HashMap::new(),
            analog_values: HashMap::new(),
            stored: HashMap::new(),
            motors: vec![MotorSim::default(); Capability::Motor.port_count()],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn push(&mut self, reply: &Reply) {
        self.output.extend(encode_reply(reply).into_bytes());
    }

    fn schedule(&mut self, delay: Duration, reply: Reply, motor: Option<usize>) {
        self.scheduled.push(Scheduled {
            due: Instant::now() + delay,
            reply,
            motor,
        });
    }

    fn next_due(&self) -> Option<Instant> {
        self.scheduled.iter().map(|s| s.due).min()
    }

    /// Move every scheduled reply whose time has come to the output
    fn release_due(&mut self, now: Instant) {
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|s| s.due <= now);
        self.scheduled = later;

        for scheduled in due {
            if let Some(motor) = scheduled.motor {
                let sim = &mut self.motors[motor];
                if sim.in_flight == Some(scheduled.reply.sequence) {
                    sim.in_flight = None;
                    sim.busy_until = None;
                }
                if self.drop_completions {
                    continue;
                }
            }
            if !self.muted {
                self.push(&scheduled.reply);
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let (sequence, command) = match decode_command(line) {
            Ok(decoded) => decoded,
            Err(_) => {
                // Answer ERR0 if at least the sequence can be recovered
                let seq = serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .and_then(|v| v.get("seq").and_then(|s| s.as_u64()))
                    .and_then(|s| u16::try_from(s).ok());
                if let (Some(seq), false) = (seq, self.muted) {
                    self.push(&Reply::new(seq, "", ReplyStatus::from_code("ERR0")));
                }
                return;
            }
        };

        self.commands.push((sequence, command.clone()));
        if self.muted {
            return;
        }
        if let Some(code) = self.forced.get(&command.section).cloned() {
            self.push(&Reply::new(sequence, "", ReplyStatus::from_code(&code)));
            return;
        }

        let reply = self.respond(sequence, &command);
        self.push(&reply);
    }

    /// Immediate reply to a command, scheduling any later one
    fn respond(&mut self, seq: u16, command: &Command) -> Reply {
        let suc = |payload: String| Reply::new(seq, payload, ReplyStatus::Succeeded);
        let err = |code: &str| Reply::new(seq, "", ReplyStatus::from_code(code));

        let item = command.item;
        let first = command.values.first().copied().unwrap_or(0);
        if let Some(limit) = item_limit(command.section) {
            if item >= limit {
                return err("ERR3");
            }
        }

        match (command.kind, command.section) {
            (CommandKind::Get, Section::WhoIAm) => suc(self.identity.clone()),
            (CommandKind::Get, Section::IdValue) => suc("0".to_string()),
            (CommandKind::Set, Section::Heartbeat) => suc(String::new()),

            (CommandKind::Set, Section::PowerOutput) if (0..=1024).contains(&first) => {
                self.store(command);
                suc(String::new())
            }
            (CommandKind::Set, Section::PwmEnable | Section::PwmMode) if matches!(first, 0 | 1) => {
                self.store(command);
                suc(String::new())
            }
            (CommandKind::Set, Section::PwmOutput) => {
                let max = match command.values.get(1).copied().unwrap_or(0) {
                    0 => 1024,
                    1 => 20,
                    _ => return err("ERR4"),
                };
                if !(0..=max).contains(&first) {
                    return err("ERR4");
                }
                self.store(command);
                suc(String::new())
            }
            (CommandKind::Set, Section::RgbRed | Section::RgbGreen | Section::RgbBlue)
                if (0..=255).contains(&first) =>
            {
                self.store(command);
                suc(String::new())
            }
            (
                CommandKind::Set,
                Section::MotorStepAngle | Section::MotorRpmSpeed | Section::MotorCurrentMilliamps,
            ) if first >= 0 => {
                self.store(command);
                suc(String::new())
            }

            (CommandKind::Get, Section::AnalogInput) => {
                let value = match self.analog_values.get(&item) {
                    Some(value) => *value,
                    None => self.rng.gen_range(0..1024),
                };
                suc(value.to_string())
            }
            (CommandKind::Get, Section::TempSensor) => {
                let value = self.temperatures.get(&item).copied().unwrap_or(25);
                if self.temperature_delay.is_zero() {
                    return suc(value.to_string());
                }
                let later = suc(value.to_string());
                self.schedule(self.temperature_delay, later, None);
                Reply::new(seq, "", ReplyStatus::Acknowledged)
            }

            (CommandKind::Set, Section::MotorEnable) if matches!(first, 0 | 1) => {
                // Entering or leaving stand-by cancels any motion
                if let Some(previous) = self.motors[item].in_flight.take() {
                    self.scheduled.retain(|s| s.reply.sequence != previous);
                    self.push(&Reply::new(previous, "", ReplyStatus::Aborted));
                }
                self.motors[item] = MotorSim {
                    enabled: first == 1,
                    ..Default::default()
                };
                suc(String::new())
            }
            (CommandKind::Set, Section::MotorStep) => {
                if !self.motors[item].enabled {
                    return err("ERR");
                }
                if let Some(previous) = self.motors[item].in_flight.take() {
                    self.scheduled.retain(|s| s.reply.sequence != previous);
                    self.push(&Reply::new(previous, "", ReplyStatus::Aborted));
                }
                if self.motion_duration.is_zero() {
                    return suc(String::new());
                }
                let now = Instant::now();
                self.motors[item].in_flight = Some(seq);
                self.motors[item].busy_until = Some(now + self.motion_duration);
                self.schedule(self.motion_duration, suc(String::new()), Some(item));
                Reply::new(seq, "", ReplyStatus::Acknowledged)
            }
            (CommandKind::Get, Section::MotorBusy) => {
                let busy = self.motors[item].is_busy(Instant::now());
                suc(if busy { "1" } else { "0" }.to_string())
            }
            (CommandKind::Get, Section::MotorEnable) => {
                suc(if self.motors[item].enabled { "1" } else { "0" }.to_string())
            }

            (CommandKind::Get, section) if self.stored.contains_key(&(section, item)) => {
                let value = self.stored[&(section, item)].first().copied().unwrap_or(0);
                suc(value.to_string())
            }
            (CommandKind::Get, _) => suc("0".to_string()),
            (CommandKind::Set, Section::WhoIAm | Section::IdValue | Section::AnalogInput) => {
                err("ERR1")
            }
            (CommandKind::Set, Section::MotorBusy | Section::TempSensor) => err("ERR1"),
            (CommandKind::Set, _) => err("ERR4"),
        }
    }

    fn store(&mut self, command: &Command) {
        self.stored
            .insert((command.section, command.item), command.values.clone());
    }
}

/// Number of items the firmware accepts for a section
fn item_limit(section: Section) -> Option<usize> {
    match section {
        Section::PowerOutput => Some(Capability::PowerOutput.port_count()),
        Section::PwmOutput | Section::PwmMode => Some(Capability::PwmOutput.port_count()),
        Section::AnalogInput => Some(Capability::AdcInput.port_count()),
        Section::TempSensor => Some(Capability::TempInput.port_count()),
        Section::MotorStep
        | Section::MotorRpmSpeed
        | Section::MotorStepAngle
        | Section::MotorCurrentMilliamps
        | Section::MotorEnable
        | Section::MotorBusy => Some(Capability::Motor.port_count()),
        Section::PwmEnable | Section::RgbRed | Section::RgbGreen | Section::RgbBlue => Some(1),
        Section::WhoIAm | Section::IdValue | Section::Heartbeat => None,
    }
}

struct Shared {
    state: Mutex<State>,
    readable: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory board implementing [`CommunicationChannel`]
pub struct SimulatedBoard {
    shared: Arc<Shared>,
    timeout: Duration,
}

impl SimulatedBoard {
    /// Board with a fixed RNG seed
    pub fn new() -> (Self, SimulatedBoardHandle) {
        Self::with_seed(0x1507)
    }

    pub fn with_seed(seed: u64) -> (Self, SimulatedBoardHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::new(seed)),
            readable: Condvar::new(),
        });
        let board = Self {
            shared: shared.clone(),
            timeout: Duration::from_millis(10),
        };
        (board, SimulatedBoardHandle { shared })
    }
}

impl Read for SimulatedBoard {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.shared.lock();

        loop {
            let now = Instant::now();
            state.release_due(now);

            if !state.output.is_empty() {
                let n = buf.len().min(state.output.len());
                for (slot, byte) in buf.iter_mut().zip(state.output.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            if now >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }

            let mut wait = deadline - now;
            if let Some(due) = state.next_due() {
                wait = wait.min(due.saturating_duration_since(now));
            }
            state = self
                .shared
                .readable
                .wait_timeout(state, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

impl Write for SimulatedBoard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        if state.fail_writes || state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated board unplugged",
            ));
        }

        state.input.extend_from_slice(buf);
        while let Some(end) = state.input.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = state.input.drain(..=end).collect();
            state.handle_line(&String::from_utf8_lossy(&raw));
        }
        drop(state);
        self.shared.readable.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for SimulatedBoard {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.shared.lock().output.clear();
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        Ok(Box::new(SimulatedBoard {
            shared: self.shared.clone(),
            timeout: self.timeout,
        }))
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}

/// Test-side control over a [`SimulatedBoard`]
#[derive(Clone)]
pub struct SimulatedBoardHandle {
    shared: Arc<Shared>,
}

impl SimulatedBoardHandle {
    fn update(&self, f: impl FnOnce(&mut State)) {
        f(&mut self.shared.lock());
        self.shared.readable.notify_all();
    }

    /// Queue raw bytes for the host to read, exactly as given
    pub fn inject_raw(&self, data: &str) {
        self.update(|state| state.output.extend(data.as_bytes()));
    }

    /// Queue a reply frame
    pub fn inject_reply(&self, reply: &Reply) {
        self.update(|state| state.push(reply));
    }

    /// Payload answered to `GET Who_I_am`
    pub fn set_identity(&self, payload: impl Into<String>) {
        let payload = payload.into();
        self.update(|state| state.identity = payload);
    }

    /// Answer every command for `section` with `code` (e.g. `"ERR5"`)
    pub fn force_status(&self, section: Section, code: &str) {
        let code = code.to_string();
        self.update(|state| {
            state.forced.insert(section, code);
        });
    }

    pub fn clear_forced(&self, section: Section) {
        self.update(|state| {
            state.forced.remove(&section);
        });
    }

    /// Complete motions silently, without the `SUC` notification
    pub fn set_drop_completions(&self, drop: bool) {
        self.update(|state| state.drop_completions = drop);
    }

    /// Stop answering (commands are still recorded)
    pub fn set_muted(&self, muted: bool) {
        self.update(|state| state.muted = muted);
    }

    /// Make host writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.update(|state| state.fail_writes = fail);
    }

    /// Time a `Motor_step` takes; zero completes in the first reply
    pub fn set_motion_duration(&self, duration: Duration) {
        self.update(|state| state.motion_duration = duration);
    }

    /// Time a temperature conversion takes; zero answers in the first reply
    pub fn set_temperature_delay(&self, delay: Duration) {
        self.update(|state| state.temperature_delay = delay);
    }

    pub fn set_temperature(&self, item: usize, celsius: i64) {
        self.update(|state| {
            state.temperatures.insert(item, celsius);
        });
    }

    /// Fix the reading of an analogue input instead of a random one
    pub fn set_analog_value(&self, item: usize, value: i64) {
        self.update(|state| {
            state.analog_values.insert(item, value);
        });
    }

    /// Simulate the cable being pulled: reads hit end of stream, writes fail
    pub fn unplug(&self) {
        self.update(|state| state.closed = true);
    }

    /// Every command received so far, with its sequence number
    pub fn commands(&self) -> Vec<(u16, Command)> {
        self.shared.lock().commands.clone()
    }

    /// Commands received for one section
    pub fn commands_for(&self, section: Section) -> Vec<(u16, Command)> {
        self.shared
            .lock()
            .commands
            .iter()
            .filter(|(_, command)| command.section == section)
            .cloned()
            .collect()
    }

    pub fn clear_commands(&self) {
        self.shared.lock().commands.clear();
    }

    /// Last values written to `(section, item)`
    pub fn stored(&self, section: Section, item: usize) -> Option<Vec<i64>> {
        self.shared.lock().stored.get(&(section, item)).cloned()
    }

    pub fn is_motor_enabled(&self, item: usize) -> bool {
        self.shared
            .lock()
            .motors
            .get(item)
            .is_some_and(|motor| motor.enabled)
    }

    pub fn is_motor_busy(&self, item: usize) -> bool {
        self.shared
            .lock()
            .motors
            .get(item)
            .is_some_and(|motor| motor.is_busy(Instant::now()))
    }
}
