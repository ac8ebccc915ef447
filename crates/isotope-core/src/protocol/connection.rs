//! Connection management
//!
//! Handles the connection lifecycle with the board: opening the link,
//! starting the reader, the firmware handshake, the heartbeat, and teardown.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::Span;

use super::{
    Command, CommunicationChannel, Dispatcher, IsotopeError, ReaderTask, ResponseRegistry,
    Result, Section, Transport, BOARD_NAME, LEGACY_BOARD_NAME,
};
use crate::config::ConnectionConfig;
use crate::firmware::FirmwareVersion;

/// Connection to one Isotope board
pub struct Connection {
    config: ConnectionConfig,
    transport: Arc<Transport>,
    registry: Arc<ResponseRegistry>,
    dispatcher: Arc<Dispatcher>,
    reader: Option<ReaderTask>,
    heartbeat: Option<HeartbeatTask>,
    /// Firmware version (after handshake)
    firmware: Option<FirmwareVersion>,
    span: Span,
}

impl Connection {
    /// Create a new connection (not yet connected)
    pub fn new(config: ConnectionConfig) -> Self {
        let span = tracing::info_span!("isotope", address = %config.address);
        let transport = Arc::new(Transport::new(span.clone()));
        let registry = Arc::new(ResponseRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            transport.clone(),
            registry.clone(),
            config.response_timeout(),
            span.clone(),
        ));

        Self {
            config,
            transport,
            registry,
            dispatcher,
            reader: None,
            heartbeat: None,
            firmware: None,
            span,
        }
    }

    /// Open the configured address and run the handshake
    pub fn connect(&mut self) -> Result<FirmwareVersion> {
        if self.is_connected() {
            return Err(IsotopeError::AlreadyConnected);
        }

        tracing::info!(parent: &self.span, "Connecting to Isotope board");
        self.transport.open(
            &self.config.address,
            self.config.baud_rate,
            self.config.reader_poll_interval(),
        )?;
        self.start()
    }

    /// Run the connection over an already open channel (simulated board,
    /// custom links) instead of the configured address
    pub fn connect_with_channel(
        &mut self,
        channel: Box<dyn CommunicationChannel>,
    ) -> Result<FirmwareVersion> {
        if self.is_connected() {
            return Err(IsotopeError::AlreadyConnected);
        }

        self.transport
            .attach(channel, self.config.reader_poll_interval())?;
        self.start()
    }

    fn start(&mut self) -> Result<FirmwareVersion> {
        self.registry.clear();
        self.dispatcher.reset_sequence(0);

        match self.start_tasks() {
            Ok(firmware) => {
                tracing::info!(parent: &self.span, %firmware, "Connected to Isotope board");
                Ok(firmware)
            }
            Err(e) => {
                tracing::error!(parent: &self.span, "Connection failed: {}", e);
                self.disconnect();
                Err(e)
            }
        }
    }

    fn start_tasks(&mut self) -> Result<FirmwareVersion> {
        let line_reader = self
            .transport
            .take_reader()
            .ok_or(IsotopeError::NotConnected)?;
        self.reader = Some(ReaderTask::spawn(
            line_reader,
            self.transport.clone(),
            self.registry.clone(),
            self.config.reader_poll_interval(),
            self.span.clone(),
        )?);

        let firmware = self.handshake()?;
        self.firmware = Some(firmware);

        if !self.config.heartbeat_interval().is_zero() {
            self.heartbeat = Some(HeartbeatTask::spawn(
                self.dispatcher.clone(),
                self.config.heartbeat_interval(),
                self.span.clone(),
            )?);
            tracing::debug!(parent: &self.span, "Heartbeat thread started");
        }

        Ok(firmware)
    }

    /// Ask the board who it is and check its firmware against the floor
    fn handshake(&self) -> Result<FirmwareVersion> {
        let reply = self.dispatcher.request(&Command::get(Section::WhoIAm, 0))?;
        if !reply.is_succeeded() {
            return Err(IsotopeError::BoardNotFound(format!(
                "no valid reply to {} ({})",
                Section::WhoIAm,
                reply.status
            )));
        }

        let firmware = parse_identity(&reply.payload, self.config.minimum_firmware)?;
        tracing::debug!(parent: &self.span, %firmware, "Found Isotope board");
        Ok(firmware)
    }

    /// Stop the background tasks and close the link.
    ///
    /// Safe to call any number of times; also runs on drop.
    pub fn disconnect(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        if let Some(mut reader) = self.reader.take() {
            reader.stop();
        }

        let was_connected = self.transport.is_open();
        self.transport.close();
        self.registry.clear();
        self.firmware = None;

        if was_connected {
            tracing::info!(parent: &self.span, "Disconnected from Isotope board");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Firmware reported during the handshake
    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.firmware
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Parse a `Who_I_am` payload and enforce the firmware floor.
///
/// Accepts `name=<board>,firmware=<a.b.c>` and the bare legacy board name,
/// which stands for firmware 0.0.0.
pub fn parse_identity(payload: &str, minimum: FirmwareVersion) -> Result<FirmwareVersion> {
    let payload = payload.trim();
    if payload == LEGACY_BOARD_NAME {
        if minimum.is_zero() {
            return Ok(FirmwareVersion::ZERO);
        }
        return Err(IsotopeError::IncompatibleFirmware {
            required: minimum,
            found: FirmwareVersion::ZERO,
        });
    }

    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() != 2 {
        return Err(IsotopeError::InvalidFirmwareFormat(payload.to_string()));
    }

    let mut name = None;
    let mut firmware = None;
    for field in fields {
        match field.split_once('=').map(|(k, v)| (k.trim(), v.trim())) {
            Some(("name", value)) => name = Some(value),
            Some(("firmware", value)) => firmware = Some(value),
            _ => return Err(IsotopeError::InvalidFirmwareFormat(payload.to_string())),
        }
    }

    if name != Some(BOARD_NAME) {
        return Err(IsotopeError::BoardNotFound(payload.to_string()));
    }

    let found: FirmwareVersion = firmware
        .ok_or_else(|| IsotopeError::InvalidFirmwareFormat(payload.to_string()))?
        .parse()?;
    if found < minimum {
        return Err(IsotopeError::IncompatibleFirmware {
            required: minimum,
            found,
        });
    }
    Ok(found)
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    /// Sleep up to `timeout`; true if stop was requested
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }

    fn raise(&self) {
        *self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        self.wake.notify_all();
    }
}

/// Keeps the link alive when the caller is quiet
struct HeartbeatTask {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatTask {
    fn spawn(dispatcher: Arc<Dispatcher>, interval: Duration, span: Span) -> Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let stop = signal.clone();

        let handle = thread::Builder::new()
            .name("isotope-heartbeat".to_string())
            .spawn(move || {
                let heartbeat = Command::set(Section::Heartbeat, 0, 0);
                let mut pause = interval;
                while !stop.wait(pause) {
                    // Any command counts as a sign of life
                    if let Some(idle) = dispatcher.idle_for() {
                        if idle < interval {
                            pause = interval - idle;
                            continue;
                        }
                    }
                    if let Err(e) = dispatcher.send_unacknowledged(&heartbeat) {
                        tracing::error!(parent: &span, "Heartbeat failed: {}", e);
                    }
                    pause = interval;
                }
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.signal.raise();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: FirmwareVersion = FirmwareVersion::new(1, 0, 0);

    #[test]
    fn test_identity_accepted() {
        let found = parse_identity("name=Isotope Board,firmware=1.2.3", V1).unwrap();
        assert_eq!(found, FirmwareVersion::new(1, 2, 3));
    }

    #[test]
    fn test_identity_below_floor() {
        let err = parse_identity(
            "name=Isotope Board,firmware=1.0.0",
            FirmwareVersion::new(1, 1, 0),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            IsotopeError::IncompatibleFirmware { required, found }
                if required == FirmwareVersion::new(1, 1, 0) && found == V1
        ));
    }

    #[test]
    fn test_legacy_identity() {
        assert_eq!(
            parse_identity("ISOTOPE_BOARD", FirmwareVersion::ZERO).unwrap(),
            FirmwareVersion::ZERO
        );
        assert!(matches!(
            parse_identity("ISOTOPE_BOARD", V1),
            Err(IsotopeError::IncompatibleFirmware { .. })
        ));
    }

    #[test]
    fn test_identity_wrong_board() {
        assert!(matches!(
            parse_identity("name=Other Board,firmware=2.0.0", V1),
            Err(IsotopeError::BoardNotFound(_))
        ));
    }

    #[test]
    fn test_identity_bad_format() {
        for payload in [
            "",
            "name=Isotope Board",
            "name=Isotope Board,firmware=1.0",
            "name=Isotope Board;firmware=1.0.0",
            "name=Isotope Board,version=1.0.0",
        ] {
            assert!(
                matches!(
                    parse_identity(payload, V1),
                    Err(IsotopeError::InvalidFirmwareFormat(_))
                ),
                "{payload:?}"
            );
        }
    }

    #[test]
    fn test_stop_signal_wakes_sleeper() {
        let signal = Arc::new(StopSignal::default());
        let waiter = signal.clone();
        let handle = thread::spawn(move || waiter.wait(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        signal.raise();
        assert!(handle.join().unwrap());
        assert!(!StopSignal::default().wait(Duration::from_millis(1)));
    }
}
