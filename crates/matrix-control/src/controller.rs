//! Matrix controller
//!
//! [`MatrixController`] is the only writer of the cached [`MatrixState`].
//! Every operation does its device I/O through the [`Transport`] first and
//! only then touches the cache, so the poll loop and foreground callers never
//! race each other on the wire. The cache itself sits behind a short-lived
//! `RwLock` that is never held across an await.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use matrix_protocol::{
    parse_firmware_reply, parse_ip_reply, EncodeCommand, MatrixCommand, MatrixSize, StepDirection,
};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::ControlError;
use crate::events::MatrixEvent;
use crate::state::{DeviceIdentity, MatrixSnapshot, MatrixState};
use crate::transport::{
    Connector, SerialConnector, Transport, DEFAULT_REPLY_LIMIT, IDENTITY_REPLY_LIMIT,
};

/// Capacity of the event channel
const EVENT_CAPACITY: usize = 64;

/// Controller for one matrix
pub struct MatrixController<C: Connector> {
    config: ControllerConfig,
    identity: DeviceIdentity,
    transport: Transport<C>,
    /// Written only after a transport exchange has completed
    state: RwLock<MatrixState>,
    /// Foreground commands queued or on the wire
    in_flight: AtomicUsize,
    events: broadcast::Sender<MatrixEvent>,
}

impl MatrixController<SerialConnector> {
    /// Controller for the serial port named in `config`
    pub fn serial(config: ControllerConfig) -> Self {
        let connector = SerialConnector::new(config.port.clone(), config.baud_rate);
        Self::new(config, connector)
    }
}

impl<C: Connector> MatrixController<C> {
    /// Create a controller; the port is not opened until first use
    pub fn new(config: ControllerConfig, connector: C) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identity: DeviceIdentity::new(&config.port, config.size),
            state: RwLock::new(MatrixState::new(config.size)),
            transport: Transport::new(connector),
            in_flight: AtomicUsize::new(0),
            config,
            events,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Controller configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Identity strings
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Matrix size
    pub fn size(&self) -> MatrixSize {
        self.config.size
    }

    /// Port path or device name
    pub fn port_name(&self) -> &str {
        self.transport.port_name()
    }

    /// Selected input per output
    pub fn routes(&self) -> Vec<u8> {
        self.read_state().routes().to_vec()
    }

    /// Power state per output
    pub fn power(&self) -> Vec<bool> {
        self.read_state().power().to_vec()
    }

    /// Firmware banner, if known
    pub fn firmware(&self) -> Option<String> {
        self.read_state().firmware().map(str::to_string)
    }

    /// Device IP address, if known
    pub fn ip_address(&self) -> Option<String> {
        self.read_state().ip_address().map(str::to_string)
    }

    /// Web interface URL, once the IP address is known
    pub fn configuration_url(&self) -> Option<String> {
        self.read_state()
            .ip_address()
            .map(DeviceIdentity::configuration_url)
    }

    /// Copy of the whole cache
    pub fn snapshot(&self) -> MatrixSnapshot {
        self.read_state().snapshot()
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<MatrixEvent> {
        self.events.subscribe()
    }

    /// Number of foreground commands queued or on the wire
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Route `output` to `input`
    ///
    /// Out-of-range indices are ignored. The device has no way to report
    /// them either.
    pub async fn set_route(&self, output: u8, input: u8) -> Result<(), ControlError> {
        let size = self.size();
        if !size.contains(output) || !size.contains(input) {
            debug!("Ignoring route {} -> {} on a {} matrix", output, input, size);
            return Ok(());
        }

        self.send(&MatrixCommand::Route { output, input }).await?;
        self.write_state().set_route(output, input);
        self.publish_state();
        Ok(())
    }

    /// Switch an output on, keeping its last route
    pub async fn output_on(&self, output: u8) -> Result<(), ControlError> {
        if !self.accepts_output(output) {
            return Ok(());
        }

        self.send(&MatrixCommand::OutputOn { output }).await?;
        self.write_state().power_on(output);
        self.publish_state();
        Ok(())
    }

    /// Switch an output off
    pub async fn output_off(&self, output: u8) -> Result<(), ControlError> {
        if !self.accepts_output(output) {
            return Ok(());
        }

        self.send(&MatrixCommand::OutputOff { output }).await?;
        self.write_state().power_off(output);
        self.publish_state();
        Ok(())
    }

    /// Step an output to the next input, then read back what was selected
    pub async fn next_input(&self, output: u8) -> Result<(), ControlError> {
        self.step(output, StepDirection::Next).await
    }

    /// Step an output to the previous input, then read back what was selected
    pub async fn prev_input(&self, output: u8) -> Result<(), ControlError> {
        self.step(output, StepDirection::Previous).await
    }

    /// Whole-system power; nothing is cached
    pub async fn system_power(&self, on: bool) -> Result<(), ControlError> {
        self.send(&MatrixCommand::SystemPower { on }).await
    }

    /// Factory reset; the next status sync picks up the result
    pub async fn factory_reset(&self) -> Result<(), ControlError> {
        self.send(&MatrixCommand::FactoryReset).await
    }

    /// Write arbitrary bytes to the device, no terminator added
    pub async fn send_raw(&self, payload: &[u8]) -> Result<(), ControlError> {
        let _guard = InFlight::enter(&self.in_flight);
        self.transport.write(payload).await
    }

    /// Sync from the status dump now and publish the result
    ///
    /// Does nothing when no status command is configured.
    pub async fn force_refresh(&self) -> Result<(), ControlError> {
        if self.sync_status().await? {
            self.publish_state();
        }
        Ok(())
    }

    /// Query firmware and IP address, keeping old values on failure
    pub async fn query_info(&self) {
        match self.query_firmware().await {
            Ok(Some(firmware)) => self.write_state().set_firmware(Some(firmware)),
            Ok(None) => debug!("No firmware banner in reply"),
            Err(e) => debug!("Firmware query failed: {}", e),
        }

        match self.query_ip_address().await {
            Ok(ip_address) => self.write_state().set_ip_address(ip_address),
            Err(e) => debug!("IP query failed: {}", e),
        }

        let (firmware, ip_address) = {
            let state = self.read_state();
            (
                state.firmware().map(str::to_string),
                state.ip_address().map(str::to_string),
            )
        };
        info!(
            "Matrix identity: firmware {:?}, IP {:?}",
            firmware, ip_address
        );
        let _ = self.events.send(MatrixEvent::InfoUpdated {
            firmware,
            ip_address,
        });
    }

    /// Ask the device for its firmware banner
    pub async fn query_firmware(&self) -> Result<Option<String>, ControlError> {
        let reply = self
            .exchange(&MatrixCommand::QueryFirmware, IDENTITY_REPLY_LIMIT)
            .await?;
        Ok(parse_firmware_reply(&reply))
    }

    /// Ask the device for its IP address
    pub async fn query_ip_address(&self) -> Result<Option<String>, ControlError> {
        let reply = self
            .exchange(&MatrixCommand::QueryIp, IDENTITY_REPLY_LIMIT)
            .await?;
        Ok(parse_ip_reply(&reply))
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the port, read identity and state, and start polling
    ///
    /// Fails only if the port cannot be opened. A failed first sync is
    /// reported as [`MatrixEvent::PollFailed`] and left to the poll loop.
    /// Returns `None` when polling is disabled.
    pub async fn start(self: &Arc<Self>) -> Result<Option<PollerHandle>, ControlError> {
        self.transport.open().await?;
        info!(
            "Connected to {} ({}) on {}",
            self.identity.display_name,
            self.size(),
            self.port_name()
        );

        self.query_info().await;
        match self.sync_status().await {
            Ok(_) => self.publish_state(),
            Err(e) => {
                warn!("Initial status sync failed: {}", e);
                let _ = self.events.send(MatrixEvent::PollFailed {
                    message: e.to_string(),
                });
            }
        }

        Ok(self.spawn_poller())
    }

    /// Start the background poll loop
    ///
    /// Returns `None` when no status command is configured.
    pub fn spawn_poller(self: &Arc<Self>) -> Option<PollerHandle> {
        self.config.status_command()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            controller.run_poller(shutdown_rx).await;
        });

        Some(PollerHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    /// Release the serial port
    pub async fn close(&self) {
        self.transport.close().await;
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn run_poller(&self, mut shutdown_rx: oneshot::Receiver<()>) {
        let interval = self.config.poll_interval();
        info!("Polling {} every {:?}", self.port_name(), interval);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if self.in_flight() > 0 {
                debug!("Command in flight, skipping poll");
                continue;
            }

            match self.sync_status().await {
                Ok(_) => self.publish_state(),
                Err(e) => {
                    warn!("Status poll failed: {}", e);
                    let _ = self.events.send(MatrixEvent::PollFailed {
                        message: e.to_string(),
                    });
                }
            }
        }

        info!("Poller for {} stopped", self.port_name());
    }

    async fn step(&self, output: u8, direction: StepDirection) -> Result<(), ControlError> {
        if !self.accepts_output(output) {
            return Ok(());
        }

        self.send(&MatrixCommand::Step { output, direction }).await?;
        self.force_refresh().await
    }

    /// Read the status dump into the cache; false if polling is disabled
    async fn sync_status(&self) -> Result<bool, ControlError> {
        let Some(command) = self.config.status_command() else {
            return Ok(false);
        };

        let status = MatrixCommand::Status(command.to_string());
        let reply = self.exchange(&status, DEFAULT_REPLY_LIMIT).await?;
        let applied = self.write_state().apply_status(&reply);
        debug!("Status sync applied {} entries", applied);
        Ok(true)
    }

    async fn send(&self, command: &MatrixCommand) -> Result<(), ControlError> {
        self.exchange(command, 0).await.map(drop)
    }

    /// Put a command on the wire and read its reply, if it has one
    ///
    /// Commands without a reply count as in flight until their settle
    /// delay ends; they yield an empty string.
    async fn exchange(&self, command: &MatrixCommand, max_bytes: usize) -> Result<String, ControlError> {
        let payload = command.encode();
        if command.expects_reply() {
            return self.transport.read_reply(&payload, max_bytes).await;
        }

        let _guard = InFlight::enter(&self.in_flight);
        self.transport.write(&payload).await?;
        Ok(String::new())
    }

    fn accepts_output(&self, output: u8) -> bool {
        let ok = self.size().contains(output);
        if !ok {
            debug!("Ignoring output {} on a {} matrix", output, self.size());
        }
        ok
    }

    fn publish_state(&self) {
        let _ = self.events.send(MatrixEvent::StateUpdated(self.snapshot()));
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MatrixState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MatrixState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running poll loop
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop the loop at its next wait and wait for it to finish
    ///
    /// A poll already on the wire completes first. Dropping the handle
    /// also stops the loop, without waiting.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Poller task failed: {}", e);
        }
    }

    /// Returns true once the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Counts a foreground command for as long as it lives
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
