//! A stateful handle to one printer.

use bytes::Bytes;
use parse_display::Display;
use serde::{Deserialize, Serialize};
use slog::{debug, info, o, warn, Logger};

use crate::{
    command::Command,
    parser::{self, FieldRule},
    snapshot::DeviceSnapshot,
    transport::{decode_reply, Transport, TransportConfig},
    Result,
};

/// Port of the printer's MJPEG camera stream.
pub const CAMERA_PORT: u16 = 8080;

/// What this client is allowed to do on the printer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Connected as an observer: telemetry only.
    Connected,
    /// Connected and holding exclusive control.
    Controlling,
}

impl ConnectionState {
    /// True for [ConnectionState::Connected] and
    /// [ConnectionState::Controlling].
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

/// Telemetry queries whose replies feed the snapshot.
#[derive(Copy, Clone, Debug)]
enum Telemetry {
    Info,
    Status,
    Temperature,
    Progress,
    Position,
}

impl Telemetry {
    fn command(&self) -> Command {
        match self {
            Telemetry::Info => Command::Info,
            Telemetry::Status => Command::Status,
            Telemetry::Temperature => Command::Temperature,
            Telemetry::Progress => Command::Progress,
            Telemetry::Position => Command::Position,
        }
    }

    fn rules(&self) -> &'static [FieldRule] {
        match self {
            Telemetry::Info => parser::INFO_RULES.as_slice(),
            Telemetry::Status => parser::STATUS_RULES.as_slice(),
            Telemetry::Progress => parser::PROGRESS_RULES.as_slice(),
            Telemetry::Position => parser::POSITION_RULES.as_slice(),
            Telemetry::Temperature => &[],
        }
    }
}

/// Connection state, command issuing and telemetry cache for one printer.
///
/// The session tracks whether it holds control but does not refuse commands
/// that need it; the firmware decides.
pub struct DeviceSession {
    transport: Transport,
    state: ConnectionState,
    snapshot: DeviceSnapshot,
    log: Logger,
}

impl DeviceSession {
    /// Create a disconnected session. Nothing is sent until
    /// [DeviceSession::connect] or the first command.
    pub fn new(config: TransportConfig, log: Option<Logger>) -> Self {
        let parent = log.unwrap_or_else(crate::discard_logger);
        let log = parent.new(o!("printer" => config.addr()));
        let transport = Transport::new(config, Some(parent));

        Self {
            transport,
            state: ConnectionState::Disconnected,
            snapshot: DeviceSnapshot::default(),
            log,
        }
    }

    /// Current connection state.
    ///
    /// Reports [ConnectionState::Disconnected] as soon as the socket is gone,
    /// even when that happened without an error, e.g. the printer closing
    /// the stream after a reply or a cancelled request.
    pub fn state(&self) -> ConnectionState {
        if self.transport.is_open() {
            self.state
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Last known telemetry.
    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    /// Printer address this session talks to.
    pub fn host(&self) -> &str {
        &self.transport.config().host
    }

    /// URL of the printer's camera stream. No network I/O.
    pub fn camera_stream_url(&self) -> String {
        format!("http://{}:{}/?action=stream", self.host(), CAMERA_PORT)
    }

    /// Connect and pull info, status, temperature and progress.
    ///
    /// A no-op when already connected. On a connect failure the state stays
    /// [ConnectionState::Disconnected] and the error is returned as is.
    pub async fn connect(&mut self) -> Result<()> {
        self.drop_stale_state();
        if self.state.is_connected() {
            return Ok(());
        }

        if let Err(err) = self.transport.connect().await {
            warn!(self.log, "unable to connect"; "error" => %err);
            return Err(err);
        }
        self.state = ConnectionState::Connected;
        info!(self.log, "connected");

        for telemetry in [
            Telemetry::Info,
            Telemetry::Status,
            Telemetry::Temperature,
            Telemetry::Progress,
        ] {
            if !self.state.is_connected() {
                break;
            }
            self.fetch(telemetry).await?;
        }

        Ok(())
    }

    /// Drop the connection. Control, if held, is lost with it.
    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.state = ConnectionState::Disconnected;
        info!(self.log, "disconnected");
    }

    /// Ask for exclusive control and return the resulting state.
    pub async fn request_control(&mut self) -> Result<ConnectionState> {
        self.ensure_connected().await?;

        let reply = decode_reply(&self.send(&Command::ControlRequest).await?).to_lowercase();
        if !self.state.is_connected() {
            warn!(self.log, "connection closed with the control reply");
            return Ok(self.state);
        }

        if reply.contains("control success") {
            self.state = ConnectionState::Controlling;
            info!(self.log, "control granted");
        } else if reply.contains("control failed") {
            self.state = ConnectionState::Connected;
            warn!(self.log, "control refused, another client holds it");
        } else {
            debug!(self.log, "unrecognised control reply"; "reply" => reply.trim());
        }

        Ok(self.state)
    }

    /// Give control back and return the resulting state.
    pub async fn release_control(&mut self) -> Result<ConnectionState> {
        self.ensure_connected().await?;
        self.send(&Command::ControlRelease).await?;
        if self.state.is_connected() {
            self.state = ConnectionState::Connected;
        }
        debug!(self.log, "control released");
        Ok(self.state)
    }

    /// Refresh machine type, name, firmware, serial, build volume, extruder
    /// count and MAC address.
    pub async fn refresh_info(&mut self) -> Result<()> {
        self.ensure_connected().await?;
        self.fetch(Telemetry::Info).await
    }

    /// Refresh machine status, move mode, status code, LED and current file.
    pub async fn refresh_status(&mut self) -> Result<()> {
        self.ensure_connected().await?;
        self.fetch(Telemetry::Status).await
    }

    /// Refresh the extruder and bed temperatures.
    pub async fn refresh_temperature(&mut self) -> Result<()> {
        self.ensure_connected().await?;
        self.fetch(Telemetry::Temperature).await
    }

    /// Refresh print percent and layer counts.
    pub async fn refresh_progress(&mut self) -> Result<()> {
        self.ensure_connected().await?;
        self.fetch(Telemetry::Progress).await
    }

    /// Refresh the head position.
    pub async fn refresh_position(&mut self) -> Result<()> {
        self.ensure_connected().await?;
        self.fetch(Telemetry::Position).await
    }

    /// Refresh status, temperature and progress, in that order.
    ///
    /// Stops at the first transport error. An empty reply only skips its
    /// own part of the snapshot.
    pub async fn refresh_all(&mut self) -> Result<()> {
        for telemetry in [Telemetry::Status, Telemetry::Temperature, Telemetry::Progress] {
            self.ensure_connected().await?;
            self.fetch(telemetry).await?;
        }
        Ok(())
    }

    /// Set the target temperature of extruder `tool`.
    pub async fn set_temperature(&mut self, tool: u8, degrees: u16) -> Result<String> {
        self.command(Command::SetTemperature { tool, degrees }).await
    }

    /// Switch the chamber light.
    pub async fn set_led(&mut self, on: bool) -> Result<String> {
        self.command(Command::SetLed(on)).await
    }

    /// Pause the current job.
    pub async fn pause(&mut self) -> Result<String> {
        self.command(Command::Pause).await
    }

    /// Resume the paused job.
    pub async fn resume(&mut self) -> Result<String> {
        self.command(Command::Resume).await
    }

    /// Start printing `file` from the printer's user storage.
    pub async fn start_print(&mut self, file: &str) -> Result<String> {
        self.command(Command::StartPrint(file.to_owned())).await
    }

    /// Abort the current job.
    pub async fn abort(&mut self) -> Result<String> {
        self.command(Command::Abort).await
    }

    /// Names of the files stored on the printer.
    pub async fn list_files(&mut self) -> Result<Vec<String>> {
        self.ensure_connected().await?;
        let raw = self.send(&Command::ListFiles).await?;
        let files = parser::parse_file_list(&raw);
        debug!(self.log, "listed files"; "count" => files.len());
        Ok(files)
    }

    /// Take control, send `command`, then release control again, returning
    /// the command's reply.
    pub async fn with_control(&mut self, command: Command) -> Result<String> {
        if self.request_control().await? != ConnectionState::Controlling {
            warn!(self.log, "sending without control"; "command" => %command);
        }
        let reply = self.command(command).await?;
        self.release_control().await?;
        Ok(reply)
    }

    /// Send any catalogue command and return its decoded reply.
    pub async fn command(&mut self, command: Command) -> Result<String> {
        self.ensure_connected().await?;
        if command.needs_control() && self.state != ConnectionState::Controlling {
            debug!(self.log, "command needs control, firmware may ignore it"; "command" => %command);
        }
        let reply = self.send(&command).await?;
        Ok(decode_reply(&reply))
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        self.drop_stale_state();
        if !self.state.is_connected() {
            info!(self.log, "printer is not connected, connecting");
            self.connect().await?;
        }
        Ok(())
    }

    async fn send(&mut self, command: &Command) -> Result<Bytes> {
        debug!(self.log, "sending"; "command" => %command);
        let wire = command.wire();
        let result = if command.reply_runs_past_marker() {
            self.transport.request_until_quiet(wire.as_bytes()).await
        } else {
            self.transport.request(wire.as_bytes()).await
        };

        match result {
            Ok(reply) => {
                if !self.transport.is_open() {
                    info!(self.log, "printer closed the connection"; "command" => %command);
                    self.state = ConnectionState::Disconnected;
                }
                Ok(reply)
            }
            Err(err) => {
                warn!(self.log, "command failed"; "command" => %command, "error" => %err);
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    /// Forget a connected state whose socket has gone away without an
    /// error reaching us, so control is never reported on a fresh socket.
    fn drop_stale_state(&mut self) {
        if self.state.is_connected() && !self.transport.is_open() {
            warn!(self.log, "connection was lost"; "state" => %self.state);
            self.state = ConnectionState::Disconnected;
        }
    }

    async fn fetch(&mut self, telemetry: Telemetry) -> Result<()> {
        let command = telemetry.command();
        let reply = decode_reply(&self.send(&command).await?);
        if reply.trim().is_empty() {
            debug!(self.log, "empty reply, keeping previous values"; "command" => %command);
            return Ok(());
        }

        if let Telemetry::Temperature = telemetry {
            let temps = parser::temperatures(&reply);
            if temps.is_empty() {
                debug!(self.log, "no temperature tokens in reply");
            }
            for triple in &temps {
                self.snapshot.apply_temperature(triple);
            }
            return Ok(());
        }

        let rules = telemetry.rules();
        let captures = parser::extract(&reply, rules);
        if captures.len() < rules.len() {
            debug!(self.log, "some fields not in reply, keeping previous values";
                "command" => %command, "matched" => captures.len(), "rules" => rules.len());
        }
        for (field, value) in captures {
            if !self.snapshot.apply(field, value) {
                debug!(self.log, "ignoring non-numeric value"; "field" => %field, "value" => value);
            }
        }

        Ok(())
    }
}
