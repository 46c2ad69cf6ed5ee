//! Last known telemetry of a printer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    parser::{Field, TemperatureTriple, ToolKind},
    tools::{TemperatureReading, ToolRegistry},
};

/// Everything a session has learned about its printer.
///
/// Attributes start unset and are only ever overwritten by a successful
/// match; a reply that lacks a field leaves the previous value in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    /// e.g. `Flashforge Adventurer 4`.
    pub machine_type: Option<String>,
    /// User-assigned printer name.
    pub machine_name: Option<String>,
    /// Firmware version.
    pub firmware: Option<String>,
    /// Serial number.
    pub serial_number: Option<String>,
    /// Build volume width in millimeters.
    pub max_x: Option<f64>,
    /// Build volume depth in millimeters.
    pub max_y: Option<f64>,
    /// Build volume height in millimeters.
    pub max_z: Option<f64>,
    /// Number of extruders reported by the printer.
    pub extruder_count: Option<f64>,
    /// Network MAC address.
    pub mac_address: Option<String>,

    /// e.g. `READY`, `BUILDING_FROM_SD`.
    pub machine_status: Option<String>,
    /// e.g. `READY`, `MOVING`.
    pub move_mode: Option<String>,
    /// Raw status code string.
    pub status: Option<String>,
    /// Chamber light state as reported (`0`/`1`).
    pub led: Option<String>,
    /// File of the current job; empty when idle.
    pub job_file: Option<String>,

    /// Print progress in percent.
    pub print_percent: Option<f64>,
    /// Layer being printed.
    pub print_layer: Option<f64>,
    /// Total layers of the job.
    pub total_layers: Option<f64>,

    /// Head X position.
    pub position_x: Option<f64>,
    /// Head Y position.
    pub position_y: Option<f64>,
    /// Head Z position.
    pub position_z: Option<f64>,

    /// Extruder temperatures keyed `t0`, `t1`, ...
    pub extruders: ToolRegistry,
    /// Bed temperatures keyed `b`.
    pub beds: ToolRegistry,

    /// When a reply last changed this snapshot.
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceSnapshot {
    /// Store one captured value. Returns false, leaving the slot untouched,
    /// when a numeric field's capture is not a number.
    pub fn apply(&mut self, field: Field, value: &str) -> bool {
        let text = || Some(value.to_owned());
        let number = value.trim().parse::<f64>().ok();

        if field.is_numeric() && number.is_none() {
            return false;
        }

        match field {
            Field::MachineType => self.machine_type = text(),
            Field::MachineName => self.machine_name = text(),
            Field::Firmware => self.firmware = text(),
            Field::SerialNumber => self.serial_number = text(),
            Field::MaxX => self.max_x = number,
            Field::MaxY => self.max_y = number,
            Field::MaxZ => self.max_z = number,
            Field::ExtruderCount => self.extruder_count = number,
            Field::MacAddress => self.mac_address = text(),
            Field::MachineStatus => self.machine_status = text(),
            Field::MoveMode => self.move_mode = text(),
            Field::Status => self.status = text(),
            Field::Led => self.led = text(),
            Field::CurrentFile => self.job_file = text(),
            Field::PrintPercent => self.print_percent = number,
            Field::PrintLayer => self.print_layer = number,
            Field::TotalLayers => self.total_layers = number,
            Field::PositionX => self.position_x = number,
            Field::PositionY => self.position_y = number,
            Field::PositionZ => self.position_z = number,
        }

        self.updated_at = Some(Utc::now());
        true
    }

    /// Store a temperature token in the extruder or bed registry.
    pub fn apply_temperature(&mut self, triple: &TemperatureTriple) {
        let reading = TemperatureReading::new(&triple.label, triple.current, triple.target);
        match triple.kind() {
            ToolKind::Extruder => self.extruders.add(reading),
            ToolKind::Bed => self.beds.add(reading),
        }
        self.updated_at = Some(Utc::now());
    }
}
