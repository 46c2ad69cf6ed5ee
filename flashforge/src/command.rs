//! The commands that can be sent to the printer.

use parse_display::Display;

/// Every command the printer understands, one per wire token.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum Command {
    /// `~M601 S1`: ask for exclusive control.
    #[display("control-request")]
    ControlRequest,
    /// `~M602`: give exclusive control back.
    #[display("control-release")]
    ControlRelease,
    /// `~M115`: machine type, name, firmware, serial, build volume.
    #[display("info")]
    Info,
    /// `~M119`: machine status, move mode, LED, current file.
    #[display("status")]
    Status,
    /// `~M105`: tool temperatures.
    #[display("temperature")]
    Temperature,
    /// `~M27`: print progress and layer counts.
    #[display("progress")]
    Progress,
    /// `~M114`: head position.
    #[display("position")]
    Position,
    /// `~M104`: set the target temperature of an extruder.
    #[display("set-temperature")]
    SetTemperature {
        /// Extruder index (`T<n>`).
        tool: u8,
        /// Target in degrees Celsius.
        degrees: u16,
    },
    /// `~M146`: switch the chamber light.
    #[display("set-led")]
    SetLed(bool),
    /// `~M661`: list the files stored on the printer.
    #[display("list-files")]
    ListFiles,
    /// `~M25`: pause the current job.
    #[display("pause")]
    Pause,
    /// `~M24`: resume the paused job.
    #[display("resume")]
    Resume,
    /// `~M23`: start printing a stored file.
    #[display("start-print")]
    StartPrint(String),
    /// `~M26`: abort the current job.
    #[display("abort")]
    Abort,
}

impl Command {
    /// Whether the firmware only honours this command from the controlling
    /// client.
    pub fn needs_control(&self) -> bool {
        matches!(
            self,
            Command::SetTemperature { .. }
                | Command::SetLed(_)
                | Command::Pause
                | Command::Resume
                | Command::StartPrint(_)
                | Command::Abort
        )
    }

    /// Whether the reply carries a payload after its `ok\r\n`, so reading
    /// must not stop at the terminal marker.
    pub fn reply_runs_past_marker(&self) -> bool {
        matches!(self, Command::ListFiles)
    }

    /// The exact line written to the socket, including the `\r\n`.
    pub fn wire(&self) -> String {
        let line = match self {
            Command::ControlRequest => "~M601 S1".to_owned(),
            Command::ControlRelease => "~M602".to_owned(),
            Command::Info => "~M115".to_owned(),
            Command::Status => "~M119".to_owned(),
            Command::Temperature => "~M105".to_owned(),
            Command::Progress => "~M27".to_owned(),
            Command::Position => "~M114".to_owned(),
            Command::SetTemperature { tool, degrees } => format!("~M104 S{degrees} T{tool}"),
            Command::SetLed(on) => {
                let v = if *on { 255 } else { 0 };
                format!("~M146 r{v} g{v} b{v} F0")
            }
            Command::ListFiles => "~M661".to_owned(),
            Command::Pause => "~M25".to_owned(),
            Command::Resume => "~M24".to_owned(),
            Command::StartPrint(file) => format!("~M23 0:/user/{file}"),
            Command::Abort => "~M26".to_owned(),
        };

        line + "\r\n"
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_wire_tokens() {
        assert_eq!(Command::ControlRequest.wire(), "~M601 S1\r\n");
        assert_eq!(Command::ControlRelease.wire(), "~M602\r\n");
        assert_eq!(Command::Info.wire(), "~M115\r\n");
        assert_eq!(Command::Status.wire(), "~M119\r\n");
        assert_eq!(Command::Temperature.wire(), "~M105\r\n");
        assert_eq!(Command::Progress.wire(), "~M27\r\n");
        assert_eq!(Command::Position.wire(), "~M114\r\n");
        assert_eq!(Command::ListFiles.wire(), "~M661\r\n");
        assert_eq!(Command::Pause.wire(), "~M25\r\n");
        assert_eq!(Command::Resume.wire(), "~M24\r\n");
        assert_eq!(Command::Abort.wire(), "~M26\r\n");
    }

    #[test]
    fn test_parameterised_wire_tokens() {
        assert_eq!(
            Command::SetTemperature { tool: 0, degrees: 210 }.wire(),
            "~M104 S210 T0\r\n"
        );
        assert_eq!(Command::SetLed(true).wire(), "~M146 r255 g255 b255 F0\r\n");
        assert_eq!(Command::SetLed(false).wire(), "~M146 r0 g0 b0 F0\r\n");
        assert_eq!(
            Command::StartPrint("My Box.gx".to_owned()).wire(),
            "~M23 0:/user/My Box.gx\r\n"
        );
    }

    #[test]
    fn test_needs_control() {
        assert!(Command::Pause.needs_control());
        assert!(Command::SetLed(true).needs_control());
        assert!(!Command::Status.needs_control());
        assert!(!Command::ControlRequest.needs_control());
        assert_eq!(Command::SetTemperature { tool: 1, degrees: 0 }.to_string(), "set-temperature");
    }

    #[test]
    fn test_reply_runs_past_marker() {
        assert!(Command::ListFiles.reply_runs_past_marker());
        assert!(!Command::Status.reply_runs_past_marker());
        assert!(!Command::Abort.reply_runs_past_marker());
    }
}
