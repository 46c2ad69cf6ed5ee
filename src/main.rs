//! A command line client for FlashForge printers on the local network.

#![deny(missing_docs)]

mod cmd_monitor;
mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::Config;
use flashforge::{Command, DeviceSession, DiscoveryClient};
use slog::Drain;
use tracing_subscriber::prelude::*;

/// This doc string acts as a help message when the user runs '--help'
/// as do all doc strings on fields.
#[derive(Parser, Debug, Clone)]
#[clap(version = clap::crate_version!(), author = clap::crate_authors!("\n"))]
pub struct Opts {
    /// Print debug info
    #[clap(short, long)]
    pub debug: bool,

    /// Print logs and results as json
    #[clap(short, long)]
    pub json: bool,

    /// Path to config file.
    #[clap(short, long, default_value = "flashforge.toml")]
    pub config: std::path::PathBuf,

    /// Printer IP address. Discovered when neither this nor the config
    /// file names one.
    #[clap(long, env = "FLASHFORGE_IP")]
    pub ip: Option<String>,

    /// Printer control port.
    #[clap(long)]
    pub port: Option<u16>,

    /// The subcommand to run.
    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

impl Opts {
    /// Setup our logger.
    pub fn create_logger(&self, app: &str) -> slog::Logger {
        if self.json {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            self.async_root_logger(drain, app)
        } else {
            let decorator = slog_term::TermDecorator::new().stderr().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            self.async_root_logger(drain, app)
        }
    }

    fn async_root_logger<T>(&self, drain: T, app: &str) -> slog::Logger
    where
        T: slog::Drain + Send + 'static,
        <T as slog::Drain>::Err: std::fmt::Debug,
    {
        let level = if self.debug {
            slog::Level::Debug
        } else {
            slog::Level::Info
        };

        let level_drain = slog::LevelFilter(drain, level).fuse();
        let async_drain = slog_async::Async::new(level_drain).build().fuse();
        slog::Logger::root(async_drain, slog::slog_o!("app" => app.to_owned()))
    }
}

/// A subcommand for our cli.
#[derive(Parser, Debug, Clone)]
pub enum SubCommand {
    /// List the printers that answer on the local network.
    Discover {
        /// Seconds to wait for replies.
        #[clap(long)]
        timeout: Option<u64>,

        /// Stop after this many printers answered.
        #[clap(long)]
        limit: Option<usize>,
    },

    /// Poll a printer and print its state until interrupted.
    Monitor {
        /// Seconds between two polls.
        #[clap(long)]
        interval: Option<u64>,
    },

    /// Get machine type, name, firmware and build volume.
    Info,

    /// Get machine status.
    Status,

    /// Get extruder and bed temperatures.
    Temperature,

    /// Get print progress.
    Progress,

    /// Get the print head position.
    Position,

    /// List the files stored on the printer.
    Files,

    /// Print the camera stream URL.
    Camera,

    /// Turn off/on the machine led.
    Led {
        /// Turn the light on.
        #[clap(long, conflicts_with = "off", required_unless_present = "off")]
        on: bool,

        /// Turn the light off.
        #[clap(long)]
        off: bool,
    },

    /// Set the target temperature of an extruder.
    SetTemperature {
        /// Target in degrees Celsius.
        degrees: u16,

        /// Extruder index.
        #[clap(long, default_value_t = 0)]
        tool: u8,
    },

    /// Pause the current job.
    Pause,

    /// Resume the paused job.
    Resume,

    /// Print a file already stored on the printer.
    Print {
        /// File name on the printer.
        file: String,
    },

    /// Abort the current job.
    Abort,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts: Opts = Opts::parse();

    // Format fields using the provided closure.
    // We want to make this very consise otherwise the logs are not able to be read by humans.
    let format = tracing_subscriber::fmt::format::debug_fn(|writer, field, value| {
        if format!("{}", field) == "message" {
            write!(writer, "{:?}", value)
        } else {
            write!(writer, "{}={:?}", field, value)
        }
    })
    .delimited(", ");

    let (json, plain) = if opts.json {
        (Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .fmt_fields(format)
                    .with_writer(std::io::stderr),
            ),
        )
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if opts.debug { "debug" } else { "info" })
    });

    tracing_subscriber::registry().with(filter).with(json).with(plain).init();

    let config = Config::load_or_default(&opts.config)?;

    if let Err(err) = run_cmd(&opts, &config).await {
        bail!("running cmd `{:?}` failed: {:?}", &opts.subcmd, err);
    }

    Ok(())
}

async fn run_cmd(opts: &Opts, config: &Config) -> Result<()> {
    let log = opts.create_logger("flashforge");

    match &opts.subcmd {
        SubCommand::Discover { timeout, limit } => {
            let timeout = timeout
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.discovery_timeout());
            let client = DiscoveryClient::new(config.discovery(), Some(log));
            let printers = client.discover(timeout, *limit).await?;

            if opts.json {
                println!("{}", serde_json::to_string_pretty(&printers)?);
            } else if printers.is_empty() {
                tracing::info!("no printers answered within {:?}", timeout);
            } else {
                for printer in printers {
                    println!("{}: {}", printer.ip, printer.name);
                }
            }
        }
        SubCommand::Monitor { interval } => {
            let host = match find_host(opts, config, &log).await? {
                Some(host) => host,
                None => cmd_monitor::prompt_for_host().await?,
            };
            let interval = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.monitor_interval());

            cmd_monitor::run(config.transport(&host, opts.port), interval, opts.json, log).await?;
        }
        SubCommand::Camera => {
            let session = open_session(opts, config, &log).await?;
            println!("{}", session.camera_stream_url());
        }
        SubCommand::Info => {
            let mut session = open_session(opts, config, &log).await?;
            session.refresh_info().await?;
            print_snapshot(opts, &session)?;
        }
        SubCommand::Status => {
            let mut session = open_session(opts, config, &log).await?;
            session.refresh_status().await?;
            print_snapshot(opts, &session)?;
        }
        SubCommand::Temperature => {
            let mut session = open_session(opts, config, &log).await?;
            session.refresh_temperature().await?;

            let snapshot = session.snapshot();
            if opts.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "extruders": &snapshot.extruders,
                        "beds": &snapshot.beds,
                    }))?
                );
            } else {
                for tool in snapshot.extruders.iter().chain(snapshot.beds.iter()) {
                    println!("{}: {} / {}", tool.name, tool.current, tool.target);
                }
            }
        }
        SubCommand::Progress => {
            let mut session = open_session(opts, config, &log).await?;
            session.refresh_progress().await?;
            println!("{}", cmd_monitor::summary(session.snapshot()));
        }
        SubCommand::Position => {
            let mut session = open_session(opts, config, &log).await?;
            session.refresh_position().await?;

            let snapshot = session.snapshot();
            println!(
                "X: {}  Y: {}  Z: {}",
                display_or_dash(snapshot.position_x),
                display_or_dash(snapshot.position_y),
                display_or_dash(snapshot.position_z)
            );
        }
        SubCommand::Files => {
            let mut session = open_session(opts, config, &log).await?;
            let files = session.list_files().await?;
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                for file in files {
                    println!("{}", file);
                }
            }
        }
        SubCommand::Led { on, .. } => {
            exclusive(opts, config, &log, Command::SetLed(*on)).await?;
        }
        SubCommand::SetTemperature { degrees, tool } => {
            exclusive(
                opts,
                config,
                &log,
                Command::SetTemperature {
                    tool: *tool,
                    degrees: *degrees,
                },
            )
            .await?;
        }
        SubCommand::Pause => {
            exclusive(opts, config, &log, Command::Pause).await?;
        }
        SubCommand::Resume => {
            exclusive(opts, config, &log, Command::Resume).await?;
        }
        SubCommand::Print { file } => {
            exclusive(opts, config, &log, Command::StartPrint(file.clone())).await?;
        }
        SubCommand::Abort => {
            exclusive(opts, config, &log, Command::Abort).await?;
        }
    }

    Ok(())
}

/// The printer address from the flags, the config file, or the first
/// printer that answers a discovery probe.
async fn find_host(opts: &Opts, config: &Config, log: &slog::Logger) -> Result<Option<String>> {
    if let Some(ip) = opts.ip.as_deref().or(config.host()) {
        return Ok(Some(ip.to_owned()));
    }

    tracing::info!("no printer address configured, searching the network");
    let client = DiscoveryClient::new(config.discovery(), Some(log.clone()));
    let found = client.discover(config.discovery_timeout(), Some(1)).await?;

    Ok(found.into_iter().next().map(|printer| {
        tracing::info!("using {} at {}", printer.name, printer.ip);
        printer.ip.to_string()
    }))
}

async fn open_session(opts: &Opts, config: &Config, log: &slog::Logger) -> Result<DeviceSession> {
    let host = find_host(opts, config, log)
        .await?
        .context("no printer found, pass --ip or set [printer] host in the config file")?;

    Ok(DeviceSession::new(config.transport(&host, opts.port), Some(log.clone())))
}

/// Send `command` while holding control and print the printer's reply.
async fn exclusive(opts: &Opts, config: &Config, log: &slog::Logger, command: Command) -> Result<()> {
    let mut session = open_session(opts, config, log).await?;
    let reply = session.with_control(command).await?;
    println!("{}", reply.trim_end());
    session.disconnect().await;
    Ok(())
}

fn print_snapshot(opts: &Opts, session: &DeviceSession) -> Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(session.snapshot())?);
    } else {
        println!("{:#?}", session.snapshot());
    }
    Ok(())
}

fn display_or_dash(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_owned(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Opts::command().debug_assert();
    }

    #[test]
    fn test_parse_set_temperature() {
        let opts = Opts::try_parse_from(["flashforge-monitor", "--ip", "192.168.1.50", "set-temperature", "210", "--tool", "1"])
            .unwrap();
        assert_eq!(opts.ip.as_deref(), Some("192.168.1.50"));
        match opts.subcmd {
            SubCommand::SetTemperature { degrees, tool } => {
                assert_eq!(degrees, 210);
                assert_eq!(tool, 1);
            }
            other => panic!("unexpected subcommand {other:?}"),
        }
    }

    #[test]
    fn test_led_needs_exactly_one_switch() {
        assert!(Opts::try_parse_from(["flashforge-monitor", "led"]).is_err());
        assert!(Opts::try_parse_from(["flashforge-monitor", "led", "--on", "--off"]).is_err());

        let opts = Opts::try_parse_from(["flashforge-monitor", "led", "--off"]).unwrap();
        assert!(matches!(opts.subcmd, SubCommand::Led { on: false, off: true }));
    }

    #[test]
    fn test_display_or_dash() {
        assert_eq!(display_or_dash(None), "-");
        assert_eq!(display_or_dash(Some(19.3861)), "19.3861");
    }
}
