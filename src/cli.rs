use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::Overrides;
use crate::registry::StreakPolicy;
use crate::session::{SerialParams, TcpParams, TransportParams};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "slave-sim",
    version,
    about = "Protocol slave simulator: answers @..*XX frames with scripted responses"
)]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Answer on a serial port
    Serial(SerialRunOpts),
    /// Answer as a single-client TCP server
    Tcp(TcpRunOpts),
    /// List serial ports and command files
    List(ListOpts),
    /// Validate a command file and print its rules
    Check(CheckOpts),
    /// Clean up a hex string the way response data is stored
    Sanitize(SanitizeOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyS0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = 115_200, value_parser = clap::value_parser!(u32).range(1..))]
    pub baud: u32,
    /// Enable RTS/CTS
    #[arg(long, default_value_t = false)]
    pub rtscts: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TcpOpts {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// TCP port
    #[arg(long, default_value_t = 9000)]
    pub port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct RuleOpts {
    /// Command file (JSON)
    #[arg(short, long, default_value = "cmd.json")]
    pub config: PathBuf,
    /// Response delay for one command, e.g. --delay 01=250
    #[arg(long = "delay", value_name = "ID=MS", value_parser = parse_assignment::<u64>)]
    pub delay: Vec<(String, u64)>,
    /// Extra consecutive arrivals before responding, e.g. --trigger-after 01=2
    #[arg(long = "trigger-after", value_name = "ID=N", value_parser = parse_assignment::<u32>)]
    pub trigger_after: Vec<(String, u32)>,
    /// Response data for one command, e.g. --resp "01=00 11 22"
    #[arg(long = "resp", value_name = "ID=HEX", value_parser = parse_assignment::<String>)]
    pub resp: Vec<(String, String)>,
    /// Count the trigger streak per command instead of across all commands
    #[arg(long, default_value_t = false)]
    pub per_command_streak: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SerialRunOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub rules: RuleOpts,
}

#[derive(Args, Debug, Clone)]
pub struct TcpRunOpts {
    #[command(flatten)]
    pub tcp: TcpOpts,
    #[command(flatten)]
    pub rules: RuleOpts,
}

#[derive(Args, Debug, Clone)]
pub struct CheckOpts {
    #[command(flatten)]
    pub rules: RuleOpts,
    /// Write the sanitized rules (with overrides) back to the file
    #[arg(long, default_value_t = false)]
    pub save: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ListOpts {
    /// Directory to scan for *.json command files
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SanitizeOpts {
    /// Raw hex text
    pub hex: String,
    /// Maximum number of byte pairs (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max: usize,
}

impl RuleOpts {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            delay_ms: self.delay.clone(),
            trigger_after: self.trigger_after.clone(),
            resp_hex: self.resp.clone(),
        }
    }

    pub fn policy(&self) -> StreakPolicy {
        if self.per_command_streak {
            StreakPolicy::PerCommand
        } else {
            StreakPolicy::Shared
        }
    }
}

impl From<SerialOpts> for TransportParams {
    fn from(o: SerialOpts) -> Self {
        TransportParams::Serial(SerialParams {
            dev: o.dev,
            baud: o.baud,
            rtscts: o.rtscts,
        })
    }
}

impl From<TcpOpts> for TransportParams {
    fn from(o: TcpOpts) -> Self {
        TransportParams::Tcp(TcpParams {
            host: o.host,
            port: o.port,
        })
    }
}

/// Parse `ID=VALUE`.
fn parse_assignment<T: FromStr>(s: &str) -> Result<(String, T), String>
where
    T::Err: std::fmt::Display,
{
    let (id, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=VALUE, got {s:?}"))?;
    let value = value
        .trim()
        .parse::<T>()
        .map_err(|e| format!("bad value in {s:?}: {e}"))?;
    Ok((id.trim().to_string(), value))
}
