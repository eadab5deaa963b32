//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Name of the simulated device under test used by `--demo`.
pub const DEMO_DUT: &str = "DUT-1";

#[derive(Parser, Debug)]
#[command(name = "bluelink")]
#[command(author, version, about = "BLE conformance test runner", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Drive a simulated heart-rate peripheral named DUT-1 instead of the Bluetooth radio
    #[arg(long, global = true, env = "BLUELINK_DEMO")]
    pub demo: bool,

    /// Directory that receives the per-test-case log files
    #[arg(long, global = true, env = "BLUELINK_LOG_DIR", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Configuration file to use instead of the default location
    #[arg(long = "config", global = true, env = "BLUELINK_CONFIG", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Browse for nearby BLE peripherals
    Scan {
        /// Scan window in seconds (defaults to the configured scan timeout)
        #[arg(short, long)]
        timeout: Option<u64>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List the conformance test cases
    Cases {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run test cases against a device under test
    Run {
        /// Advertised name of the device under test
        #[arg(short, long, env = "BLUELINK_DUT")]
        dut: Option<String>,

        /// Test case ids to run (defaults to the configured cases)
        #[arg(value_name = "IDS")]
        ids: Vec<String>,

        /// Run every case in the catalog
        #[arg(short, long, conflicts_with = "ids")]
        all: bool,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Connect to a device and list its services and characteristics
    Explore {
        /// Advertised name of the device under test
        #[arg(short, long, env = "BLUELINK_DUT")]
        dut: Option<String>,

        /// Scan window in seconds (defaults to the configured scan timeout)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Read a characteristic once
    Read {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write a value to a characteristic
    Write {
        #[command(flatten)]
        target: TargetArgs,

        /// Value as text, or raw bytes as hex:0a0b
        value: String,

        /// Write without response
        #[arg(long)]
        no_response: bool,
    },

    /// Enable notifications on a characteristic and print each value
    Watch {
        #[command(flatten)]
        target: TargetArgs,

        /// Stop after N notifications
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Stop after this many seconds
        #[arg(long, default_value = "30")]
        duration: u64,
    },

    /// Print the log of a test case (by id such as TC01 or by log tag)
    Logs {
        tag: String,

        /// Only show the last N lines
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },

    /// Show or change the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Device and characteristic addressed by `read`, `write` and `watch`.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Advertised name of the device under test
    #[arg(short, long, env = "BLUELINK_DUT")]
    pub dut: Option<String>,

    /// Service UUID (4 hex digits or full form)
    #[arg(short, long, default_value = "180D")]
    pub service: String,

    /// Characteristic UUID (4 hex digits or full form)
    #[arg(short, long, default_value = "2A38")]
    pub characteristic: String,

    /// Scan window in seconds (defaults to the configured scan timeout)
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Remember a default device under test
    SetDut { name: String },
    /// Forget the default device under test
    UnsetDut,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
