// SPDX-License-Identifier: Apache-2.0

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tailship")]
#[command(bin_name = "tailship")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
pub struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "TAILSHIP_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the pipeline until interrupted
    Start(RunArgs),

    /// Load and validate the configuration, then exit
    CheckConfig(RunArgs),

    /// Return version
    Version,
}

#[derive(Debug, Args, Clone, Default)]
pub struct RunArgs {
    /// TOML configuration file, merged under TAILSHIP_* environment variables
    #[arg(long, short = 'c', env = "TAILSHIP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for positions, archive state and the status file
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}
