use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = env!("CARGO_PKG_VERSION"),
    author     = env!("CARGO_PKG_AUTHORS"),
    long_version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (oggframe ",
        env!("OGGFRAME_VERSION"),
        ", built ",
        env!("BUILD_TIMESTAMP"),
        ")"
    ),
    about      = "Tools for inspecting and repaginating Ogg bitstreams",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print a summary of every logical stream.
    Info(InfoArgs),

    /// Rewrite the physical stream with freshly sequenced, checksummed pages.
    Remux(RemuxArgs),
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input Ogg bitstream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct RemuxArgs {
    /// Input Ogg bitstream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output file.
    #[arg(long, short, value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum OutputFormat {
    /// Aligned human-readable text.
    Text,
    /// YAML document.
    Yaml,
}

impl Cli {
    /// Level at which recoverable stream problems become errors.
    pub fn fail_level(&self) -> log::Level {
        if self.strict {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "oggframed",
            "info",
            "in.ogg",
            "--format",
            "yaml",
            "--strict",
            "--loglevel",
            "debug",
        ])
        .unwrap();

        assert!(cli.strict);
        assert_eq!(cli.fail_level(), log::Level::Warn);
        assert_eq!(cli.loglevel.to_level_filter(), log::LevelFilter::Debug);
        match cli.command {
            Commands::Info(args) => {
                assert_eq!(args.input, PathBuf::from("in.ogg"));
                assert_eq!(args.format, OutputFormat::Yaml);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn remux_requires_output() {
        assert!(Cli::try_parse_from(["oggframed", "remux", "in.ogg"]).is_err());

        let cli = Cli::try_parse_from(["oggframed", "remux", "-", "-o", "out.ogg"]).unwrap();
        assert_eq!(cli.fail_level(), log::Level::Error);
        assert!(matches!(
            cli.command,
            Commands::Remux(RemuxArgs { ref input, ref output })
                if input.as_os_str() == "-" && output.as_os_str() == "out.ogg"
        ));
    }
}
