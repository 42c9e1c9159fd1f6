use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::command::{Cli, Commands, LogFormat};
use cli::info::cmd_info;
use cli::remux::cmd_remux;

mod cli;
mod input;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_level = cli.loglevel.to_level_filter();

    let multi = MultiProgress::new();

    let mut env_builder = env_logger::Builder::from_default_env();
    env_builder.filter_level(base_level);
    match cli.log_format {
        LogFormat::Plain => {
            env_builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            env_builder.format(|buf, record| {
                use std::io::Write;
                let line = json_record(&buf.timestamp().to_string(), record);
                writeln!(buf, "{line}")
            });
        }
    }

    let pb = if cli.progress {
        let logger = env_builder.build();
        LogWrapper::new(multi.clone(), logger).try_init()?;
        Some(&multi)
    } else {
        env_builder.try_init()?;
        None
    };

    log::debug!(
        "{} {} (oggframe {}, built {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("OGGFRAME_VERSION"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Commands::Info(ref args) => cmd_info(args, &cli, pb)?,
        Commands::Remux(ref args) => cmd_remux(args, &cli, pb)?,
    }

    Ok(())
}

fn json_record(ts: &str, record: &log::Record) -> serde_json::Value {
    serde_json::json!({
        "ts": ts,
        "lvl": record.level().as_str(),
        "target": record.target(),
        "msg": record.args().to_string(),
    })
}

#[test]
fn json_record_escapes_message() {
    let line = json_record(
        "2026-01-01T00:00:00Z",
        &log::Record::builder()
            .level(log::Level::Warn)
            .target("oggframe::process::demux")
            .args(format_args!("say \"hi\"\n\tnow"))
            .build(),
    )
    .to_string();
    assert_eq!(
        line,
        r#"{"lvl":"WARN","msg":"say \"hi\"\n\tnow","target":"oggframe::process::demux","ts":"2026-01-01T00:00:00Z"}"#
    );

    let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed["msg"], "say \"hi\"\n\tnow");
}
