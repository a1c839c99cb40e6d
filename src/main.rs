use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;
use clap::ArgAction;
use clap::Parser;
use log::debug;
use log::info;
use log::warn;
use redis::Connection;

use pencom_to_redis::redis_shim::dispatch_relay_commands;
use pencom_to_redis::redis_shim::publish_relay_change;
use pencom_to_redis::redis_shim::RelayCommand;
use pencom_to_redis::ChangeCallback;
use pencom_to_redis::ControllerConfig;
use pencom_to_redis::Credentials;
use pencom_to_redis::PencomControl;
use pencom_to_redis::RelayChange;

/// Bridges a Pencom relay controller to Redis streams.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Host of the RS232 to Ethernet adaptor
    #[arg(long)]
    host: String,

    #[arg(long, default_value_t = 4008)]
    port: u16,

    /// Number of daisy-chained relay boards
    #[arg(long, default_value_t = 1)]
    boards: usize,

    #[arg(long)]
    username: Option<String>,

    #[arg(long, requires = "username")]
    password: Option<String>,

    #[arg(long, default_value = "redis://127.0.0.1/")]
    redis_url: String,

    /// Stream with entries {board, relay, state} to apply
    #[arg(long, default_value = "pencom_commands")]
    command_stream: String,

    /// Stream that receives every observed relay change
    #[arg(long, default_value = "pencom_states")]
    state_stream: String,

    #[arg(long, default_value = "pencom_commands_last_id")]
    last_entry_id_key: String,

    #[arg(long, default_value_t = 1000)]
    block_ms: usize,

    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Increase log verbosity, may be repeated
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    stderrlog::new()
        .module(module_path!())
        .quiet(args.quiet)
        .verbosity(args.verbose as usize + 1)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let credentials = args
        .username
        .as_ref()
        .map(|username| Credentials::new(username, args.password.clone().unwrap_or_default()));

    let (change_tx, change_rx) = mpsc::channel();
    let callback: ChangeCallback = Box::new(move |change: RelayChange| {
        if change_tx.send(change).is_err() {
            debug!("Dropping relay change, redis bridge is gone");
        }
    });

    let config = ControllerConfig::new(&args.host, args.port, args.boards)
        .with_credentials(credentials)
        .with_polling_interval(Duration::from_millis(args.poll_interval_ms));
    let control = PencomControl::open(config, Some(callback))?;

    let client = redis::Client::open(args.redis_url.as_str())?;
    let mut redis = client.get_connection()?;
    info!(
        "Applying commands from '{}', publishing changes to '{}'",
        args.command_stream, args.state_stream
    );

    let result = dispatch_relay_commands(
        &mut redis,
        &args.command_stream,
        &args.last_entry_id_key,
        args.block_ms,
        |e| {
            warn!("Skipping relay command: {}", e);
            None
        },
        &mut |redis: &mut Connection, commands: Option<Vec<RelayCommand>>| -> Result<()> {
            for command in commands.into_iter().flatten() {
                control.set(command.board, command.relay, command.on);
            }
            for change in change_rx.try_iter() {
                publish_relay_change(redis, &args.state_stream, &change)?;
            }
            Ok(())
        },
    );

    control.close();
    result?;
    Ok(())
}
