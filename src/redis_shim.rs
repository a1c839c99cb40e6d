use crate::pencom_types::RelayChange;
use crate::pencom_types::RELAYS_PER_BOARD;

use anyhow::Result;
use redis::streams::StreamReadOptions;
use redis::streams::StreamReadReply;
use redis::Commands;
use redis::Connection;
use redis::FromRedisValue;
use redis::RedisError;
use redis::RedisResult;
use redis::Value;
use std::collections::HashMap;
use thiserror::Error;

/// A relay write requested through the command stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RelayCommand {
    pub board: usize,
    pub relay: usize,
    pub on: bool,
}

/// A command stream entry that does not describe a relay write.
#[derive(Debug, Error)]
#[error("Rejected relay command '{entry_id}' of stream '{stream_key}': {reason}")]
pub struct ConvertionError {
    stream_key: String,
    entry_id: String,
    reason: String,
    #[source]
    source: Option<RedisError>,
}

impl ConvertionError {
    pub fn new<S: Into<String>>(stream_key: &str, entry_id: &str, reason: S) -> Self {
        Self {
            stream_key: stream_key.to_string(),
            entry_id: entry_id.to_string(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: RedisError) -> Self {
        self.source = Some(source);
        self
    }
}

#[derive(Debug, Error)]
enum XReadRelayCommandsError {
    #[error(transparent)]
    ConvertionError(#[from] ConvertionError),

    #[error(transparent)]
    RedisError(#[from] RedisError),
}

#[derive(Debug, Error)]
pub enum DispatchRelayCommandsError {
    #[error(transparent)]
    ConvertionError(#[from] ConvertionError),

    #[error(transparent)]
    RedisError(#[from] RedisError),

    #[error(transparent)]
    RelayCommandsHandlerError(#[from] anyhow::Error),
}

/// Reads relay commands from `stream_key` until Redis or the handler fails.
///
/// The handler is also called with `None` whenever `XREAD` times out, so it
/// gets a chance to run at least every `block_ms`.
pub fn dispatch_relay_commands<E, H>(
    redis: &mut Connection,
    stream_key: &str,
    last_entry_id_key: &str,
    block_ms: usize,
    convertion_error_handler: E,
    relay_commands_handler: &mut H,
) -> Result<(), DispatchRelayCommandsError>
where
    E: Fn(ConvertionError) -> Option<ConvertionError>,
    H: FnMut(&mut Connection, Option<Vec<RelayCommand>>) -> Result<()>,
{
    loop {
        let last_entry_id: Option<String> = redis.get(last_entry_id_key)?;

        let last_entry_id = match last_entry_id {
            Some(last_entry_id) => last_entry_id,
            None => String::from("$"),
        };

        let xread_result = xread_relay_commands(
            redis,
            stream_key,
            &last_entry_id,
            block_ms,
            &convertion_error_handler,
        );

        let xread_result = match xread_result {
            Ok(xread_result) => xread_result,
            Err(e) => match e {
                XReadRelayCommandsError::ConvertionError(e) => {
                    return Err(DispatchRelayCommandsError::ConvertionError(e))
                }
                XReadRelayCommandsError::RedisError(e) => {
                    return Err(DispatchRelayCommandsError::RedisError(e))
                }
            },
        };

        let xread_result = match xread_result {
            Some(xread_result) => (Some(xread_result.0), xread_result.1),
            None => (None, None),
        };

        relay_commands_handler(redis, xread_result.1)?;

        if let Some(last_entry_id) = xread_result.0 {
            let _: () = redis.set(last_entry_id_key, last_entry_id)?;
        }
    }
}

fn xread_relay_commands<E>(
    redis: &mut Connection,
    stream_key: &str,
    last_entry_id: &str,
    block_ms: usize,
    convertion_error_handler: E,
) -> Result<Option<(String, Option<Vec<RelayCommand>>)>, XReadRelayCommandsError>
where
    E: Fn(ConvertionError) -> Option<ConvertionError>,
{
    let opts = StreamReadOptions::default().block(block_ms);
    let reply: Option<StreamReadReply> =
        redis.xread_options(&[stream_key], &[last_entry_id], &opts)?;

    let reply = match reply {
        Some(reply) => reply,
        None => return Ok(None),
    };

    for stream in reply.keys {
        let mut relay_commands = Vec::new();
        let mut entry_id = String::from(last_entry_id);
        for entry in stream.ids {
            entry_id = entry.id;
            match from_redis(&stream.key, &entry_id, entry.map) {
                Ok(command) => relay_commands.push(command),
                Err(e) => {
                    if let Some(e) = convertion_error_handler(e) {
                        return Err(XReadRelayCommandsError::ConvertionError(e));
                    }
                    continue;
                }
            };
        }

        let relay_commands = match relay_commands.is_empty() {
            true => None,
            false => Some(relay_commands),
        };

        return Ok(Some((entry_id, relay_commands)));
    }
    Ok(None)
}

/// Appends one observed relay change to `stream_key`.
pub fn publish_relay_change(
    redis: &mut Connection,
    stream_key: &str,
    change: &RelayChange,
) -> RedisResult<String> {
    redis.xadd(stream_key, "*", &relay_change_fields(change))
}

fn relay_change_fields(change: &RelayChange) -> [(&'static str, String); 4] {
    [
        ("board", change.board.to_string()),
        ("relay", (change.relay + 1).to_string()),
        ("old", change.old.to_string()),
        ("new", change.new.to_string()),
    ]
}

struct CommandEntry<'a> {
    stream_key: &'a str,
    entry_id: &'a str,
    fields: HashMap<String, Value>,
}

impl CommandEntry<'_> {
    fn field(&self, name: &str) -> Result<String, ConvertionError> {
        let value = self.fields.get(name).ok_or_else(|| {
            self.reject(format!("Field '{}' is missing", name))
        })?;
        String::from_redis_value(value).map_err(|e| {
            self.reject(format!("Field '{}' is not a string: {}", name, e))
                .with_source(e)
        })
    }

    fn reject<S: Into<String>>(&self, reason: S) -> ConvertionError {
        ConvertionError::new(self.stream_key, self.entry_id, reason)
    }
}

fn from_redis(
    stream_key: &str,
    entry_id: &str,
    fields: HashMap<String, Value>,
) -> Result<RelayCommand, ConvertionError> {
    let entry = CommandEntry {
        stream_key,
        entry_id,
        fields,
    };

    let board = entry.field("board")?;
    let board = board
        .parse::<usize>()
        .map_err(|_| entry.reject(format!("Invalid board number '{}'", board)))?;

    // relays are numbered 1 to 8 on the stream, as on the wire
    let relay = entry.field("relay")?;
    let relay = match relay.parse::<usize>() {
        Ok(number) if (1..=RELAYS_PER_BOARD).contains(&number) => number - 1,
        _ => return Err(entry.reject(format!("Invalid relay number '{}'", relay))),
    };

    let state = entry.field("state")?;
    let on = match state.as_str() {
        "On" => true,
        "Off" => false,
        unknown => return Err(entry.reject(format!("Invalid relay state '{}'", unknown))),
    };

    Ok(RelayCommand { board, relay, on })
}
