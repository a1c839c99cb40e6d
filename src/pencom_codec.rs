//! Line protocol spoken by Pencom relay boards behind an RS232 to Ethernet adaptor.
//!
//! Outgoing commands are newline terminated:
//!
//! ```text
//! AH3   board A, relay 3 (1-based) on
//! BL1   board B, relay 1 off
//! AR0   request the relay bitmask of board A
//! ```
//!
//! The board answers a status request with a decimal bitmask terminated by a
//! carriage return, bit 0 being the first relay.

use log::warn;

use crate::error::DecodeError;
use crate::pencom_types::RelayState;
use crate::pencom_types::RELAYS_PER_BOARD;

/// Incoming lines longer than this are garbage, not a bitmask.
const MAX_LINE_LENGTH: usize = 1024;

pub fn board_letter(board: usize) -> char {
    (b'A' + board as u8) as char
}

pub fn encode_write(board: usize, relay: usize, on: bool) -> String {
    let level = match on {
        true => 'H',
        false => 'L',
    };
    format!("{}{}{}", board_letter(board), level, relay + 1)
}

pub fn encode_poll(board: usize) -> String {
    format!("{}R0", board_letter(board))
}

pub fn decode_status(line: &str) -> Result<u64, DecodeError> {
    let line = line.trim();
    match line.parse::<u64>() {
        Ok(mask) => Ok(mask),
        Err(_) => Err(DecodeError {
            line: line.to_string(),
        }),
    }
}

pub fn relay_states(mask: u64) -> [RelayState; RELAYS_PER_BOARD] {
    let mut states = [RelayState::Unknown; RELAYS_PER_BOARD];
    for (relay, state) in states.iter_mut().enumerate() {
        *state = RelayState::from_bit(mask & (1 << relay) != 0);
    }
    states
}

/// Reassembles carriage-return terminated lines from arbitrary socket reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_LINE_LENGTH && !self.buf.contains(&b'\r') {
            warn!(
                "Discarding {} bytes received without a line terminator",
                self.buf.len()
            );
            self.buf.clear();
        }
    }

    /// Pops the next complete line, trimmed of surrounding whitespace.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|b| *b == b'\r')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
