use std::sync::PoisonError;
use std::sync::RwLock;

use crate::pencom_codec::relay_states;
use crate::pencom_types::is_valid_address;
use crate::pencom_types::RelayChange;
use crate::pencom_types::RelayState;
use crate::pencom_types::RELAYS_PER_BOARD;

pub type BoardStates = [RelayState; RELAYS_PER_BOARD];

/// Last observed state of every relay, `Unknown` until a board answers a poll.
///
/// The reader thread is the only writer. `get` takes a read lock and never
/// touches the connection.
#[derive(Debug)]
pub struct StateTable {
    board_count: usize,
    boards: RwLock<Vec<BoardStates>>,
}

impl StateTable {
    pub fn new(board_count: usize) -> StateTable {
        StateTable {
            board_count,
            boards: RwLock::new(vec![[RelayState::Unknown; RELAYS_PER_BOARD]; board_count]),
        }
    }

    pub fn board_count(&self) -> usize {
        self.board_count
    }

    /// `None` for an address outside the table.
    pub fn get(&self, board: usize, relay: usize) -> Option<RelayState> {
        if !is_valid_address(self.board_count, board, relay) {
            return None;
        }
        let boards = self.boards.read().unwrap_or_else(PoisonError::into_inner);
        Some(boards[board][relay])
    }

    pub fn snapshot(&self) -> Vec<BoardStates> {
        self.boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stores the bitmask reported by `board` and returns the relays that
    /// changed, in relay order. Relays that kept their state are untouched.
    pub fn apply_mask(&self, board: usize, mask: u64) -> Vec<RelayChange> {
        if board >= self.board_count {
            return Vec::new();
        }

        let mut boards = self.boards.write().unwrap_or_else(PoisonError::into_inner);
        let current = &mut boards[board];
        let mut changes = Vec::new();
        for (relay, new) in relay_states(mask).into_iter().enumerate() {
            let old = current[relay];
            if old != new {
                current[relay] = new;
                changes.push(RelayChange {
                    board,
                    relay,
                    old,
                    new,
                });
            }
        }
        changes
    }
}
