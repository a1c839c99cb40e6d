use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

/// Number of relays wired to a single board.
pub const RELAYS_PER_BOARD: usize = 8;

/// Boards are addressed by a single ASCII letter starting at `A`.
pub const MAX_BOARDS: usize = 26;

#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelayState {
    #[default]
    Unknown,
    Off,
    On,
}

impl RelayState {
    pub fn from_bit(bit: bool) -> RelayState {
        match bit {
            true => RelayState::On,
            false => RelayState::Off,
        }
    }

    /// Numeric form used by the home automation side: -1, 0 or 1.
    pub fn as_i8(&self) -> i8 {
        match self {
            RelayState::Unknown => -1,
            RelayState::Off => 0,
            RelayState::On => 1,
        }
    }
}

impl Display for RelayState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            RelayState::Unknown => "Unknown",
            RelayState::Off => "Off",
            RelayState::On => "On",
        };
        write!(f, "{}", name)
    }
}

/// A relay whose cached state moved from `old` to `new`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RelayChange {
    pub board: usize,
    pub relay: usize,
    pub old: RelayState,
    pub new: RelayState,
}

/// Invoked on the reader thread for every relay whose cached state changed.
pub type ChangeCallback = Box<dyn FnMut(RelayChange) + Send + 'static>;

/// Login for the serial-to-ethernet adaptor. Accepted, but never sent.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new<S1: Into<String>, S2: Into<String>>(username: S1, password: S2) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

pub fn is_valid_address(board_count: usize, board: usize, relay: usize) -> bool {
    board < board_count && relay < RELAYS_PER_BOARD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_state_numeric_form() {
        assert_eq!(RelayState::Unknown.as_i8(), -1);
        assert_eq!(RelayState::Off.as_i8(), 0);
        assert_eq!(RelayState::On.as_i8(), 1);
        assert_eq!(RelayState::default(), RelayState::Unknown);
    }

    #[test]
    fn test_relay_state_display() {
        assert_eq!(RelayState::On.to_string(), "On");
        assert_eq!(RelayState::Off.to_string(), "Off");
        assert_eq!(RelayState::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_is_valid_address() {
        assert!(is_valid_address(2, 1, 7));
        assert!(!is_valid_address(2, 2, 0));
        assert!(!is_valid_address(2, 0, RELAYS_PER_BOARD));
        assert!(!is_valid_address(0, 0, 0));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::new("admin", "secret");
        let debug_str = format!("{:?}", credentials);
        assert!(debug_str.contains("admin"));
        assert!(!debug_str.contains("secret"));
    }
}
