//! Client for Pencom relay boards attached through an RS232 to Ethernet adaptor.
//!
//! [`PencomControl`] keeps one TCP connection to the adaptor, polls every
//! board for its relay bitmask in the background and serves the last observed
//! relay states from a cache. Relay writes go straight to the wire; the cache
//! only changes once a poll answer confirms the new state.
//!
//! ```no_run
//! use pencom_to_redis::PencomControl;
//! use pencom_to_redis::RelayState;
//!
//! # fn example() -> Result<(), pencom_to_redis::Error> {
//! let control = PencomControl::new("192.168.2.55", 4008, 1, None, None)?;
//! control.set(0, 0, true);
//! if control.get(0, 0) == RelayState::On {
//!     println!("relay 1 of board A is on");
//! }
//! control.close();
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod pencom_codec;
pub mod pencom_ctl;
pub mod pencom_types;
pub mod poller;
pub mod reader;
pub mod redis_shim;
pub mod state_table;

pub use connection::TcpConnection;
pub use connection::Transport;
pub use error::DecodeError;
pub use error::Error;
pub use pencom_ctl::ControllerConfig;
pub use pencom_ctl::PencomControl;
pub use pencom_types::ChangeCallback;
pub use pencom_types::Credentials;
pub use pencom_types::RelayChange;
pub use pencom_types::RelayState;
pub use pencom_types::RELAYS_PER_BOARD;
