use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::connection::lock;
use crate::connection::TcpConnection;
use crate::connection::Transport;
use crate::error::Error;
use crate::error::Result;
use crate::pencom_codec::encode_write;
use crate::pencom_types::is_valid_address;
use crate::pencom_types::ChangeCallback;
use crate::pencom_types::Credentials;
use crate::pencom_types::RelayState;
use crate::pencom_types::MAX_BOARDS;
use crate::pencom_types::RELAYS_PER_BOARD;
use crate::poller::Poller;
use crate::reader::Reader;
use crate::reader::ReaderSettings;
use crate::state_table::BoardStates;
use crate::state_table::StateTable;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub host: String,
    pub port: u16,
    pub board_count: usize,
    pub credentials: Option<Credentials>,
    pub connect_timeout: Duration,
    pub polling_interval: Duration,
    pub receive_timeout: Duration,
    /// Defaults to the polling interval.
    pub response_timeout: Option<Duration>,
}

impl ControllerConfig {
    pub fn new<S: Into<String>>(host: S, port: u16, board_count: usize) -> Self {
        Self {
            host: host.into(),
            port,
            board_count,
            credentials: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            response_timeout: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout.unwrap_or(self.polling_interval)
    }

    pub fn validate(&self) -> Result<()> {
        match (1..=MAX_BOARDS).contains(&self.board_count) {
            true => Ok(()),
            false => Err(Error::InvalidBoardCount(self.board_count)),
        }
    }
}

/// Client for one Pencom relay controller.
///
/// Owns a poller thread that requests each board's bitmask in turn and a
/// reader thread that keeps the cached relay states current. `set` only sends
/// the write command; the cached state follows once the next poll observes it.
pub struct PencomControl {
    board_count: usize,
    polling_interval: Duration,
    transport: Arc<dyn Transport>,
    table: Arc<StateTable>,
    poller: Mutex<Option<Poller>>,
    reader: Mutex<Option<Reader>>,
    closed: AtomicBool,
}

impl PencomControl {
    pub fn new<S: Into<String>>(
        host: S,
        port: u16,
        board_count: usize,
        credentials: Option<Credentials>,
        callback: Option<ChangeCallback>,
    ) -> Result<PencomControl> {
        let config = ControllerConfig::new(host, port, board_count).with_credentials(credentials);
        PencomControl::open(config, callback)
    }

    pub fn open(
        config: ControllerConfig,
        callback: Option<ChangeCallback>,
    ) -> Result<PencomControl> {
        config.validate()?;
        if let Some(credentials) = &config.credentials {
            debug!(
                "Login for '{}' is not sent, the relay protocol has no authentication",
                credentials.username
            );
        }
        let connection = TcpConnection::connect(&config.host, config.port, config.connect_timeout)?;
        info!("Opened relay controller connection to {}", connection.peer());
        PencomControl::with_transport(Arc::new(connection), &config, callback)
    }

    /// Starts the background loops on an already established transport.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: &ControllerConfig,
        callback: Option<ChangeCallback>,
    ) -> Result<PencomControl> {
        config.validate()?;

        let table = Arc::new(StateTable::new(config.board_count));
        let (pending_tx, pending_rx) = mpsc::channel();
        let settings = ReaderSettings {
            receive_timeout: config.receive_timeout,
            response_timeout: config.response_timeout(),
        };

        let mut reader = match Reader::start(
            transport.clone(),
            table.clone(),
            pending_rx,
            settings,
            callback,
        ) {
            Ok(reader) => reader,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };

        let poller = match Poller::start(
            transport.clone(),
            config.board_count,
            config.polling_interval,
            pending_tx,
        ) {
            Ok(poller) => poller,
            Err(e) => {
                reader.stop();
                transport.close();
                return Err(e);
            }
        };

        info!(
            "Controlling {} board(s) at {}:{}",
            config.board_count, config.host, config.port
        );

        Ok(PencomControl {
            board_count: config.board_count,
            polling_interval: config.polling_interval,
            transport,
            table,
            poller: Mutex::new(Some(poller)),
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn board_count(&self) -> usize {
        self.board_count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set(&self, board: usize, relay: usize, on: bool) {
        if !is_valid_address(self.board_count, board, relay) {
            error!("SET board or relay out of range: {}, {}", board, relay);
            return;
        }
        if self.is_closed() {
            warn!("Ignoring SET {}, {}: controller is closed", board, relay);
            return;
        }
        if let Err(e) = self.transport.send_line(&encode_write(board, relay, on)) {
            error!("Failed to set board {} relay {}: {}", board, relay, e);
        }
    }

    pub fn set_all(&self, board: usize, on: bool) {
        if board >= self.board_count {
            error!("SET board out of range: {}", board);
            return;
        }
        for relay in 0..RELAYS_PER_BOARD {
            self.set(board, relay, on);
        }
    }

    pub fn get(&self, board: usize, relay: usize) -> RelayState {
        match self.table.get(board, relay) {
            Some(state) => state,
            None => {
                error!("GET board or relay out of range: {}, {}", board, relay);
                RelayState::Unknown
            }
        }
    }

    pub fn snapshot(&self) -> Vec<BoardStates> {
        self.table.snapshot()
    }

    /// Stops polling, lets the last answer arrive, then stops reading and
    /// drops the connection. Blocks for about one polling interval.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing relay controller");

        if let Some(mut poller) = lock(&self.poller).take() {
            poller.stop();
        }
        thread::sleep(self.polling_interval);
        if let Some(mut reader) = lock(&self.reader).take() {
            reader.stop();
        }
        self.transport.close();
    }
}

impl Drop for PencomControl {
    fn drop(&mut self) {
        self.close();
    }
}
