//! Consumes status lines and folds them into the state table.
//!
//! The protocol carries no request id, so an answer is attributed to the
//! oldest outstanding poll. Polls that stay unanswered longer than the
//! response timeout are dropped, which keeps one lost answer from shifting
//! every later answer onto the wrong board.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::connection::Transport;
use crate::error::Error;
use crate::error::Result;
use crate::pencom_codec::board_letter;
use crate::pencom_codec::decode_status;
use crate::pencom_types::ChangeCallback;
use crate::poller::PendingPoll;
use crate::state_table::StateTable;

pub(crate) struct PendingPolls {
    rx: Receiver<PendingPoll>,
    queue: VecDeque<PendingPoll>,
    response_timeout: Duration,
}

impl PendingPolls {
    pub(crate) fn new(rx: Receiver<PendingPoll>, response_timeout: Duration) -> PendingPolls {
        PendingPolls {
            rx,
            queue: VecDeque::new(),
            response_timeout,
        }
    }

    /// Drops polls that have waited longer than the response timeout.
    pub(crate) fn expire(&mut self, now: Instant) {
        self.queue.extend(self.rx.try_iter());
        while let Some(poll) = self.queue.front() {
            if now.saturating_duration_since(poll.sent_at) <= self.response_timeout {
                break;
            }
            warn!(
                "Board {} did not answer its status request within {:?}",
                board_letter(poll.board),
                self.response_timeout
            );
            self.queue.pop_front();
        }
    }

    /// The board the next received line answers for, if any poll is outstanding.
    pub(crate) fn take(&mut self, now: Instant) -> Option<usize> {
        self.expire(now);
        self.queue.pop_front().map(|poll| poll.board)
    }
}

pub struct ReaderSettings {
    pub receive_timeout: Duration,
    pub response_timeout: Duration,
}

pub struct Reader {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reader {
    pub fn start(
        transport: Arc<dyn Transport>,
        table: Arc<StateTable>,
        pending: Receiver<PendingPoll>,
        settings: ReaderSettings,
        callback: Option<ChangeCallback>,
    ) -> Result<Reader> {
        let running = Arc::new(AtomicBool::new(true));
        let polls = PendingPolls::new(pending, settings.response_timeout);
        let receive_timeout = settings.receive_timeout;
        let name = String::from("pencom-reader");

        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                read_loop(
                    transport,
                    table,
                    polls,
                    receive_timeout,
                    callback,
                    thread_running,
                )
            })
            .map_err(|source| Error::Spawn { name, source })?;

        Ok(Reader {
            running,
            handle: Some(handle),
        })
    }

    /// Returns once the reader has noticed the flag, at most one receive timeout later.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Reader thread panicked");
            }
        }
    }
}

fn read_loop(
    transport: Arc<dyn Transport>,
    table: Arc<StateTable>,
    mut polls: PendingPolls,
    receive_timeout: Duration,
    mut callback: Option<ChangeCallback>,
    running: Arc<AtomicBool>,
) {
    info!("Reader started");
    while running.load(Ordering::SeqCst) {
        match transport.receive_line(receive_timeout) {
            Ok(None) => polls.expire(Instant::now()),
            Ok(Some(line)) => handle_line(&line, &table, &mut polls, &mut callback),
            Err(e) => {
                error!("Reading from relay controller failed: {}", e);
                break;
            }
        }
    }
    debug!("Reader stopped");
}

pub(crate) fn handle_line(
    line: &str,
    table: &StateTable,
    polls: &mut PendingPolls,
    callback: &mut Option<ChangeCallback>,
) {
    if line.is_empty() {
        return;
    }

    let mask = match decode_status(line) {
        Ok(mask) => mask,
        Err(e) => {
            warn!("{}", e);
            return;
        }
    };

    let board = match polls.take(Instant::now()) {
        Some(board) => board,
        None => {
            warn!("Discarding '{}': no status request is outstanding", line);
            return;
        }
    };

    for change in table.apply_mask(board, mask) {
        debug!(
            "Board {} relay {}: {} -> {}",
            board_letter(board),
            change.relay + 1,
            change.old,
            change.new
        );
        if let Some(callback) = callback.as_mut() {
            callback(change);
        }
    }
}
