//! Round-robin status requests, one board per polling interval.

use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::Sender;
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
use crate::pencom_codec::encode_poll;

/// A status request that has been sent and not yet answered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PendingPoll {
    pub board: usize,
    pub sent_at: Instant,
}

pub struct Poller {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Every poll is announced on `pending` before its line is written, so the
    /// reader always knows about a request before its answer can arrive.
    pub fn start(
        transport: Arc<dyn Transport>,
        board_count: usize,
        interval: Duration,
        pending: Sender<PendingPoll>,
    ) -> Result<Poller> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let name = String::from("pencom-poller");
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || poll_loop(transport, board_count, interval, pending, stop_rx))
            .map_err(|source| Error::Spawn { name, source })?;
        Ok(Poller {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Wakes the poller out of its sleep and waits for it to finish.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Poller thread panicked");
            }
        }
    }
}

fn poll_loop(
    transport: Arc<dyn Transport>,
    board_count: usize,
    interval: Duration,
    pending: Sender<PendingPoll>,
    stop_rx: Receiver<()>,
) {
    info!("Polling {} board(s) every {:?}", board_count, interval);
    loop {
        for board in 0..board_count {
            let poll = PendingPoll {
                board,
                sent_at: Instant::now(),
            };
            if pending.send(poll).is_err() {
                warn!("Reader is gone, stopping poller");
                return;
            }
            if let Err(e) = transport.send_line(&encode_poll(board)) {
                error!("Failed to poll board {}: {}", board_letter(board), e);
                return;
            }

            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("Poller stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::ScriptedTransport;

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_polls_boards_round_robin() {
        let transport = ScriptedTransport::new();
        let (pending_tx, pending_rx) = mpsc::channel();
        let mut poller = Poller::start(
            transport.clone(),
            3,
            Duration::from_millis(5),
            pending_tx,
        )
        .unwrap();

        assert!(wait_until(|| transport.polls_sent() >= 4));
        poller.stop();

        let sent = transport.sent();
        assert_eq!(&sent[..4], &["AR0", "BR0", "CR0", "AR0"]);

        let boards: Vec<usize> = pending_rx.try_iter().map(|p| p.board).collect();
        assert_eq!(boards.len(), sent.len());
        assert_eq!(&boards[..4], &[0, 1, 2, 0]);
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let transport = ScriptedTransport::new();
        let (pending_tx, _pending_rx) = mpsc::channel();
        let mut poller = Poller::start(
            transport.clone(),
            1,
            Duration::from_secs(60),
            pending_tx,
        )
        .unwrap();

        assert!(wait_until(|| transport.polls_sent() == 1));
        let started = Instant::now();
        poller.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.polls_sent(), 1);
    }

    #[test]
    fn test_send_failure_ends_loop() {
        let transport = ScriptedTransport::new();
        transport.close();
        let (pending_tx, _pending_rx) = mpsc::channel();
        let mut poller = Poller::start(
            transport.clone(),
            1,
            Duration::from_millis(1),
            pending_tx,
        )
        .unwrap();

        assert!(wait_until(|| transport.writes_after_close() == 1));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(transport.writes_after_close(), 1);
        poller.stop();
    }
}
