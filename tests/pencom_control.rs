use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use pencom_to_redis::ChangeCallback;
use pencom_to_redis::ControllerConfig;
use pencom_to_redis::Error;
use pencom_to_redis::PencomControl;
use pencom_to_redis::RelayChange;
use pencom_to_redis::RelayState;

/// Emulates a bank of Pencom boards: applies writes, answers status requests.
fn fake_boards(board_count: usize) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve(stream, board_count)
    });
    (port, handle)
}

fn serve(stream: TcpStream, board_count: usize) -> Vec<String> {
    let mut writer = stream.try_clone().unwrap();
    let mut masks = vec![0u8; board_count];
    let mut received = Vec::new();

    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let bytes = line.as_bytes();
        let board = (bytes[0] - b'A') as usize;
        match bytes[1] {
            b'R' => {
                let answer = format!("{}\r\n", masks[board]);
                if writer.write_all(answer.as_bytes()).is_err() {
                    break;
                }
            }
            b'H' => masks[board] |= 1 << (bytes[2] - b'1'),
            b'L' => masks[board] &= !(1 << (bytes[2] - b'1')),
            _ => {}
        }
        received.push(line);
    }
    received
}

/// Answers the first status request with `mask`, then hangs up.
fn fake_board_hanging_up(mask: u8) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut lines = BufReader::new(stream).lines();
        while let Some(Ok(line)) = lines.next() {
            if line.ends_with("R0") {
                let _ = writer.write_all(format!("{}\r\n", mask).as_bytes());
                break;
            }
        }
        let _ = writer.shutdown(std::net::Shutdown::Both);
    });
    (port, handle)
}

fn config(port: u16, board_count: usize) -> ControllerConfig {
    ControllerConfig::new("127.0.0.1", port, board_count)
        .with_connect_timeout(Duration::from_secs(2))
        .with_polling_interval(Duration::from_millis(25))
        .with_receive_timeout(Duration::from_millis(10))
}

fn recording_callback() -> (ChangeCallback, Receiver<RelayChange>) {
    let (tx, rx) = mpsc::channel();
    let callback: ChangeCallback = Box::new(move |change: RelayChange| {
        let _ = tx.send(change);
    });
    (callback, rx)
}

fn wait_for_state(
    control: &PencomControl,
    board: usize,
    relay: usize,
    state: RelayState,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if control.get(board, relay) == state {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_set_is_observed_through_polling() {
    let (port, boards) = fake_boards(1);
    let (callback, changes) = recording_callback();
    let control = PencomControl::open(config(port, 1), Some(callback)).unwrap();

    assert!(wait_for_state(&control, 0, 0, RelayState::Off));
    control.set(0, 0, true);
    assert!(wait_for_state(&control, 0, 0, RelayState::On));
    assert_eq!(control.get(0, 1), RelayState::Off);

    control.close();

    let changes: Vec<RelayChange> = changes.try_iter().collect();
    assert_eq!(changes.len(), 9);
    assert_eq!(
        changes[8],
        RelayChange {
            board: 0,
            relay: 0,
            old: RelayState::Off,
            new: RelayState::On
        }
    );

    let received = boards.join().unwrap();
    assert!(received.contains(&"AH1".to_string()));
    assert!(received.iter().all(|line| line == "AR0" || line == "AH1"));
}

#[test]
fn test_answers_are_attributed_to_the_polled_board() {
    let (port, boards) = fake_boards(2);
    let control = PencomControl::open(config(port, 2), None).unwrap();

    assert!(wait_for_state(&control, 1, 0, RelayState::Off));
    control.set(1, 2, true);
    assert!(wait_for_state(&control, 1, 2, RelayState::On));

    // board A was never touched
    thread::sleep(Duration::from_millis(100));
    assert_eq!(control.get(0, 2), RelayState::Off);

    control.close();
    let received = boards.join().unwrap();
    assert!(received.contains(&"BR0".to_string()));
    assert!(received.contains(&"BH3".to_string()));
}

#[test]
fn test_no_writes_after_close() {
    let (port, boards) = fake_boards(1);
    let control = PencomControl::open(config(port, 1), None).unwrap();
    assert!(wait_for_state(&control, 0, 0, RelayState::Off));

    control.close();
    control.set(0, 0, true);
    control.close();

    let received = boards.join().unwrap();
    assert!(!received.contains(&"AH1".to_string()));
    assert_eq!(control.get(0, 0), RelayState::Off);
}

#[test]
fn test_invalid_address_sends_nothing() {
    let (port, boards) = fake_boards(1);
    let control = PencomControl::open(config(port, 1), None).unwrap();

    control.set(1, 0, true);
    control.set(0, 8, true);
    assert_eq!(control.get(1, 0), RelayState::Unknown);
    assert_eq!(control.get(0, 8), RelayState::Unknown);

    control.close();
    let received = boards.join().unwrap();
    assert!(received.iter().all(|line| line == "AR0"));
}

#[test]
fn test_connect_failure_is_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = PencomControl::open(config(port, 1), None);
    assert!(matches!(result, Err(Error::Connect { .. })));
}

#[test]
fn test_invalid_board_count_is_rejected_before_connecting() {
    let result = PencomControl::new("127.0.0.1", 1, 0, None, None);
    assert!(matches!(result, Err(Error::InvalidBoardCount(0))));
}

#[test]
fn test_peer_hang_up_keeps_last_known_state() {
    let (port, board) = fake_board_hanging_up(2);
    let control = PencomControl::open(config(port, 1), None).unwrap();

    assert!(wait_for_state(&control, 0, 1, RelayState::On));
    board.join().unwrap();
    thread::sleep(Duration::from_millis(200));

    assert_eq!(control.get(0, 0), RelayState::Off);
    assert_eq!(control.get(0, 1), RelayState::On);
    control.set(0, 0, true);
    assert_eq!(control.get(0, 0), RelayState::Off);

    let started = Instant::now();
    control.close();
    assert!(control.is_closed());
    assert!(started.elapsed() < Duration::from_secs(2));
}
