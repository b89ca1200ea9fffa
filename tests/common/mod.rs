//! Shared test fixtures: a scripted stub engine and wait helpers.
#![allow(dead_code)] // not every test binary uses every fixture

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use towline::{
    ActionTarget, Completion, Config, Drive, EngineDriver, EngineError, EventMask, Interest,
    Request, SocketToken, TimerRequest, TransferEngine, TransferId, TransferStatus,
};

/// How the stub completes transfers.
#[derive(Clone, Copy)]
pub enum Mode {
    /// Complete on the next engine drive; request it via a 0 ms timer.
    TimerNow,
    /// Complete when the shared timer fires after this delay.
    TimerAfter(Duration),
    /// Route each transfer through a real pipe fd so the socket-context
    /// path (watch, readiness, two-step close) is exercised.
    Pipe,
    /// Like `Pipe`, but over a socketpair: watch readable first, then
    /// replace the interest with writable before completing. Exercises
    /// interest replacement on a live watch.
    PipeRewatch,
    /// Never complete anything.
    Stuck,
}

type StatusFn = Box<dyn Fn(&Request) -> TransferStatus + Send>;

struct PipeTransfer {
    id: TransferId,
    status: TransferStatus,
    peer_fd: RawFd,
    token: SocketToken,
    rewatched: bool,
}

/// A transfer engine that completes transfers with pre-seeded statuses.
pub struct StubEngine {
    mode: Mode,
    status_for: StatusFn,
    /// Timer modes: transfers awaiting the next drive.
    pending: Vec<Completion>,
    /// Pipe mode: transfers keyed by their pipe read fd.
    by_fd: HashMap<RawFd, PipeTransfer>,
    done: Vec<Completion>,
    /// Guards against the core driving the engine from inside its own
    /// add_transfer call.
    inside_add: bool,
    /// Return CallAgain from the first drive to exercise the drive loop.
    call_again_once: bool,
}

impl StubEngine {
    pub fn new(mode: Mode) -> Self {
        Self::with_status(mode, |_| TransferStatus::Success)
    }

    pub fn with_status(
        mode: Mode,
        status_for: impl Fn(&Request) -> TransferStatus + Send + 'static,
    ) -> Self {
        Self {
            mode,
            status_for: Box::new(status_for),
            pending: Vec::new(),
            by_fd: HashMap::new(),
            done: Vec::new(),
            inside_add: false,
            call_again_once: true,
        }
    }
}

impl TransferEngine for StubEngine {
    fn add_transfer(
        &mut self,
        id: TransferId,
        request: &Request,
        driver: &mut dyn EngineDriver,
    ) -> Result<(), EngineError> {
        self.inside_add = true;
        let status = (self.status_for)(request);
        match self.mode {
            Mode::TimerNow => {
                self.pending.push(Completion { id, status });
                driver.set_timer(TimerRequest::Now);
            }
            Mode::TimerAfter(delay) => {
                self.pending.push(Completion { id, status });
                driver.set_timer(TimerRequest::After(delay));
            }
            Mode::Pipe | Mode::PipeRewatch => {
                let mut fds = [0 as RawFd; 2];
                let rc = if matches!(self.mode, Mode::Pipe) {
                    unsafe { libc::pipe(fds.as_mut_ptr()) }
                } else {
                    unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) }
                };
                assert_eq!(rc, 0, "pipe()/socketpair() failed");
                let one = [1u8];
                unsafe {
                    libc::write(fds[1], one.as_ptr() as *const libc::c_void, 1);
                }
                let token = driver.update_socket(fds[0], Interest::Readable, None);
                self.by_fd.insert(
                    fds[0],
                    PipeTransfer {
                        id,
                        status,
                        peer_fd: fds[1],
                        token,
                        rewatched: false,
                    },
                );
            }
            Mode::Stuck => {
                driver.set_timer(TimerRequest::After(Duration::from_secs(3600)));
            }
        }
        self.inside_add = false;
        Ok(())
    }

    fn remove_transfer(&mut self, _id: TransferId) {}

    fn socket_action(
        &mut self,
        target: ActionTarget,
        events: EventMask,
        driver: &mut dyn EngineDriver,
    ) -> Result<Drive, EngineError> {
        assert!(
            !self.inside_add,
            "engine driven recursively from inside add_transfer"
        );
        if self.call_again_once {
            self.call_again_once = false;
            return Ok(Drive::CallAgain);
        }
        match target {
            ActionTarget::Timeout => {
                if !matches!(self.mode, Mode::Stuck) {
                    self.done.append(&mut self.pending);
                }
            }
            ActionTarget::Socket(fd) => {
                if !self.by_fd.contains_key(&fd) {
                    return Ok(Drive::Settled);
                }
                if events.contains(EventMask::ERR) {
                    // Socket failure: give up on the transfer.
                    let transfer = self.by_fd.remove(&fd).unwrap();
                    driver.remove_socket(fd, Some(transfer.token));
                    unsafe {
                        libc::close(fd);
                        libc::close(transfer.peer_fd);
                    }
                    self.done.push(Completion {
                        id: transfer.id,
                        status: TransferStatus::ConnectError,
                    });
                } else if matches!(self.mode, Mode::PipeRewatch) && !self.by_fd[&fd].rewatched {
                    assert!(
                        events.contains(EventMask::IN),
                        "socketpair reported without IN before the rewatch"
                    );
                    let token = self.by_fd[&fd].token;
                    let new_token = driver.update_socket(fd, Interest::Writable, Some(token));
                    let transfer = self.by_fd.get_mut(&fd).unwrap();
                    transfer.rewatched = true;
                    transfer.token = new_token;
                } else {
                    assert!(
                        events.contains(EventMask::IN) || events.contains(EventMask::OUT),
                        "watched fd reported without IN or OUT"
                    );
                    let transfer = self.by_fd.remove(&fd).unwrap();
                    driver.remove_socket(fd, Some(transfer.token));
                    unsafe {
                        libc::close(fd);
                        libc::close(transfer.peer_fd);
                    }
                    self.done.push(Completion {
                        id: transfer.id,
                        status: transfer.status,
                    });
                }
            }
        }
        Ok(Drive::Settled)
    }

    fn drain_completions(&mut self, out: &mut Vec<Completion>) {
        out.append(&mut self.done);
    }
}

/// Completion log a test callback pushes into.
pub type Results = Arc<Mutex<Vec<(String, TransferStatus)>>>;

pub fn results() -> Results {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorded(results: &Results) -> Vec<(String, TransferStatus)> {
    results.lock().unwrap().clone()
}

/// Spin until `cond` holds, panicking after five seconds.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

pub fn test_config() -> Config {
    Config {
        pending_capacity: 16,
        transfer_capacity: 16,
        ..Config::default()
    }
}
