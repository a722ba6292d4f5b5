use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use tracegate::{AddressType, Errno, Pid, Ptrace, Request};
use tracing::Level;

pub const PID: i32 = 1234;

#[allow(unused)]
macro_rules! pid {
    ($raw: expr) => {
        tracegate::Pid::from_raw($raw)
    };
}

/// A request as seen by the backend, with its pointer arguments as plain words.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Seen {
    pub request: Request,
    pub pid: Pid,
    pub addr: usize,
    pub data: usize,
}

/// Backend answering requests from a script of outcomes, then with `Ok(0)`.
///
/// Thread identity is the real one, from `gettid()`.
#[derive(Debug, Default)]
pub struct Script {
    outcomes: VecDeque<Result<libc::c_long, Errno>>,
    pub seen: Vec<Seen>,
}

impl Script {
    pub fn new(outcomes: impl IntoIterator<Item = Result<libc::c_long, Errno>>) -> Self {
        let outcomes = outcomes.into_iter().collect();
        let seen = vec![];

        Self { outcomes, seen }
    }
}

impl Ptrace for Script {
    unsafe fn ptrace(
        &mut self,
        request: Request,
        pid: Pid,
        addr: AddressType,
        data: AddressType,
    ) -> Result<libc::c_long, Errno> {
        self.seen.push(Seen { request, pid, addr: addr as usize, data: data as usize });
        self.outcomes.pop_front().unwrap_or(Ok(0))
    }
}

/// Collects formatted log output in memory.
///
/// Every write also clobbers `errno`, as a real sink might.
#[derive(Clone, Debug, Default)]
pub struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(Level::TRACE)
            .with_ansi(false)
            .with_target(false)
            .without_time()
            .finish()
    }

    pub fn lines(&self) -> Vec<String> {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf).lines().map(str::to_owned).collect()
    }

    /// Logged lines describing ptrace calls.
    pub fn calls(&self) -> Vec<String> {
        self.lines().into_iter().filter(|l| l.contains(" ptrace(")).collect()
    }
}

impl io::Write for Capture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        // Fails with `EBADF`.
        let _ = nix::unistd::close(-1);

        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with log output captured.
pub fn capture<T>(f: impl FnOnce() -> T) -> (T, Capture) {
    let capture = Capture::default();
    let out = tracing::subscriber::with_default(capture.subscriber(), f);
    (out, capture)
}

pub fn null() -> AddressType {
    std::ptr::null_mut()
}
