//! Call sites and per-call records, formatted for diagnostics.

use std::fmt;

use nix::errno::Errno;
use nix::sys::ptrace::AddressType;

use crate::request::{request_name, Request};
use crate::Pid;

/// Capacity of the scratch buffer used to name unrecognized requests.
const UNKNOWN_NAME_CAPACITY: usize = 100;

/// Source location of the code that issued a ptrace request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Origin {
    pub file: &'static str,
    pub line: u32,
}

impl Origin {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location of the caller of the nearest function not marked `#[track_caller]`.
    #[track_caller]
    pub fn caller() -> Self {
        let location = std::panic::Location::caller();
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// The [`Origin`] of the macro invocation site.
#[macro_export]
macro_rules! origin {
    () => {
        $crate::Origin::new(file!(), line!())
    };
}

/// One gateway call, from its arguments to its outcome.
///
/// Lives only for the duration of the call it describes.
#[derive(Clone, Copy, Debug)]
pub struct CallRecord {
    pub origin: Origin,
    pub request: Request,
    pub pid: Pid,
    pub addr: AddressType,
    pub data: AddressType,

    /// Unset until the underlying call has returned.
    pub outcome: Option<Result<libc::c_long, Errno>>,
}

impl CallRecord {
    pub fn new(origin: Origin, request: Request, pid: Pid, addr: AddressType, data: AddressType) -> Self {
        Self { origin, request, pid, addr, data, outcome: None }
    }

    /// The `file:line ptrace(...)` line, without any result.
    pub fn call_line(&self) -> CallLine<'_> {
        CallLine(self)
    }

    /// The call line, completed with the raw result if this was a peek.
    ///
    /// A failed peek returns `-1`, which is shown as such.
    pub fn trace_line(&self) -> TraceLine<'_> {
        TraceLine(self)
    }

    /// Describe the failure of the call, if it failed.
    pub fn error_line(&self) -> Option<ErrorLine<'_>> {
        match self.outcome {
            Some(Err(errno)) => Some(ErrorLine(self, errno)),
            _ => None,
        }
    }

    /// The raw `ptrace()` return value, once the call has returned.
    pub fn result(&self) -> Option<libc::c_long> {
        self.outcome.map(|outcome| outcome.unwrap_or(-1))
    }
}

// Lines are only formatted when written, so records of unlogged calls never allocate.

/// See [`CallRecord::call_line()`].
pub struct CallLine<'a>(&'a CallRecord);

impl fmt::Display for CallLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rec = self.0;
        let mut buf = [0u8; UNKNOWN_NAME_CAPACITY];
        let name = request_name(rec.request, &mut buf);

        write!(f, "{} ptrace({}, {}, {:p}, {:p})", rec.origin, name, rec.pid, rec.addr, rec.data)
    }
}

/// See [`CallRecord::trace_line()`].
pub struct TraceLine<'a>(&'a CallRecord);

impl fmt::Display for TraceLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rec = self.0;
        write!(f, "{}", rec.call_line())?;

        match rec.result() {
            Some(result) if rec.request.is_read() => write!(f, " = {:#x}", result),
            _ => Ok(()),
        }
    }
}

/// See [`CallRecord::error_line()`].
pub struct ErrorLine<'a>(&'a CallRecord, Errno);

impl fmt::Display for ErrorLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} caused an error [{}]", self.0.call_line(), self.1.desc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(request: Request) -> CallRecord {
        let origin = Origin::new("src/inspect.rs", 27);
        CallRecord::new(origin, request, Pid::from_raw(1234), 0x7000 as AddressType, std::ptr::null_mut())
    }

    #[test]
    fn test_peek_trace_line_has_result() {
        let mut rec = record(Request::PEEKDATA);
        rec.outcome = Some(Ok(0x1000));

        assert_eq!(
            rec.trace_line().to_string(),
            "src/inspect.rs:27 ptrace(PTRACE_PEEKDATA, 1234, 0x7000, 0x0) = 0x1000",
        );
        assert!(rec.error_line().is_none());
    }

    #[test]
    fn test_poke_trace_line_has_no_result() {
        let mut rec = record(Request::POKEDATA);
        rec.outcome = Some(Ok(0));

        assert_eq!(rec.trace_line().to_string(), "src/inspect.rs:27 ptrace(PTRACE_POKEDATA, 1234, 0x7000, 0x0)");
    }

    #[test]
    fn test_failed_peek_shows_raw_result() {
        let mut rec = record(Request::PEEKTEXT);
        rec.outcome = Some(Err(Errno::EIO));

        assert_eq!(rec.result(), Some(-1));
        assert_eq!(
            rec.trace_line().to_string(),
            "src/inspect.rs:27 ptrace(PTRACE_PEEKTEXT, 1234, 0x7000, 0x0) = 0xffffffffffffffff",
        );
    }

    #[test]
    fn test_error_line() {
        let mut rec = record(Request::ATTACH);
        rec.outcome = Some(Err(Errno::ESRCH));

        assert_eq!(
            rec.error_line().map(|line| line.to_string()).as_deref(),
            Some("src/inspect.rs:27 ptrace(PTRACE_ATTACH, 1234, 0x7000, 0x0) caused an error [No such process]"),
        );
    }

    #[test]
    fn test_error_line_writes_into_fixed_buffer() {
        use std::io::{Cursor, Write};

        let mut rec = record(Request::PEEKDATA);
        rec.outcome = Some(Err(Errno::EIO));

        // Written straight through, with no intermediate `String`.
        let mut buf = [0u8; 128];
        let mut cursor = Cursor::new(&mut buf[..]);
        write!(cursor, "{}", rec.error_line().unwrap()).unwrap();
        let len = cursor.position() as usize;

        assert_eq!(
            std::str::from_utf8(&buf[..len]).unwrap(),
            "src/inspect.rs:27 ptrace(PTRACE_PEEKDATA, 1234, 0x7000, 0x0) caused an error [I/O error]",
        );
    }

    #[test]
    fn test_unknown_request_line() {
        let rec = record(Request::from_raw(77));
        assert_eq!(rec.call_line().to_string(), "src/inspect.rs:27 ptrace(<unknown:77>, 1234, 0x7000, 0x0)");
    }
}
