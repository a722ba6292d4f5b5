//! The `ptrace(2)` request vocabulary, and resolution of raw request codes to names.

use std::fmt;
use std::io::{Cursor, Write};

/// Raw request argument type of the C `ptrace()` entry point.
#[cfg(any(target_env = "musl", target_os = "android"))]
pub type RequestType = libc::c_int;

/// Raw request argument type of the C `ptrace()` entry point.
#[cfg(not(any(target_env = "musl", target_os = "android")))]
pub type RequestType = libc::c_uint;

/// A `ptrace(2)` request code.
///
/// Any raw value may be wrapped. Only the values exposed as associated constants are
/// recognized by [`Request::name()`]; the kernel decides whether the rest mean anything.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Request(RequestType);

// Values from `include/uapi/linux/ptrace.h` and the x86 `asm/ptrace-abi.h`.
impl Request {
    pub const TRACEME: Request = Request(0);
    pub const PEEKTEXT: Request = Request(1);
    pub const PEEKDATA: Request = Request(2);
    pub const PEEKUSER: Request = Request(3);
    pub const POKETEXT: Request = Request(4);
    pub const POKEDATA: Request = Request(5);
    pub const POKEUSER: Request = Request(6);
    pub const CONT: Request = Request(7);
    pub const KILL: Request = Request(8);
    pub const SINGLESTEP: Request = Request(9);
    pub const GETREGS: Request = Request(12);
    pub const SETREGS: Request = Request(13);
    pub const GETFPREGS: Request = Request(14);
    pub const SETFPREGS: Request = Request(15);
    pub const ATTACH: Request = Request(16);
    pub const DETACH: Request = Request(17);
    pub const SYSCALL: Request = Request(24);
    pub const SETOPTIONS: Request = Request(0x4200);
    pub const GETEVENTMSG: Request = Request(0x4201);
    pub const GETSIGINFO: Request = Request(0x4202);
    pub const SETSIGINFO: Request = Request(0x4203);

    pub const fn from_raw(raw: RequestType) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> RequestType {
        self.0
    }

    /// Canonical name of a recognized request.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::TRACEME => "PTRACE_TRACEME",
            Self::PEEKTEXT => "PTRACE_PEEKTEXT",
            Self::PEEKDATA => "PTRACE_PEEKDATA",
            Self::PEEKUSER => "PTRACE_PEEKUSER",
            Self::POKETEXT => "PTRACE_POKETEXT",
            Self::POKEDATA => "PTRACE_POKEDATA",
            Self::POKEUSER => "PTRACE_POKEUSER",
            Self::CONT => "PTRACE_CONT",
            Self::KILL => "PTRACE_KILL",
            Self::SINGLESTEP => "PTRACE_SINGLESTEP",
            Self::GETREGS => "PTRACE_GETREGS",
            Self::SETREGS => "PTRACE_SETREGS",
            Self::GETFPREGS => "PTRACE_GETFPREGS",
            Self::SETFPREGS => "PTRACE_SETFPREGS",
            Self::ATTACH => "PTRACE_ATTACH",
            Self::DETACH => "PTRACE_DETACH",
            Self::SYSCALL => "PTRACE_SYSCALL",
            Self::SETOPTIONS => "PTRACE_SETOPTIONS",
            Self::GETEVENTMSG => "PTRACE_GETEVENTMSG",
            Self::GETSIGINFO => "PTRACE_GETSIGINFO",
            Self::SETSIGINFO => "PTRACE_SETSIGINFO",
            _ => return None,
        };

        Some(name)
    }

    /// Is this one of the peek requests, whose result is the word read from the tracee?
    pub fn is_read(self) -> bool {
        matches!(self, Self::PEEKTEXT | Self::PEEKDATA | Self::PEEKUSER)
    }

    /// Is this the self-attach request, issued by a tracee-to-be on itself?
    pub fn is_traceme(self) -> bool {
        self == Self::TRACEME
    }
}

impl From<RequestType> for Request {
    fn from(raw: RequestType) -> Self {
        Self(raw)
    }
}

impl From<Request> for RequestType {
    fn from(request: Request) -> Self {
        request.0
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "<unknown:{}>", self.0),
        }
    }
}

/// Resolve `request` to a display name.
///
/// Recognized requests get their static name. Anything else is formatted as `<unknown:N>`
/// into `buf`, truncated to `buf.len()` bytes, and the written prefix is returned.
pub fn request_name(request: impl Into<Request>, buf: &mut [u8]) -> &str {
    let request = request.into();

    if let Some(name) = request.name() {
        return name;
    }

    let mut cursor = Cursor::new(&mut *buf);

    // A full buffer makes `write!` fail after writing what fits, which is the truncation we want.
    let _ = write!(cursor, "<unknown:{}>", request.as_raw());
    let len = cursor.position() as usize;

    // Only ASCII is ever written, so any prefix is valid UTF-8.
    std::str::from_utf8(&buf[..len]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognized_names() {
        let mut buf = [0u8; 32];

        assert_eq!(request_name(Request::TRACEME, &mut buf), "PTRACE_TRACEME");
        assert_eq!(request_name(Request::PEEKDATA, &mut buf), "PTRACE_PEEKDATA");
        assert_eq!(request_name(Request::POKEUSER, &mut buf), "PTRACE_POKEUSER");
        assert_eq!(request_name(Request::GETEVENTMSG, &mut buf), "PTRACE_GETEVENTMSG");
        assert_eq!(request_name(Request::SETSIGINFO, &mut buf), "PTRACE_SETSIGINFO");

        // Recognized names never touch the scratch buffer.
        assert_eq!(buf, [0u8; 32]);
    }

    #[test]
    fn test_unknown_name() {
        let mut buf = [0u8; 100];
        assert_eq!(request_name(Request::from_raw(0x4299), &mut buf), "<unknown:17049>");
    }

    #[test]
    fn test_unknown_name_truncated() {
        let mut buf = [0u8; 8];
        assert_eq!(request_name(Request::from_raw(123456), &mut buf), "<unknown");

        let mut empty: [u8; 0] = [];
        assert_eq!(request_name(Request::from_raw(123456), &mut empty), "");
    }

    #[test]
    fn test_read_requests() {
        assert!(Request::PEEKTEXT.is_read());
        assert!(Request::PEEKDATA.is_read());
        assert!(Request::PEEKUSER.is_read());
        assert!(!Request::POKEDATA.is_read());
        assert!(!Request::GETREGS.is_read());
    }

    #[test]
    fn test_display() {
        assert_eq!(Request::ATTACH.to_string(), "PTRACE_ATTACH");
        assert_eq!(Request::from_raw(99).to_string(), "<unknown:99>");
    }
}
