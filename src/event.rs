//! Ptrace-event codes, as reported in the high bits of a `waitpid()` stop status.

/// A ptrace-event-stop kind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(i32)]
pub enum Event {
    None = 0,
    Fork = libc::PTRACE_EVENT_FORK,
    Vfork = libc::PTRACE_EVENT_VFORK,
    Clone = libc::PTRACE_EVENT_CLONE,
    Exec = libc::PTRACE_EVENT_EXEC,
    VforkDone = libc::PTRACE_EVENT_VFORK_DONE,
    Exit = libc::PTRACE_EVENT_EXIT,
}

impl Event {
    pub fn from_raw(code: i32) -> Option<Self> {
        let event = match code {
            0 => Self::None,
            libc::PTRACE_EVENT_FORK => Self::Fork,
            libc::PTRACE_EVENT_VFORK => Self::Vfork,
            libc::PTRACE_EVENT_CLONE => Self::Clone,
            libc::PTRACE_EVENT_EXEC => Self::Exec,
            libc::PTRACE_EVENT_VFORK_DONE => Self::VforkDone,
            libc::PTRACE_EVENT_EXIT => Self::Exit,
            _ => return None,
        };

        Some(event)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Fork => "PTRACE_EVENT_FORK",
            Self::Vfork => "PTRACE_EVENT_VFORK",
            Self::Clone => "PTRACE_EVENT_CLONE",
            Self::Exec => "PTRACE_EVENT_EXEC",
            Self::VforkDone => "PTRACE_EVENT_VFORK_DONE",
            Self::Exit => "PTRACE_EVENT_EXIT",
        }
    }
}

/// Display name of a raw ptrace-event code, or `<unknown>`.
pub fn event_name(code: i32) -> &'static str {
    Event::from_raw(code).map(Event::name).unwrap_or("<unknown>")
}
