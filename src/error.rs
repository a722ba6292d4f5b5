use std::io;

use nix::errno::Errno;

use crate::request::Request;
use crate::Pid;


pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("ptrace({request}) on tracee = {pid} failed")]
    Ptrace {
        request: Request,
        pid: Pid,
        source: Errno,
    },

    #[error("Tracee died while making ptrace({request}) request, tracee = {pid}")]
    TraceeDied {
        request: Request,
        pid: Pid,
        source: Errno,
    },

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("OS error")]
    OS(#[from] nix::Error),
}

impl Error {
    /// Construct the error for a failed `request`, classifying `ESRCH` as tracee death.
    pub fn from_request(request: Request, pid: Pid, source: Errno) -> Self {
        if source == Errno::ESRCH {
            Error::TraceeDied { request, pid, source }
        } else {
            Error::Ptrace { request, pid, source }
        }
    }

    pub fn tracee_died(&self) -> bool {
        matches!(self, Error::TraceeDied { .. })
    }

    /// Errno reported by the kernel, if this error came from a ptrace request.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Ptrace { source, .. } | Error::TraceeDied { source, .. } => Some(*source),
            Error::OS(errno) => Some(*errno),
            Error::IO(_) => None,
        }
    }
}

pub(crate) trait ResultExt<T> {
    fn for_request(self, request: Request, pid: Pid) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, Errno> {
    fn for_request(self, request: Request, pid: Pid) -> Result<T> {
        self.map_err(|source| Error::from_request(request, pid, source))
    }
}
