//! Single-controller mediation of `ptrace(2)` requests, with call tracing.
//!
//! All requests of a tracing session are made through a [`Gateway`], which binds the first
//! thread to use it as the only thread allowed to drive its tracees, and logs requests and
//! their failures via `tracing`.

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod record;
pub mod request;
pub mod tracee;

#[cfg(target_arch = "x86_64")]
pub mod x86;

pub use backend::{Kernel, Ptrace, RetryPolicy, Retrying};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{event_name, Event};
pub use gateway::{ControllerViolation, Gateway, CONTROLLER_VIOLATION_STATUS};
pub use record::{CallLine, CallRecord, ErrorLine, Origin, TraceLine};
pub use request::{request_name, Request, RequestType};
pub use tracee::Tracee;

#[cfg(target_arch = "x86_64")]
pub use tracee::{FpRegisters, Registers};

pub use nix::errno::Errno;
pub use nix::sys::ptrace::{AddressType, Options};
pub use nix::unistd::Pid;

/// POSIX signal.
pub use nix::sys::signal::Signal;

/// Extra signal info, such as its cause.
pub type Siginfo = libc::siginfo_t;
