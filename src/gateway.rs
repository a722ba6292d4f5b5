//! The single path through which ptrace requests are issued.
//!
//! A tracee may only be driven by one tracer thread. The kernel does not report a request
//! from any other thread as an error: it just acts on state that thread does not own.
//! [`Gateway`] binds itself to the first thread that uses it, and refuses to continue if
//! any other thread makes a request through it.

use std::fmt;

use nix::errno::Errno;
use nix::sys::ptrace::AddressType;
use tracing::{debug, error, trace, warn};

use crate::backend::{set_errno, Kernel, Ptrace, Retrying};
use crate::config::Config;
use crate::error::{Result, ResultExt};
use crate::record::{CallRecord, Origin};
use crate::request::Request;
use crate::tracee::Tracee;
use crate::Pid;

/// Exit status of a process terminated for issuing requests from a second thread.
pub const CONTROLLER_VIOLATION_STATUS: i32 = 11;

/// A request was made from a thread other than the one bound as controller.
///
/// This is not an [`Error`](crate::Error): there is no way to recover from it, because
/// the two threads have already raced on the tracee. See [`ControllerViolation::terminate()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ControllerViolation {
    pub origin: Origin,
    pub pid: Pid,
    pub controller: Pid,
    pub task: Pid,
}

impl ControllerViolation {
    /// Log the violation and exit with [`CONTROLLER_VIOLATION_STATUS`].
    pub fn terminate(self) -> ! {
        error!(
            pid = self.pid.as_raw(),
            controller = self.controller.as_raw(),
            task = self.task.as_raw(),
            "{}",
            self,
        );

        std::process::exit(CONTROLLER_VIOLATION_STATUS)
    }
}

impl fmt::Display for ControllerViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: Can only trace {} from task {}, not task {}",
            self.origin, self.pid, self.controller, self.task,
        )
    }
}

/// A tracing session, owning the controller binding and the request history.
///
/// Every request of the session is made through [`Gateway::call()`], directly or via the
/// typed requests of [`Tracee`].
#[derive(Debug)]
pub struct Gateway<P = Kernel> {
    backend: P,

    /// Log every call, not just failed ones.
    verbose: bool,

    /// Thread bound by the first request, other than `PTRACE_TRACEME`.
    controller: Option<Pid>,

    last_request: Option<Request>,
}

impl Gateway<Kernel> {
    pub fn new() -> Self {
        Self::with_backend(Kernel)
    }
}

impl Default for Gateway<Kernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway<Retrying<Kernel>> {
    pub fn from_config(config: Config) -> Self {
        Self::with_config(Kernel, config)
    }

    /// Configure a gateway from `TRACEGATE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_config(Config::from_env())
    }
}

impl<P: Ptrace> Gateway<Retrying<P>> {
    /// Gateway over `backend`, with the retry policy and verbosity of `config`.
    pub fn with_config(backend: P, config: Config) -> Self {
        let mut gateway = Self::with_backend(Retrying::new(backend, config.retry));
        gateway.set_verbose(config.verbose);
        gateway
    }
}

impl<P: Ptrace> Gateway<P> {
    pub fn with_backend(backend: P) -> Self {
        let verbose = false;
        let controller = None;
        let last_request = None;

        Self { backend, verbose, controller, last_request }
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// The bound controller thread, if any request has bound one yet.
    pub fn controller(&self) -> Option<Pid> {
        self.controller
    }

    pub fn last_request(&self) -> Option<Request> {
        self.last_request
    }

    /// Bind the calling thread as controller, or check that it already is.
    pub fn check_controller(&mut self, origin: Origin, pid: Pid) -> std::result::Result<(), ControllerViolation> {
        let task = self.backend.current_task();

        match self.controller {
            None => {
                debug!(task = task.as_raw(), pid = pid.as_raw(), "binding ptrace controller");
                self.controller = Some(task);
                Ok(())
            },
            Some(controller) if controller == task => Ok(()),
            Some(controller) => Err(ControllerViolation { origin, pid, controller, task }),
        }
    }

    /// Would a call of `request`, made now, be logged?
    ///
    /// Back-to-back `PTRACE_PEEKDATA` requests are only logged for the first of the run.
    pub fn will_trace(&self, request: Request) -> bool {
        let repeated_peek = request == Request::PEEKDATA && self.last_request == Some(Request::PEEKDATA);

        self.verbose && !repeated_peek
    }

    /// Make a raw ptrace request.
    ///
    /// If the calling thread is not the bound controller, the process is terminated; see
    /// [`ControllerViolation`]. `PTRACE_TRACEME` is exempt, and never binds a controller.
    ///
    /// The result is returned as-is. On return, `errno` is also set to exactly what the
    /// request left it as, whatever logging happened in between.
    ///
    /// # Safety
    ///
    /// As for [`Ptrace::ptrace()`]: `data` must be valid for whatever access `request`
    /// makes of it.
    pub unsafe fn call(
        &mut self,
        origin: Origin,
        request: Request,
        pid: Pid,
        addr: AddressType,
        data: AddressType,
    ) -> std::result::Result<libc::c_long, Errno> {
        if !request.is_traceme() {
            if let Err(violation) = self.check_controller(origin, pid) {
                violation.terminate();
            }
        }

        // Depends on the previous request, so decide before recording this one.
        let trace = self.will_trace(request);

        let mut record = CallRecord::new(origin, request, pid, addr, data);

        if trace {
            trace!(%origin, %request, pid = pid.as_raw(), "issuing request");
        }

        let outcome = self.backend.ptrace(request, pid, addr, data);
        record.outcome = Some(outcome);

        // Formatted only if a subscriber takes the event.
        if trace {
            debug!("{}", record.trace_line());
        }

        if let Some(line) = record.error_line() {
            warn!("{}", line);
        }

        self.last_request = Some(request);

        set_errno(match outcome {
            Ok(_) => 0,
            Err(errno) => errno as i32,
        });

        outcome
    }

    /// Request `PTRACE_TRACEME`, making this process a tracee of its parent.
    ///
    /// Meant to be called in a forked child, before `exec()`.
    #[track_caller]
    pub fn traceme(&mut self) -> Result<()> {
        let origin = Origin::caller();
        let pid = Pid::from_raw(0);
        let null = std::ptr::null_mut();

        // SAFETY: `PTRACE_TRACEME` ignores `addr` and `data`.
        let res = unsafe { self.call(origin, Request::TRACEME, pid, null, null) };
        res.for_request(Request::TRACEME, pid)?;

        Ok(())
    }

    /// Make typed requests of the tracee `pid`.
    pub fn tracee(&mut self, pid: Pid) -> Tracee<'_, P> {
        Tracee::new(self, pid)
    }
}

/// Make a raw request through a [`Gateway`], recording the invocation site as its origin.
///
/// Expands to an unsafe call, and must be used within an `unsafe` block.
#[macro_export]
macro_rules! ptrace {
    ($gateway: expr, $request: expr, $pid: expr, $addr: expr, $data: expr) => {
        $gateway.call($crate::origin!(), $request, $pid, $addr, $data)
    };
}
