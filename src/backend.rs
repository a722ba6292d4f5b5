//! The privileged call underneath the gateway, and policies for issuing it.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::ptrace::AddressType;
use tracing::debug;

use crate::request::Request;
use crate::Pid;

/// Issuer of raw `ptrace(2)` requests.
pub trait Ptrace {
    /// Make `request` of `pid`, returning the raw result or the errno it set.
    ///
    /// Peek requests return the word read as their result, so a successful call may
    /// return `-1`. Failure is reported by errno alone.
    ///
    /// # Safety
    ///
    /// Depending on `request`, the kernel may read from or write to `data` in this process.
    /// It must be valid for that access.
    unsafe fn ptrace(
        &mut self,
        request: Request,
        pid: Pid,
        addr: AddressType,
        data: AddressType,
    ) -> Result<libc::c_long, Errno>;

    /// Thread ID of the calling task.
    fn current_task(&self) -> Pid {
        nix::unistd::gettid()
    }
}

/// Makes requests directly of the running kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct Kernel;

impl Ptrace for Kernel {
    unsafe fn ptrace(
        &mut self,
        request: Request,
        pid: Pid,
        addr: AddressType,
        data: AddressType,
    ) -> Result<libc::c_long, Errno> {
        set_errno(0);
        let res = libc::ptrace(request.as_raw(), pid.as_raw(), addr, data);

        // Nothing may run between the call and reading errno.
        match last_errno() {
            0 => Ok(res),
            errno => Err(Errno::from_i32(errno)),
        }
    }
}

pub(crate) fn last_errno() -> i32 {
    unsafe { *errno_location() }
}

pub(crate) fn set_errno(errno: i32) {
    unsafe { *errno_location() = errno };
}

#[cfg(target_os = "android")]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno()
}

#[cfg(not(target_os = "android"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

const DEFAULT_MAX_RETRIES: u32 = 150;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_REPORT_EVERY: u32 = 10;

/// When to reissue a failed request.
///
/// Some kernels have been seen to fail requests against a stopped tracee with `ESRCH`,
/// then accept them after the tracer is descheduled for a while.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryPolicy {
    /// Issue each request exactly once.
    Never,

    /// Reissue requests failing with `ESRCH`, sleeping `delay` between attempts.
    OnEsrch {
        max_retries: u32,
        delay: Duration,

        /// Log a diagnostic after every `report_every` retries.
        report_every: u32,
    },
}

impl RetryPolicy {
    /// Retry on `ESRCH` with the default bounds.
    pub fn on_esrch() -> Self {
        RetryPolicy::OnEsrch {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
            report_every: DEFAULT_REPORT_EVERY,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Never
    }
}

/// Wraps a [`Ptrace`] implementation, reissuing failed requests per a [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: Ptrace> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: Ptrace> Ptrace for Retrying<P> {
    unsafe fn ptrace(
        &mut self,
        request: Request,
        pid: Pid,
        addr: AddressType,
        data: AddressType,
    ) -> Result<libc::c_long, Errno> {
        let (max_retries, delay, report_every) = match self.policy {
            RetryPolicy::Never => return self.inner.ptrace(request, pid, addr, data),
            RetryPolicy::OnEsrch { max_retries, delay, report_every } => {
                (max_retries, delay, report_every)
            },
        };

        let mut retries = 0;

        loop {
            match self.inner.ptrace(request, pid, addr, data) {
                Err(Errno::ESRCH) if retries < max_retries => {
                    std::thread::sleep(delay);
                    retries += 1;

                    if report_every != 0 && retries % report_every == 0 {
                        debug!(%request, pid = pid.as_raw(), retries, "ptrace retrying");
                    }
                },
                res => return res,
            }
        }
    }

    fn current_task(&self) -> Pid {
        self.inner.current_task()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fails with `ESRCH` a fixed number of times, then succeeds.
    struct Flaky {
        failures: u32,
        calls: u32,
    }

    impl Ptrace for Flaky {
        unsafe fn ptrace(
            &mut self,
            _request: Request,
            _pid: Pid,
            _addr: AddressType,
            _data: AddressType,
        ) -> Result<libc::c_long, Errno> {
            self.calls += 1;

            if self.calls <= self.failures {
                Err(Errno::ESRCH)
            } else {
                Ok(7)
            }
        }
    }

    fn call(p: &mut impl Ptrace) -> Result<libc::c_long, Errno> {
        let null = std::ptr::null_mut();
        unsafe { p.ptrace(Request::CONT, Pid::from_raw(1), null, null) }
    }

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::OnEsrch { max_retries, delay: Duration::from_millis(1), report_every: 2 }
    }

    #[test]
    fn test_default_policy_never_retries() {
        assert_eq!(RetryPolicy::default(), RetryPolicy::Never);

        let mut p = Retrying::new(Flaky { failures: 1, calls: 0 }, RetryPolicy::default());
        assert_eq!(call(&mut p), Err(Errno::ESRCH));
        assert_eq!(p.inner().calls, 1);
    }

    #[test]
    fn test_retries_until_success() {
        let mut p = Retrying::new(Flaky { failures: 3, calls: 0 }, fast(5));
        assert_eq!(call(&mut p), Ok(7));
        assert_eq!(p.inner().calls, 4);
    }

    #[test]
    fn test_retries_are_bounded() {
        let mut p = Retrying::new(Flaky { failures: 100, calls: 0 }, fast(4));
        assert_eq!(call(&mut p), Err(Errno::ESRCH));
        assert_eq!(p.inner().calls, 5);
    }

    #[test]
    fn test_kernel_reports_esrch() {
        // PID 0 is never a tracee.
        assert_eq!(call(&mut Kernel), Err(Errno::ESRCH));
        assert_eq!(last_errno(), libc::ESRCH);
    }
}
