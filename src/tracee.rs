//! Typed requests of a single tracee, made through a [`Gateway`].

use std::mem::MaybeUninit;

use nix::sys::ptrace::AddressType;

use crate::backend::Ptrace;
use crate::error::{Result, ResultExt};
use crate::gateway::Gateway;
use crate::record::Origin;
use crate::request::Request;
use crate::{Options, Pid, Siginfo, Signal};

#[cfg(target_arch = "x86_64")]
use crate::x86::DebugRegister;

/// Register state of a tracee.
#[cfg(target_arch = "x86_64")]
pub type Registers = libc::user_regs_struct;

/// Floating-point register state of a tracee.
#[cfg(target_arch = "x86_64")]
pub type FpRegisters = libc::user_fpregs_struct;

/// A tracee, addressed through the gateway that controls it.
///
/// **Warning:** the tracee is not guaranteed to exist, or to be in a ptrace-stop. Any
/// request may fail with [`Error::TraceeDied`](crate::Error::TraceeDied).
///
/// Every request is logged with the location of the code calling the method as its origin.
#[derive(Debug)]
pub struct Tracee<'g, P: Ptrace> {
    gateway: &'g mut Gateway<P>,
    pid: Pid,
}

impl<'g, P: Ptrace> Tracee<'g, P> {
    pub fn new(gateway: &'g mut Gateway<P>, pid: Pid) -> Self {
        Self { gateway, pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    // SAFETY: callers must ensure `data` is valid for any access made by `request`.
    #[track_caller]
    unsafe fn request(&mut self, request: Request, addr: AddressType, data: AddressType) -> Result<libc::c_long> {
        let origin = Origin::caller();
        let res = self.gateway.call(origin, request, self.pid, addr, data);
        res.for_request(request, self.pid)
    }

    // Requests that take no pointers, and so cannot touch our memory.
    #[track_caller]
    fn request_words(&mut self, request: Request, addr: u64, data: u64) -> Result<libc::c_long> {
        unsafe { self.request(request, addr as AddressType, data as AddressType) }
    }

    /// Attach to the tracee. This will deliver a `SIGSTOP`.
    #[track_caller]
    pub fn attach(&mut self) -> Result<()> {
        self.request_words(Request::ATTACH, 0, 0)?;
        Ok(())
    }

    /// Detach, delivering `signal` if set.
    #[track_caller]
    pub fn detach(&mut self, signal: impl Into<Option<Signal>>) -> Result<()> {
        self.request_words(Request::DETACH, 0, signal_word(signal))?;
        Ok(())
    }

    /// Resume the stopped tracee, delivering `signal` if set.
    #[track_caller]
    pub fn cont(&mut self, signal: impl Into<Option<Signal>>) -> Result<()> {
        self.request_words(Request::CONT, 0, signal_word(signal))?;
        Ok(())
    }

    /// Resume the stopped tracee for a single instruction.
    #[track_caller]
    pub fn step(&mut self, signal: impl Into<Option<Signal>>) -> Result<()> {
        self.request_words(Request::SINGLESTEP, 0, signal_word(signal))?;
        Ok(())
    }

    /// Resume the stopped tracee until the next syscall-enter-stop or syscall-exit-stop.
    #[track_caller]
    pub fn syscall(&mut self, signal: impl Into<Option<Signal>>) -> Result<()> {
        self.request_words(Request::SYSCALL, 0, signal_word(signal))?;
        Ok(())
    }

    #[track_caller]
    pub fn kill(&mut self) -> Result<()> {
        self.request_words(Request::KILL, 0, 0)?;
        Ok(())
    }

    /// Read a word of tracee text at `addr`.
    #[track_caller]
    pub fn peek_text(&mut self, addr: u64) -> Result<u64> {
        let word = self.request_words(Request::PEEKTEXT, addr, 0)?;
        Ok(word as u64)
    }

    /// Read a word of tracee data at `addr`.
    #[track_caller]
    pub fn peek_data(&mut self, addr: u64) -> Result<u64> {
        let word = self.request_words(Request::PEEKDATA, addr, 0)?;
        Ok(word as u64)
    }

    /// Read a word at offset `off` of the tracee's `user` area.
    #[track_caller]
    pub fn peek_user(&mut self, off: u64) -> Result<u64> {
        let word = self.request_words(Request::PEEKUSER, off, 0)?;
        Ok(word as u64)
    }

    #[track_caller]
    pub fn poke_text(&mut self, addr: u64, word: u64) -> Result<()> {
        self.request_words(Request::POKETEXT, addr, word)?;
        Ok(())
    }

    #[track_caller]
    pub fn poke_data(&mut self, addr: u64, word: u64) -> Result<()> {
        self.request_words(Request::POKEDATA, addr, word)?;
        Ok(())
    }

    #[track_caller]
    pub fn poke_user(&mut self, off: u64, word: u64) -> Result<()> {
        self.request_words(Request::POKEUSER, off, word)?;
        Ok(())
    }

    #[track_caller]
    pub fn set_options(&mut self, options: Options) -> Result<()> {
        self.request_words(Request::SETOPTIONS, 0, options.bits() as u64)?;
        Ok(())
    }

    /// Message for the last ptrace-event-stop, such as the PID of a new child.
    #[track_caller]
    pub fn event_msg(&mut self) -> Result<u64> {
        let mut msg: libc::c_ulong = 0;

        // SAFETY: the kernel writes a single `unsigned long` to `data`.
        unsafe {
            self.request(Request::GETEVENTMSG, std::ptr::null_mut(), out_ptr(&mut msg))?;
        }

        Ok(msg as u64)
    }

    #[track_caller]
    pub fn siginfo(&mut self) -> Result<Siginfo> {
        let mut info = MaybeUninit::<Siginfo>::uninit();

        // SAFETY: the kernel writes a whole `siginfo_t` to `data` on success.
        unsafe {
            self.request(Request::GETSIGINFO, std::ptr::null_mut(), info.as_mut_ptr() as AddressType)?;
            Ok(info.assume_init())
        }
    }

    #[track_caller]
    pub fn set_siginfo(&mut self, info: &Siginfo) -> Result<()> {
        // SAFETY: the kernel only reads a `siginfo_t` from `data`.
        unsafe {
            self.request(Request::SETSIGINFO, std::ptr::null_mut(), info as *const Siginfo as AddressType)?;
        }

        Ok(())
    }

    #[cfg(target_arch = "x86_64")]
    #[track_caller]
    pub fn registers(&mut self) -> Result<Registers> {
        let mut regs = MaybeUninit::<Registers>::uninit();

        // SAFETY: the kernel writes a whole `user_regs_struct` to `data` on success.
        unsafe {
            self.request(Request::GETREGS, std::ptr::null_mut(), regs.as_mut_ptr() as AddressType)?;
            Ok(regs.assume_init())
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[track_caller]
    pub fn set_registers(&mut self, regs: &Registers) -> Result<()> {
        // SAFETY: the kernel only reads a `user_regs_struct` from `data`.
        unsafe {
            self.request(Request::SETREGS, std::ptr::null_mut(), regs as *const Registers as AddressType)?;
        }

        Ok(())
    }

    #[cfg(target_arch = "x86_64")]
    #[track_caller]
    pub fn fp_registers(&mut self) -> Result<FpRegisters> {
        let mut regs = MaybeUninit::<FpRegisters>::uninit();

        // SAFETY: the kernel writes a whole `user_fpregs_struct` to `data` on success.
        unsafe {
            self.request(Request::GETFPREGS, std::ptr::null_mut(), regs.as_mut_ptr() as AddressType)?;
            Ok(regs.assume_init())
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[track_caller]
    pub fn set_fp_registers(&mut self, regs: &FpRegisters) -> Result<()> {
        // SAFETY: the kernel only reads a `user_fpregs_struct` from `data`.
        unsafe {
            self.request(Request::SETFPREGS, std::ptr::null_mut(), regs as *const FpRegisters as AddressType)?;
        }

        Ok(())
    }

    #[cfg(target_arch = "x86_64")]
    #[track_caller]
    pub fn debug_register(&mut self, dr: DebugRegister) -> Result<u64> {
        self.peek_user(dr.user_offset())
    }

    #[cfg(target_arch = "x86_64")]
    #[track_caller]
    pub fn set_debug_register(&mut self, dr: DebugRegister, data: u64) -> Result<()> {
        self.poke_user(dr.user_offset(), data)
    }
}

fn signal_word(signal: impl Into<Option<Signal>>) -> u64 {
    signal.into().map(|s| s as i32 as u64).unwrap_or(0)
}

fn out_ptr<T>(out: &mut T) -> AddressType {
    out as *mut T as AddressType
}
