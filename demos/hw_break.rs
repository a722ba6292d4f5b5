use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::Result;
use nix::sys::wait::{waitpid, WaitStatus};
use structopt::StructOpt;
use tracegate::{Gateway, Pid, Signal};

#[derive(StructOpt, Debug)]
struct Opt {
    #[structopt(short, long)]
    quiet: bool,

    #[structopt(min_values = 1)]
    argv: Vec<String>,

    #[structopt(short, long, parse(try_from_str = parse_breakpoint))]
    breakpoint: u64,
}

fn parse_breakpoint(s: &str) -> Result<u64> {
    let s = s.trim_start_matches("0x");
    Ok(u64::from_str_radix(s, 16)?)
}

#[cfg(target_arch = "x86_64")]
fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let opt = Opt::from_args();

    let mut cmd = Command::new(&opt.argv[0]);

    if let Some(args) = opt.argv.get(1..) {
        cmd.args(args);
    }

    unsafe {
        cmd.pre_exec(|| Gateway::new().traceme().map_err(|_| io::Error::last_os_error()));
    }

    let child = cmd.spawn()?;
    let pid = Pid::from_raw(child.id() as i32);

    let mut gateway = Gateway::from_env();

    // Set the breakpoint on exit from `exec(2)`.
    waitpid(pid, None)?;
    set_hw_breakpoint(&mut gateway, pid, opt.breakpoint)?;
    gateway.tracee(pid).cont(None)?;

    let mut hit = false;

    loop {
        match waitpid(pid, None)? {
            WaitStatus::Stopped(pid, signal) => {
                let mut tracee = gateway.tracee(pid);
                let pc = tracee.registers()?.rip;

                if !opt.quiet {
                    println!("pid = {}, pc = {:x}: {}", pid, pc, signal);
                }

                // The trap is ours: suppress it.
                if signal == Signal::SIGTRAP && pc == opt.breakpoint {
                    hit = true;
                    tracee.cont(None)?;
                } else {
                    tracee.cont(signal)?;
                }
            },
            WaitStatus::Exited(..) | WaitStatus::Signaled(..) => break,
            _ => gateway.tracee(pid).cont(None)?,
        }
    }

    if hit {
        println!("hit breakpoint: 0x{:x}", opt.breakpoint);
    }

    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn set_hw_breakpoint(gateway: &mut Gateway<tracegate::Retrying<tracegate::Kernel>>, pid: Pid, va: u64) -> Result<()> {
    use tracegate::x86::DebugRegister;

    let mut tracee = gateway.tracee(pid);

    tracee.set_debug_register(DebugRegister::Dr0, va)?;

    let dr7_reserved = 0x100;
    let dr7_enable_dr0_local = 0x1;
    let dr7: u64 = dr7_reserved | dr7_enable_dr0_local;

    tracee.set_debug_register(DebugRegister::Dr7, dr7)?;

    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
fn main() -> Result<()> {
    let _ = Opt::from_args();
    anyhow::bail!("hardware breakpoints are only supported on x86_64")
}
