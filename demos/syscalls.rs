use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::Result;
use nix::sys::wait::{waitpid, WaitStatus};
use structopt::StructOpt;
use tracegate::{Config, Gateway, Options, Pid};

#[derive(StructOpt, Debug)]
struct Opt {
    /// Log every ptrace request, not just failures.
    #[structopt(short, long)]
    verbose: bool,

    #[structopt(min_values = 1)]
    argv: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(io::stderr)
        .init();

    let opt = Opt::from_args();

    let mut cmd = Command::new(&opt.argv[0]);

    if let Some(args) = opt.argv.get(1..) {
        cmd.args(args);
    }

    // The gateway leaves `errno` as the failed request set it, so it becomes the spawn error.
    unsafe {
        cmd.pre_exec(|| Gateway::new().traceme().map_err(|_| io::Error::last_os_error()));
    }

    let child = cmd.spawn()?;
    let pid = Pid::from_raw(child.id() as i32);

    let mut config = Config::from_env();
    config.verbose |= opt.verbose;
    let mut gateway = Gateway::from_config(config);

    // Stopped by the `SIGTRAP` of its first `execve()`.
    waitpid(pid, None)?;

    let mut tracee = gateway.tracee(pid);
    tracee.set_options(Options::PTRACE_O_TRACESYSGOOD | Options::PTRACE_O_EXITKILL)?;
    tracee.syscall(None)?;

    let mut entering = true;

    loop {
        match waitpid(pid, None)? {
            WaitStatus::PtraceSyscall(pid) => {
                let dir = if entering { "enter" } else { "exit" };
                entering = !entering;

                print_syscall(&mut gateway, pid, dir)?;
                gateway.tracee(pid).syscall(None)?;
            },
            WaitStatus::Stopped(pid, signal) => {
                println!("pid = {}, signal = {}", pid, signal);
                gateway.tracee(pid).syscall(signal)?;
            },
            WaitStatus::Exited(pid, code) => {
                println!("pid = {}, exited = {}", pid, code);
                break;
            },
            WaitStatus::Signaled(pid, signal, _) => {
                println!("pid = {}, killed by {}", pid, signal);
                break;
            },
            _ => {
                gateway.tracee(pid).syscall(None)?;
            },
        }
    }

    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn print_syscall<P: tracegate::Ptrace>(gateway: &mut Gateway<P>, pid: Pid, dir: &str) -> Result<()> {
    let regs = gateway.tracee(pid).registers()?;
    println!(
        "pid = {}, pc = {:x}: syscall {} {} = {:#x}",
        pid, regs.rip, dir, regs.orig_rax as i64, regs.rax,
    );
    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
fn print_syscall<P: tracegate::Ptrace>(_gateway: &mut Gateway<P>, pid: Pid, dir: &str) -> Result<()> {
    println!("pid = {}: syscall {}", pid, dir);
    Ok(())
}
