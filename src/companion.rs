// src/companion.rs
use crate::error::{AppError, AppResult};
use log::{debug, info};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const BINARY_NAME: &str = "claude";

/// Locates the companion executable on `PATH`.
pub fn detect() -> Option<PathBuf> {
    match which::which(BINARY_NAME) {
        Ok(path) => {
            debug!("Found {} at {:?}", BINARY_NAME, path);
            Some(path)
        }
        Err(e) => {
            debug!("{} not found on PATH: {}", BINARY_NAME, e);
            None
        }
    }
}

/// Runs the companion in the foreground. With `env` the child sees exactly
/// those variables; otherwise it inherits ours.
pub fn run<S: AsRef<OsStr>>(args: &[S], env: Option<Vec<(OsString, OsString)>>) -> AppResult<()> {
    let program = detect().ok_or_else(|| {
        AppError::Companion(format!(
            "'{}' not found on PATH, install Claude Code first",
            BINARY_NAME
        ))
    })?;
    run_program(&program, args, env)
}

pub(crate) fn run_program<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    env: Option<Vec<(OsString, OsString)>>,
) -> AppResult<()> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(vars) = env {
        cmd.env_clear().envs(vars);
    }

    info!("Running {:?}", program);
    #[cfg(unix)]
    let _guard = interrupt::InterruptGuard::install();
    let status = cmd
        .status()
        .map_err(|e| AppError::Companion(format!("cannot start {:?}: {}", program, e)))?;

    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(AppError::Companion(format!(
            "{:?} exited with status {}",
            program, code
        ))),
        None => Err(AppError::Companion(format!(
            "{:?} was terminated by a signal",
            program
        ))),
    }
}

#[cfg(unix)]
mod interrupt {
    use log::warn;
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::os::raw::c_int;

    extern "C" fn absorb(_: c_int) {}

    /// While alive, SIGINT and SIGTERM reach the child but not us. A caught
    /// signal resets to its default in the child on exec, so the child still
    /// reacts to Ctrl-C normally.
    pub struct InterruptGuard {
        previous: Vec<(Signal, SigAction)>,
    }

    impl InterruptGuard {
        pub fn install() -> Self {
            let action = SigAction::new(
                SigHandler::Handler(absorb),
                SaFlags::SA_RESTART,
                SigSet::empty(),
            );
            let mut previous = Vec::new();
            for signal in [Signal::SIGINT, Signal::SIGTERM] {
                // SAFETY: the handler is empty and async-signal-safe.
                match unsafe { sigaction(signal, &action) } {
                    Ok(old) => previous.push((signal, old)),
                    Err(e) => warn!("Cannot install {} handler: {}", signal, e),
                }
            }
            InterruptGuard { previous }
        }
    }

    impl Drop for InterruptGuard {
        fn drop(&mut self) {
            for (signal, old) in self.previous.drain(..) {
                // SAFETY: restores the disposition that was in place before.
                if let Err(e) = unsafe { sigaction(signal, &old) } {
                    warn!("Cannot restore {} handler: {}", signal, e);
                }
            }
        }
    }
}
