//! Building and starting hooked processes.

use std::process::{Child, Command};

use tracing::{debug, warn};

use crate::cmdline::LaunchRequest;
use crate::error::{InjectError, InjectResult, LaunchStage};
use crate::injector::Injector;
use crate::plan::InjectionPlan;

/// Command for `request` with the session environment and injection applied.
///
/// # Errors
///
/// Returns the injector's error if the plan cannot be applied.
pub fn build_command(
    request: &LaunchRequest,
    plan: &InjectionPlan,
    injector: &dyn Injector,
    detach: bool,
) -> InjectResult<Command> {
    let mut command = Command::new(&plan.executable);
    command.args(request.args());
    if let Some(dir) = request.working_dir() {
        command.current_dir(dir);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.arg0(request.program());
    }

    plan.session.apply(&mut command);
    if detach {
        detach_from_controller(&mut command);
    }
    injector.prepare(&mut command, plan)?;
    Ok(command)
}

/// Start `command` and let the injector confirm the new process.
///
/// A process that fails confirmation is killed and reaped before the error
/// is returned.
///
/// # Errors
///
/// Returns a [`LaunchStage::Spawn`] error if the process cannot be created,
/// or the injector's error if confirmation fails.
pub fn start(
    mut command: Command,
    plan: &InjectionPlan,
    injector: &dyn Injector,
) -> InjectResult<Child> {
    let mut child = command.spawn().map_err(|e| {
        InjectError::launch(
            LaunchStage::Spawn,
            format!("{}: {e}", plan.executable.display()),
        )
    })?;

    let pid = child.id();
    if let Err(e) = injector.confirm(pid, plan) {
        warn!(pid, error = %e, "Injection not confirmed, terminating process");
        terminate(&mut child);
        return Err(e);
    }

    debug!(pid, executable = %plan.executable.display(), "Started hooked process");
    Ok(child)
}

/// Kill and reap `child`, logging failures.
pub(crate) fn terminate(child: &mut Child) {
    let pid = child.id();
    if let Err(e) = child.kill() {
        warn!(pid, error = %e, "Failed to kill process");
    }
    if let Err(e) = child.wait() {
        warn!(pid, error = %e, "Failed to reap process");
    }
}

#[cfg(unix)]
pub(crate) fn detach_from_controller(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
pub(crate) fn detach_from_controller(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_BREAKAWAY_FROM_JOB: u32 = 0x0100_0000;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_BREAKAWAY_FROM_JOB);
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn detach_from_controller(_command: &mut Command) {}
