//! The injection seam.
//!
//! An [`Injector`] arranges for the interception module (and any forced
//! loads) to be mapped into a process before its own code runs. The launcher
//! calls [`Injector::prepare`] on the command before spawning and
//! [`Injector::confirm`] once the pid is known.

#[cfg(unix)]
use std::ffi::OsString;
use std::process::Command;

#[cfg(unix)]
use tracing::debug;

use crate::error::{InjectError, InjectResult, LaunchStage};
use crate::plan::InjectionPlan;

/// Attaches interception logic to a process being launched.
pub trait Injector: Send + Sync {
    /// Configure `command` so the started process loads `plan`'s libraries.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchStage::Inject`] error if the plan cannot be applied.
    fn prepare(&self, command: &mut Command, plan: &InjectionPlan) -> InjectResult<()>;

    /// Check the started process `pid`. A failure kills the process.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchStage::Inject`] error if injection did not take.
    fn confirm(&self, pid: u32, plan: &InjectionPlan) -> InjectResult<()> {
        let _ = (pid, plan);
        Ok(())
    }
}

/// Loader-driven injection: the dynamic loader maps the module into the new
/// process before `main`, which is equivalent to injecting into a suspended
/// process and resuming it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreloadInjector;

#[cfg(target_os = "macos")]
const PRELOAD_VAR: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(all(unix, not(target_os = "macos")))]
const PRELOAD_VAR: &str = "LD_PRELOAD";

impl Injector for PreloadInjector {
    #[cfg(unix)]
    fn prepare(&self, command: &mut Command, plan: &InjectionPlan) -> InjectResult<()> {
        if !plan.module.is_file() {
            return Err(InjectError::launch(
                LaunchStage::Inject,
                format!("interception module not found: {}", plan.module.display()),
            ));
        }

        let inherited = command
            .get_envs()
            .find(|(name, _)| *name == PRELOAD_VAR)
            .and_then(|(_, value)| value.map(ToOwned::to_owned))
            .or_else(|| std::env::var_os(PRELOAD_VAR));

        let mut preload = OsString::new();
        for library in plan.libraries() {
            if !preload.is_empty() {
                preload.push(":");
            }
            preload.push(library);
        }
        if let Some(inherited) = inherited.filter(|v| !v.is_empty()) {
            preload.push(":");
            preload.push(inherited);
        }

        debug!(
            executable = %plan.executable.display(),
            var = PRELOAD_VAR,
            libraries = plan.forced_loads.len().saturating_add(1),
            "Prepared preload injection"
        );
        command.env(PRELOAD_VAR, preload);
        Ok(())
    }

    #[cfg(not(unix))]
    fn prepare(&self, _command: &mut Command, plan: &InjectionPlan) -> InjectResult<()> {
        Err(InjectError::launch(
            LaunchStage::Inject,
            format!(
                "preload injection is not available on this platform ({})",
                plan.executable.display()
            ),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use overlink_core::SessionParameters;

    use super::*;
    use crate::image::WordSize;
    use crate::plan::SessionEnv;

    fn plan(module: &Path) -> InjectionPlan {
        InjectionPlan {
            executable: "/bin/true".into(),
            word_size: WordSize::host(),
            module: module.to_path_buf(),
            forced_loads: vec!["/opt/mods/extra.so".into()],
            session: SessionEnv::new(
                Path::new("/run/overlink"),
                &SessionParameters::named("game").unwrap(),
            ),
        }
    }

    fn preload_of(cmd: &Command) -> Option<String> {
        cmd.get_envs()
            .find(|(k, _)| *k == PRELOAD_VAR)
            .and_then(|(_, v)| v)
            .map(|v| v.to_string_lossy().into_owned())
    }

    #[test]
    fn test_missing_module_fails_at_inject() {
        let mut cmd = Command::new("true");
        let err = PreloadInjector
            .prepare(&mut cmd, &plan(Path::new("/nonexistent/hook.so")))
            .unwrap_err();
        assert_eq!(err.stage(), Some(LaunchStage::Inject));
    }

    #[test]
    fn test_preload_lists_module_then_forced_loads() {
        let tmp = tempfile::TempDir::new().unwrap();
        let module = tmp.path().join("hook.so");
        std::fs::write(&module, b"").unwrap();

        let mut cmd = Command::new("true");
        cmd.env(PRELOAD_VAR, "/usr/lib/existing.so");
        PreloadInjector.prepare(&mut cmd, &plan(&module)).unwrap();

        assert_eq!(
            preload_of(&cmd).unwrap(),
            format!("{}:/opt/mods/extra.so:/usr/lib/existing.so", module.display())
        );
    }
}
