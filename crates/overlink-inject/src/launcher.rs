//! Launching processes into a session.
//!
//! ```text
//! request ─▶ blacklist? ─▶ resolve ─▶ inspect ─▶ plan
//!                                              │
//!               same word size ◀───────────────┴──────▶ other word size
//!               spawn + inject                          proxy launch
//!                     └──────────────▶ register pid ◀────────┘
//! ```
//!
//! A process whose registration fails is killed, directly or through the
//! proxy that started it. A proxy that times out is closed; it kills any
//! launch it finishes afterwards, since that launch is never confirmed.

use std::collections::HashMap;
use std::path::Path;
use std::process::Child;
use std::sync::Arc;

use overlink_config::InjectionSection;
use overlink_core::ExecutionPolicy;
use overlink_session::SessionHandle;
use tracing::{debug, info, warn};

use crate::cmdline::LaunchRequest;
use crate::error::{InjectError, InjectResult, LaunchStage};
use crate::image::{self, WordSize};
use crate::injector::{Injector, PreloadInjector};
use crate::plan::{InjectionPlan, SessionEnv};
use crate::proxy::ProxyConnection;
use crate::spawn;

/// Starts hooked processes and keeps track of what it started.
pub struct Launcher {
    settings: InjectionSection,
    injector: Arc<dyn Injector>,
    children: Vec<Child>,
    proxies: HashMap<WordSize, ProxyConnection>,
    retired: Vec<Child>,
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("settings", &self.settings)
            .field("children", &self.children.len())
            .field("proxies", &self.proxies.keys().collect::<Vec<_>>())
            .field("retired", &self.retired.len())
            .finish_non_exhaustive()
    }
}

impl Launcher {
    /// Launcher using `injector` for same-word-size targets.
    #[must_use]
    pub fn new(settings: InjectionSection, injector: Arc<dyn Injector>) -> Self {
        Self {
            settings,
            injector,
            children: Vec::new(),
            proxies: HashMap::new(),
            retired: Vec::new(),
        }
    }

    /// Launcher using loader preloading.
    #[must_use]
    pub fn with_preload(settings: InjectionSection) -> Self {
        Self::new(settings, Arc::new(PreloadInjector))
    }

    /// Injection settings.
    #[must_use]
    pub fn settings(&self) -> &InjectionSection {
        &self.settings
    }

    /// Work out how `request` would be launched, without starting anything.
    ///
    /// # Errors
    ///
    /// - [`InjectError::Blacklisted`] if the program is excluded.
    /// - A [`LaunchStage::Resolve`] or [`LaunchStage::Inspect`] error if the
    ///   executable cannot be found or read.
    pub fn plan(
        &self,
        request: &LaunchRequest,
        policy: &ExecutionPolicy,
        session: SessionEnv,
    ) -> InjectResult<InjectionPlan> {
        check_blacklist(policy, Path::new(request.program()))?;

        let cwd = match request.working_dir() {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()
                .map_err(|e| InjectError::launch(LaunchStage::Resolve, e))?,
        };
        let executable = which::which_in(request.program(), std::env::var_os("PATH"), &cwd)
            .map_err(|e| {
                InjectError::launch(LaunchStage::Resolve, format!("{}: {e}", request.program()))
            })?;
        check_blacklist(policy, &executable)?;

        let word_size = image::inspect(&executable)?;
        let plan = InjectionPlan {
            module: self.settings.module_path(word_size.bits()),
            forced_loads: policy.forced_loads_for(&executable).to_vec(),
            executable,
            word_size,
            session,
        };
        debug!(
            executable = %plan.executable.display(),
            word_size = %plan.word_size,
            direct = plan.is_direct(),
            forced_loads = plan.forced_loads.len(),
            "Planned launch"
        );
        Ok(plan)
    }

    /// Launch `request` into `session`. Returns the new process ID.
    ///
    /// Returns once the process is running and registered; it does not wait
    /// for the process to exit.
    ///
    /// # Errors
    ///
    /// See [`plan`](Self::plan), plus [`InjectError::ProxyTimeout`] and
    /// [`InjectError::Launch`] for the spawn, inject, proxy and register
    /// stages. No process is left running on error.
    pub fn launch(
        &mut self,
        request: &LaunchRequest,
        policy: &ExecutionPolicy,
        session: &SessionHandle,
    ) -> InjectResult<u32> {
        let plan = self.plan(request, policy, SessionEnv::for_handle(session))?;
        self.reap();

        let pid = if plan.is_direct() {
            self.launch_direct(request, &plan)?
        } else {
            self.launch_proxied(request, &plan)?
        };

        if let Err(e) = session.register_process(pid) {
            warn!(pid, error = %e, "Registration failed, terminating process");
            self.discard(pid, &plan);
            return Err(InjectError::launch(LaunchStage::Register, e));
        }

        info!(
            pid,
            executable = %plan.executable.display(),
            word_size = %plan.word_size,
            instance = %plan.session.instance,
            "Launched hooked process"
        );
        Ok(pid)
    }

    /// Forget direct children that have exited. Returns how many were reaped.
    ///
    /// Closed proxies that have exited are collected too, but not counted.
    pub fn reap(&mut self) -> usize {
        self.retired.retain_mut(|proxy| match proxy.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = proxy.id(), %status, "Reaped closed proxy");
                false
            },
            Ok(None) => true,
            Err(e) => {
                warn!(pid = proxy.id(), error = %e, "Failed to poll closed proxy");
                true
            },
        });

        let before = self.children.len();
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = child.id(), %status, "Reaped hooked process");
                false
            },
            Ok(None) => true,
            Err(e) => {
                warn!(pid = child.id(), error = %e, "Failed to poll hooked process");
                true
            },
        });
        before.saturating_sub(self.children.len())
    }

    /// Direct children still being tracked.
    pub fn children(&self) -> impl Iterator<Item = u32> + '_ {
        self.children.iter().map(Child::id)
    }

    /// Closed proxies not reaped yet.
    #[must_use]
    pub fn retired_proxies(&self) -> usize {
        self.retired.len()
    }

    fn launch_direct(&mut self, request: &LaunchRequest, plan: &InjectionPlan) -> InjectResult<u32> {
        let command =
            spawn::build_command(request, plan, self.injector.as_ref(), self.settings.detach)?;
        let child = spawn::start(command, plan, self.injector.as_ref())?;
        let pid = child.id();
        self.children.push(child);
        Ok(pid)
    }

    fn launch_proxied(&mut self, request: &LaunchRequest, plan: &InjectionPlan) -> InjectResult<u32> {
        let size = plan.word_size;
        let proxy = self.proxy(size, &plan.session.log_filter)?;
        match proxy.launch(request, plan) {
            Ok(pid) => Ok(pid),
            Err(e) => {
                if matches!(e, InjectError::ProxyTimeout { .. })
                    || e.stage() == Some(LaunchStage::Proxy)
                {
                    // The connection is in an unknown state; start fresh next
                    // time. Closing it leaves any late launch unconfirmed.
                    self.retire(size);
                }
                Err(e)
            },
        }
    }

    fn proxy(&mut self, size: WordSize, log_filter: &str) -> InjectResult<&mut ProxyConnection> {
        let running = self
            .proxies
            .get_mut(&size)
            .is_some_and(ProxyConnection::is_running);
        if !running {
            let binary = self.settings.proxy_path(size.bits());
            self.retire(size);
            let connection = ProxyConnection::spawn(
                &binary,
                size,
                self.settings.proxy_timeout(),
                self.settings.detach,
                log_filter,
            )?;
            self.proxies.insert(size, connection);
        }
        self.proxies
            .get_mut(&size)
            .ok_or_else(|| InjectError::launch(LaunchStage::Proxy, "proxy unavailable"))
    }

    fn retire(&mut self, size: WordSize) {
        if let Some(connection) = self.proxies.remove(&size) {
            self.retired.push(connection.close());
        }
    }

    fn discard(&mut self, pid: u32, plan: &InjectionPlan) {
        if let Some(idx) = self.children.iter().position(|c| c.id() == pid) {
            let mut child = self.children.swap_remove(idx);
            spawn::terminate(&mut child);
        } else if let Some(proxy) = self.proxies.get_mut(&plan.word_size)
            && let Err(e) = proxy.terminate(pid)
        {
            warn!(pid, error = %e, "Proxy failed to terminate process");
            self.retire(plan.word_size);
        }
    }
}

fn check_blacklist(policy: &ExecutionPolicy, path: &Path) -> InjectResult<()> {
    if policy.is_blacklisted(path) {
        let executable = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        info!(executable = %executable, "Refusing blacklisted executable");
        return Err(InjectError::Blacklisted { executable });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlink_core::SessionParameters;

    fn env() -> SessionEnv {
        SessionEnv::new(
            Path::new("/run/overlink"),
            &SessionParameters::named("plan").unwrap(),
        )
    }

    #[test]
    fn test_blacklist_checked_before_lookup() {
        let launcher = Launcher::with_preload(InjectionSection::default());
        let mut policy = ExecutionPolicy::new();
        policy.blacklist_executable("does-not-exist.exe");

        let request = LaunchRequest::from_argv(vec!["does-not-exist.exe".to_owned()], None).unwrap();
        let err = launcher.plan(&request, &policy, env()).unwrap_err();
        assert!(matches!(err, InjectError::Blacklisted { executable } if executable == "does-not-exist.exe"));
    }

    #[test]
    fn test_unknown_program_fails_at_resolve() {
        let launcher = Launcher::with_preload(InjectionSection::default());
        let request =
            LaunchRequest::from_argv(vec!["overlink-no-such-program".to_owned()], None).unwrap();
        let err = launcher
            .plan(&request, &ExecutionPolicy::new(), env())
            .unwrap_err();
        assert_eq!(err.stage(), Some(LaunchStage::Resolve));
    }

    #[cfg(unix)]
    #[test]
    fn test_plan_collects_forced_loads() {
        let mut settings = InjectionSection::default();
        settings.module_32 = Some("/opt/overlink/hook32.so".into());
        settings.module_64 = Some("/opt/overlink/hook64.so".into());
        let launcher = Launcher::with_preload(settings);

        let mut policy = ExecutionPolicy::new();
        policy
            .force_load_library("true", Path::new("/opt/mods/a.so"))
            .unwrap();
        policy
            .force_load_library("TRUE", Path::new("/opt/mods/b.so"))
            .unwrap();

        let request = LaunchRequest::parse("true", "").unwrap();
        let plan = launcher.plan(&request, &policy, env()).unwrap();
        assert_eq!(plan.word_size, WordSize::host());
        assert_eq!(
            plan.module,
            Path::new(&format!("/opt/overlink/hook{}.so", plan.word_size.bits()))
        );
        assert_eq!(plan.forced_loads.len(), 2);
        assert!(plan.forced_loads[0].ends_with("a.so"));
    }
}
