//! Word-size proxy: wire protocol, controller-side connection, and the
//! server loop run by the `overlink-proxy` binary.
//!
//! The controller talks to a proxy over its stdin/stdout, one JSON object
//! per line:
//!
//! ```text
//! → {"type":"launch","request":{…},"plan":{…}}
//! ← {"type":"launched","pid":4242}
//! → {"type":"confirm","pid":4242}
//! → {"type":"terminate","pid":4242}
//! ← {"type":"terminated","pid":4242}
//! ← {"type":"failed","stage":"spawn","message":"…"}
//! ```
//!
//! A launched process is kept only if the next line the proxy reads is the
//! matching `confirm`. A controller that gave up waiting closes the channel
//! instead, and the proxy kills the process it just started.
//!
//! When the controller closes stdin the proxy stops accepting requests,
//! waits for every confirmed process to exit, then exits itself.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cmdline::LaunchRequest;
use crate::error::{InjectError, InjectResult, LaunchStage};
use crate::image::WordSize;
use crate::injector::Injector;
use crate::plan::InjectionPlan;
use crate::spawn;

/// Controller → proxy message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProxyRequest {
    /// Start a hooked process.
    Launch {
        /// What to run.
        request: LaunchRequest,
        /// How to inject it.
        plan: InjectionPlan,
    },
    /// The controller received `launched` in time and takes the process.
    Confirm {
        /// Process being taken over.
        pid: u32,
    },
    /// Kill a process this proxy launched.
    Terminate {
        /// Process to kill.
        pid: u32,
    },
}

/// Proxy → controller message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProxyResponse {
    /// The process is running with interception attached.
    Launched {
        /// New process.
        pid: u32,
    },
    /// The process was killed and reaped.
    Terminated {
        /// Killed process.
        pid: u32,
    },
    /// The request failed.
    Failed {
        /// Failing step.
        stage: LaunchStage,
        /// What went wrong.
        message: String,
    },
}

impl ProxyResponse {
    fn failure(error: InjectError) -> Self {
        match error {
            InjectError::Launch { stage, message } => Self::Failed { stage, message },
            other => Self::Failed {
                stage: other.stage().unwrap_or(LaunchStage::Proxy),
                message: other.to_string(),
            },
        }
    }
}

type Reply = Result<ProxyResponse, String>;

/// Controller-side connection to one running proxy.
#[derive(Debug)]
pub struct ProxyConnection {
    word_size: WordSize,
    child: Child,
    stdin: ChildStdin,
    replies: mpsc::Receiver<Reply>,
    timeout: Duration,
}

impl ProxyConnection {
    /// Start the proxy binary at `binary` for `word_size` targets.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchStage::Proxy`] error if the proxy cannot be started.
    pub fn spawn(
        binary: &Path,
        word_size: WordSize,
        timeout: Duration,
        detach: bool,
        log_filter: &str,
    ) -> InjectResult<Self> {
        let mut command = Command::new(binary);
        command
            .arg("--log-level")
            .arg(log_filter)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if detach {
            spawn::detach_from_controller(&mut command);
        }

        let mut child = command.spawn().map_err(|e| {
            InjectError::launch(
                LaunchStage::Proxy,
                format!("cannot start {word_size} proxy {}: {e}", binary.display()),
            )
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            spawn::terminate(&mut child);
            return Err(InjectError::launch(LaunchStage::Proxy, "proxy pipes unavailable"));
        };

        let (tx, replies) = mpsc::channel::<Reply>();
        let reader = std::thread::Builder::new()
            .name(format!("overlink-proxy-{}", word_size.bits()))
            .spawn(move || read_replies(BufReader::new(stdout), &tx));
        if let Err(e) = reader {
            spawn::terminate(&mut child);
            return Err(InjectError::launch(LaunchStage::Proxy, e));
        }

        info!(
            pid = child.id(),
            word_size = %word_size,
            binary = %binary.display(),
            "Started proxy"
        );
        Ok(Self {
            word_size,
            child,
            stdin,
            replies,
            timeout,
        })
    }

    /// Proxy process ID.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Word size of the targets this proxy serves.
    #[must_use]
    pub fn word_size(&self) -> WordSize {
        self.word_size
    }

    /// Whether the proxy process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send `request` and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`InjectError::ProxyTimeout`] if no reply arrives within the
    /// configured window, or a [`LaunchStage::Proxy`] error if the proxy is
    /// unreachable or answers with garbage.
    pub fn request(&mut self, request: &ProxyRequest) -> InjectResult<ProxyResponse> {
        self.send(request)?;

        match self.replies.recv_timeout(self.timeout) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(InjectError::launch(
                LaunchStage::Proxy,
                format!("malformed proxy reply: {message}"),
            )),
            Err(RecvTimeoutError::Timeout) => Err(InjectError::ProxyTimeout {
                timeout: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(InjectError::launch(LaunchStage::Proxy, "proxy exited"))
            },
        }
    }

    /// Have the proxy launch `request` per `plan`. Returns the new pid.
    ///
    /// The launch is confirmed as soon as the reply arrives. On timeout
    /// nothing is confirmed; close the connection so the proxy kills a late
    /// launch.
    ///
    /// # Errors
    ///
    /// Returns the proxy's failure with its original stage, or any error
    /// from [`request`](Self::request).
    pub fn launch(&mut self, request: &LaunchRequest, plan: &InjectionPlan) -> InjectResult<u32> {
        let message = ProxyRequest::Launch {
            request: request.clone(),
            plan: plan.clone(),
        };
        match self.request(&message)? {
            ProxyResponse::Launched { pid } => {
                self.send(&ProxyRequest::Confirm { pid })?;
                Ok(pid)
            },
            ProxyResponse::Failed { stage, message } => Err(InjectError::Launch { stage, message }),
            other => Err(unexpected(&other)),
        }
    }

    /// Have the proxy kill `pid`.
    ///
    /// # Errors
    ///
    /// Returns the proxy's failure, or any error from
    /// [`request`](Self::request).
    pub fn terminate(&mut self, pid: u32) -> InjectResult<()> {
        match self.request(&ProxyRequest::Terminate { pid })? {
            ProxyResponse::Terminated { .. } => Ok(()),
            ProxyResponse::Failed { stage, message } => Err(InjectError::Launch { stage, message }),
            other => Err(unexpected(&other)),
        }
    }

    /// Close the request channel and hand back the proxy process.
    ///
    /// The proxy drains and exits on its own; the caller reaps it. It is not
    /// killed because its confirmed targets must keep running.
    #[must_use]
    pub fn close(self) -> Child {
        let Self {
            word_size,
            mut child,
            stdin,
            ..
        } = self;
        drop(stdin);
        debug!(pid = child.id(), word_size = %word_size, "Closed proxy channel");
        if let Ok(Some(status)) = child.try_wait() {
            debug!(pid = child.id(), %status, "Proxy already exited");
        }
        child
    }

    fn send(&mut self, request: &ProxyRequest) -> InjectResult<()> {
        let line = serde_json::to_string(request)
            .map_err(|e| InjectError::launch(LaunchStage::Proxy, e))?;
        writeln!(self.stdin, "{line}")
            .and_then(|()| self.stdin.flush())
            .map_err(|e| InjectError::launch(LaunchStage::Proxy, format!("proxy unreachable: {e}")))
    }
}

fn unexpected(response: &ProxyResponse) -> InjectError {
    InjectError::launch(
        LaunchStage::Proxy,
        format!("unexpected proxy reply: {response:?}"),
    )
}

fn read_replies(reader: impl BufRead, tx: &mpsc::Sender<Reply>) {
    for line in reader.lines() {
        let reply = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => serde_json::from_str(&line).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if tx.send(reply).is_err() {
            return;
        }
    }
}

/// Serve proxy requests from `reader`, answering on `writer`, until
/// `reader` hits EOF. Then wait for every confirmed process to exit.
///
/// # Errors
///
/// Returns an error only if the request stream or the reply stream fails.
pub fn serve(
    reader: impl BufRead,
    mut writer: impl Write,
    injector: &dyn Injector,
    detach: bool,
) -> io::Result<()> {
    let mut children: HashMap<u32, Child> = HashMap::new();
    let mut lines = reader.lines();
    let mut pending: Option<String> = None;

    loop {
        let line = match pending.take() {
            Some(line) => line,
            None => match lines.next() {
                Some(line) => line?,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        reap(&mut children);

        let response = match serde_json::from_str::<ProxyRequest>(&line) {
            Ok(ProxyRequest::Launch { request, plan }) => {
                match launch_child(&request, &plan, injector, detach) {
                    Ok(mut child) => {
                        let pid = child.id();
                        let launched = ProxyResponse::Launched { pid };
                        if let Err(e) = write_response(&mut writer, &launched) {
                            spawn::terminate(&mut child);
                            return Err(e);
                        }
                        match lines.next().transpose() {
                            Ok(Some(next)) if is_confirmation(&next, pid) => {
                                info!(pid, executable = %plan.executable.display(), "Launched for controller");
                                children.insert(pid, child);
                            },
                            Ok(next) => {
                                warn!(pid, "Launch not confirmed by controller, terminating");
                                spawn::terminate(&mut child);
                                pending = next;
                            },
                            Err(e) => {
                                spawn::terminate(&mut child);
                                return Err(e);
                            },
                        }
                        continue;
                    },
                    Err(e) => {
                        warn!(error = %e, "Launch failed");
                        ProxyResponse::failure(e)
                    },
                }
            },
            Ok(ProxyRequest::Confirm { pid }) => {
                // Confirmations only follow a launch; a stray one gets no reply.
                warn!(pid, "Ignoring confirmation without a pending launch");
                continue;
            },
            Ok(ProxyRequest::Terminate { pid }) => match children.remove(&pid) {
                Some(mut child) => {
                    spawn::terminate(&mut child);
                    info!(pid, "Terminated for controller");
                    ProxyResponse::Terminated { pid }
                },
                None => ProxyResponse::Failed {
                    stage: LaunchStage::Proxy,
                    message: format!("process {pid} was not launched by this proxy"),
                },
            },
            Err(e) => ProxyResponse::Failed {
                stage: LaunchStage::Proxy,
                message: format!("malformed request: {e}"),
            },
        };

        write_response(&mut writer, &response)?;
    }

    info!(
        remaining = children.len(),
        "Controller closed the channel, waiting for launched processes"
    );
    for (pid, mut child) in children {
        match child.wait() {
            Ok(status) => debug!(pid, %status, "Launched process exited"),
            Err(e) => warn!(pid, error = %e, "Failed to wait for launched process"),
        }
    }
    Ok(())
}

fn write_response(writer: &mut impl Write, response: &ProxyResponse) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, response)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn is_confirmation(line: &str, pid: u32) -> bool {
    matches!(
        serde_json::from_str::<ProxyRequest>(line),
        Ok(ProxyRequest::Confirm { pid: confirmed }) if confirmed == pid
    )
}

fn launch_child(
    request: &LaunchRequest,
    plan: &InjectionPlan,
    injector: &dyn Injector,
    detach: bool,
) -> InjectResult<Child> {
    let mut command = spawn::build_command(request, plan, injector, detach)?;
    // stdout carries the protocol; keep targets off it.
    command.stdin(Stdio::null()).stdout(Stdio::null());
    spawn::start(command, plan, injector)
}

fn reap(children: &mut HashMap<u32, Child>) {
    children.retain(|pid, child| match child.try_wait() {
        Ok(Some(status)) => {
            debug!(pid, %status, "Launched process exited");
            false
        },
        Ok(None) => true,
        Err(e) => {
            warn!(pid, error = %e, "Failed to poll launched process");
            true
        },
    });
}
