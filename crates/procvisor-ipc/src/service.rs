//! Namespace-entering service.
//!
//! The supervisor never joins a namespace itself. Each request forks a
//! fresh helper (a re-executed copy of the binary), hands it the encoded
//! request over a private pipe, and collects exactly one response. Every
//! failure of that channel is reported as a synthesized transport error,
//! and the helper is always reaped.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use procvisor_common::constants::NSENTER_SUBCOMMAND;
use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::NamespaceSet;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::runtime::Runtime;

use crate::event::NsenterEvent;
use crate::protocol::{Decoder, Message};

const READ_CHUNK: usize = 4096;

/// Executes requests inside the namespaces of a target process.
pub trait NsenterService: Send + Sync {
    /// Prepares a transaction; no helper is started yet.
    fn new_event(&self, pid: u32, namespaces: NamespaceSet, request: Message) -> NsenterEvent {
        NsenterEvent::new(pid, namespaces, request)
    }

    /// Starts the helper and hands it the request.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::Transport`] if the helper cannot be
    /// started or fed; the helper is reaped before returning.
    fn send_request_event(&self, event: &mut NsenterEvent) -> Result<()>;

    /// Waits for the helper's response and reaps it.
    ///
    /// Channel failures come back as a transport `errorResponse`.
    fn receive_response_event(&self, event: &mut NsenterEvent) -> Message;

    /// Runs one full transaction.
    fn execute(&self, pid: u32, namespaces: NamespaceSet, request: Message) -> Message {
        let mut event = self.new_event(pid, namespaces, request);
        if let Err(e) = self.send_request_event(&mut event) {
            return Message::transport_error(e.to_string());
        }
        self.receive_response_event(&mut event)
    }
}

/// Program and leading arguments used to start a helper.
///
/// The target context is appended as `--pid <pid> --namespaces <set>`.
#[derive(Debug, Clone)]
pub struct HelperCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl HelperCommand {
    /// Helper started as `program` with no leading arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds leading arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The running binary re-executed in helper mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the path of the running executable is unknown.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| ProcvisorError::io("/proc/self/exe", e))?;
        Ok(Self::new(exe).args([NSENTER_SUBCOMMAND]))
    }

    fn command_for(&self, pid: u32, namespaces: &NamespaceSet) -> Command {
        let mut command = Command::new(&self.program);
        let _ = command
            .args(&self.args)
            .arg("--pid")
            .arg(pid.to_string())
            .arg("--namespaces")
            .arg(namespaces.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

/// [`NsenterService`] forking one helper process per request.
#[derive(Debug)]
pub struct HelperNsenterService {
    runtime: Runtime,
    command: HelperCommand,
    timeout: Duration,
}

impl HelperNsenterService {
    /// Creates a service starting helpers with `command`; each transaction
    /// step is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the I/O runtime cannot be created.
    pub fn new(command: HelperCommand, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("procvisor-nsenter")
            .enable_all()
            .build()
            .map_err(|e| ProcvisorError::transport(format!("failed to start I/O runtime: {e}")))?;
        Ok(Self {
            runtime,
            command,
            timeout,
        })
    }

    /// Upper bound for each transaction step.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn reap(&self, child: &mut Child, event: &NsenterEvent) {
        self.runtime.block_on(async {
            let _ = child.start_kill();
            match child.wait().await {
                Ok(status) => {
                    tracing::debug!(id = %event.id(), ?status, "helper killed and reaped");
                }
                Err(e) => {
                    tracing::warn!(id = %event.id(), error = %e, "failed to reap helper");
                }
            }
        });
    }

    fn fail(&self, event: &mut NsenterEvent, mut child: Child, message: String) -> Message {
        tracing::warn!(
            id = %event.id(),
            pid = event.pid(),
            request = event.request().name(),
            %message,
            "namespace-entering transaction failed"
        );
        self.reap(&mut child, event);
        let response = Message::transport_error(message);
        event.set_response(response.clone());
        response
    }
}

async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut decoder = Decoder::new();
    let mut chunk = [0_u8; READ_CHUNK];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| ProcvisorError::transport(format!("helper output unreadable: {e}")))?;
        if n == 0 {
            let detail = if decoder.is_idle() {
                "helper exited without replying"
            } else {
                "helper reply truncated"
            };
            return Err(ProcvisorError::transport(detail));
        }
        decoder.feed(&chunk[..n]);
        if let Some(message) = decoder
            .next_message()
            .map_err(|e| ProcvisorError::transport(format!("undecodable helper reply: {e}")))?
        {
            return Ok(message);
        }
    }
}

impl NsenterService for HelperNsenterService {
    fn send_request_event(&self, event: &mut NsenterEvent) -> Result<()> {
        let encoded = event.request().encode()?;

        let mut child = {
            let _guard = self.runtime.enter();
            self.command
                .command_for(event.pid(), event.namespaces())
                .spawn()
                .map_err(|e| ProcvisorError::transport(format!("failed to spawn helper: {e}")))?
        };
        tracing::debug!(
            id = %event.id(),
            pid = event.pid(),
            helper = ?child.id(),
            namespaces = %event.namespaces(),
            request = event.request().name(),
            "spawned helper"
        );

        let Some(mut stdin) = child.stdin.take() else {
            self.reap(&mut child, event);
            return Err(ProcvisorError::transport("helper stdin unavailable"));
        };

        let written = self.runtime.block_on(async {
            tokio::time::timeout(self.timeout, async {
                stdin.write_all(&encoded).await?;
                stdin.shutdown().await
            })
            .await
        });
        // Dropping stdin closes the pipe; the helper sees end of request.
        drop(stdin);

        let failure = match written {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("failed to send request to helper: {e}")),
            Err(_) => Some(format!("sending request timed out after {:?}", self.timeout)),
        };
        if let Some(message) = failure {
            self.reap(&mut child, event);
            return Err(ProcvisorError::transport(message));
        }

        event.attach_helper(child);
        Ok(())
    }

    fn receive_response_event(&self, event: &mut NsenterEvent) -> Message {
        let Some(mut child) = event.helper.take() else {
            return Message::transport_error("no helper running for this event");
        };
        let Some(mut stdout) = child.stdout.take() else {
            return self.fail(event, child, "helper stdout unavailable".into());
        };

        let received = self
            .runtime
            .block_on(async { tokio::time::timeout(self.timeout, read_message(&mut stdout)).await });
        drop(stdout);

        let response = match received {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return self.fail(event, child, e.to_string()),
            Err(_) => {
                let message = format!("helper timed out after {:?}", self.timeout);
                return self.fail(event, child, message);
            }
        };

        if !response.answers(event.request()) {
            let message = format!(
                "helper answered {} with {}",
                event.request().name(),
                response.name()
            );
            return self.fail(event, child, message);
        }

        let exited = self
            .runtime
            .block_on(async { tokio::time::timeout(self.timeout, child.wait()).await });
        match exited {
            Ok(Ok(status)) => {
                tracing::debug!(id = %event.id(), ?status, response = response.name(), "helper reaped");
            }
            Ok(Err(e)) => {
                tracing::warn!(id = %event.id(), error = %e, "failed to wait for helper");
            }
            Err(_) => {
                tracing::warn!(id = %event.id(), "helper lingered after replying");
                self.reap(&mut child, event);
            }
        }

        event.set_response(response.clone());
        response
    }
}
