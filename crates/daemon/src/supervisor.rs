// Engine process supervision.
//
// The storage API listener and the engine child process share one
// lifecycle: whichever side stops first (signal, child exit, listener
// close, supervised task failure) drives a single shutdown, and the
// process exits exactly once.
//
//   Starting -> Running -> ShuttingDown -> Terminated

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{error, info, warn};

use crate::api;
use crate::bootstrap::BootstrapReport;
use crate::config::DaemonConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SupervisorState {
    Starting = 0,
    Running = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl SupervisorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }
}

/// Why shutdown began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Termination signal delivered to this process.
    Signal(&'static str),
    /// The engine exited by itself, with its exit code if it had one.
    ChildExited(Option<i32>),
    /// A supervised task failed or panicked.
    Fault(String),
    /// The HTTP listener stopped serving.
    ListenerClosed,
}

impl ShutdownTrigger {
    /// Signals exit cleanly; otherwise the child's code wins, else 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Signal(_) => 0,
            Self::ChildExited(code) => code.unwrap_or(0),
            Self::Fault(_) | Self::ListenerClosed => 0,
        }
    }
}

/// Side effects performed by the shutdown sequence.
pub trait LifecycleHooks: Send + Sync {
    /// Begin graceful close of the HTTP listener.
    fn close_listener(&self);
    /// Ask the child to terminate. Must not wait for it.
    fn terminate_child(&self);
    /// Terminate the process with `code`.
    fn exit(&self, code: i32);
}

/// Idempotent shutdown state machine.
pub struct ShutdownCoordinator<H> {
    state: AtomicU8,
    exit_code: AtomicI32,
    hooks: H,
}

impl<H: LifecycleHooks> ShutdownCoordinator<H> {
    pub fn new(hooks: H) -> Self {
        Self {
            state: AtomicU8::new(SupervisorState::Starting as u8),
            exit_code: AtomicI32::new(0),
            hooks,
        }
    }

    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Listener and child have both been launched.
    pub fn mark_running(&self) -> bool {
        self.transition(SupervisorState::Starting, SupervisorState::Running)
    }

    /// Enter `ShuttingDown`. Returns `false` if shutdown was already under
    /// way, in which case nothing happens.
    pub fn trigger(&self, trigger: ShutdownTrigger) -> bool {
        let entered = self.transition(SupervisorState::Running, SupervisorState::ShuttingDown)
            || self.transition(SupervisorState::Starting, SupervisorState::ShuttingDown);
        if !entered {
            info!(?trigger, "shutdown already in progress, ignoring trigger");
            return false;
        }

        let code = trigger.exit_code();
        self.exit_code.store(code, Ordering::SeqCst);
        info!(?trigger, exit_code = code, "shutting down");

        self.hooks.close_listener();
        if !matches!(trigger, ShutdownTrigger::ChildExited(_)) {
            self.hooks.terminate_child();
        }
        if trigger == ShutdownTrigger::ListenerClosed {
            self.finish();
        }
        true
    }

    /// Listener close callback.
    pub fn listener_closed(&self) {
        match self.state() {
            SupervisorState::Starting | SupervisorState::Running => {
                self.trigger(ShutdownTrigger::ListenerClosed);
            }
            SupervisorState::ShuttingDown => self.finish(),
            SupervisorState::Terminated => {}
        }
    }

    fn finish(&self) {
        if self.transition(SupervisorState::ShuttingDown, SupervisorState::Terminated) {
            self.hooks.exit(self.exit_code());
        }
    }

    fn transition(&self, from: SupervisorState, to: SupervisorState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Hooks wired to the running listener, child and exit channel.
struct ProcessHooks {
    listener_close: Arc<Notify>,
    child_terminate: Arc<Notify>,
    exit_tx: Mutex<Option<oneshot::Sender<i32>>>,
}

impl LifecycleHooks for ProcessHooks {
    fn close_listener(&self) {
        self.listener_close.notify_one();
    }

    fn terminate_child(&self) {
        self.child_terminate.notify_one();
    }

    fn exit(&self, code: i32) {
        let sender = match self.exit_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(code);
        }
    }
}

/// Couples an HTTP listener with an engine child process.
pub struct Supervisor {
    listener: TcpListener,
    app: Router,
    command: Command,
    trigger_tx: mpsc::UnboundedSender<ShutdownTrigger>,
    trigger_rx: mpsc::UnboundedReceiver<ShutdownTrigger>,
}

impl Supervisor {
    pub fn new(listener: TcpListener, app: Router, command: Command) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        Self { listener, app, command, trigger_tx, trigger_rx }
    }

    /// Channel for external shutdown triggers (signals).
    pub fn trigger_sender(&self) -> mpsc::UnboundedSender<ShutdownTrigger> {
        self.trigger_tx.clone()
    }

    /// Launch both sides and wait for the single exit decision.
    pub async fn run(self) -> Result<i32> {
        let Self { listener, app, mut command, trigger_tx, mut trigger_rx } = self;

        let listener_close = Arc::new(Notify::new());
        let child_terminate = Arc::new(Notify::new());
        let (exit_tx, exit_rx) = oneshot::channel();
        let coordinator = Arc::new(ShutdownCoordinator::new(ProcessHooks {
            listener_close: Arc::clone(&listener_close),
            child_terminate: Arc::clone(&child_terminate),
            exit_tx: Mutex::new(Some(exit_tx)),
        }));

        command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());
        let child = command.spawn().context("failed to spawn engine process")?;
        info!(pid = ?child.id(), "engine process started");

        let local_addr = listener.local_addr().context("listener has no local address")?;
        info!(listen_addr = %local_addr, "storage API listening");

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { listener_close.notified().await })
                .await
        });
        let monitor = tokio::spawn(monitor_child(child, child_terminate));

        {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                match server.await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        error!(error = ?error, "storage API server failed");
                        coordinator.trigger(ShutdownTrigger::Fault(error.to_string()));
                    }
                    Err(join_error) => {
                        error!(?join_error, "storage API task panicked");
                        coordinator.trigger(ShutdownTrigger::Fault(join_error.to_string()));
                    }
                }
                coordinator.listener_closed();
            });
        }

        {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                match monitor.await {
                    Ok(Some(trigger)) => {
                        coordinator.trigger(trigger);
                    }
                    Ok(None) => {}
                    Err(join_error) => {
                        coordinator.trigger(ShutdownTrigger::Fault(join_error.to_string()));
                    }
                }
            });
        }

        coordinator.mark_running();
        drop(trigger_tx);

        // Triggers are pumped on this task, never a detached one.
        let mut exit_rx = exit_rx;
        let code = loop {
            tokio::select! {
                code = &mut exit_rx => break code.unwrap_or_else(|_| coordinator.exit_code()),
                Some(trigger) = trigger_rx.recv() => {
                    coordinator.trigger(trigger);
                }
            }
        };
        info!(exit_code = code, "supervisor terminated");
        Ok(code)
    }
}

/// Wait for the child to exit, or signal it once termination is requested.
/// Yields a trigger only when the child stopped on its own.
async fn monitor_child(mut child: Child, terminate: Arc<Notify>) -> Option<ShutdownTrigger> {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = terminate.notified() => None,
    };

    match exited {
        Some(Ok(status)) => {
            info!(%status, "engine process exited");
            Some(ShutdownTrigger::ChildExited(status.code()))
        }
        Some(Err(error)) => {
            error!(error = ?error, "failed to wait for engine process");
            Some(ShutdownTrigger::Fault(error.to_string()))
        }
        None => {
            terminate_process(&mut child).await;
            // Reap in the background; shutdown does not wait on it.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            None
        }
    }
}

#[cfg(unix)]
async fn terminate_process(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let status = Command::new("kill").arg("-TERM").arg(pid.to_string()).status().await;
    match status {
        Ok(status) if status.success() => info!(pid, "sent SIGTERM to engine process"),
        other => {
            warn!(pid, result = ?other, "kill -TERM failed, killing engine process");
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
async fn terminate_process(child: &mut Child) {
    let _ = child.start_kill();
}

/// Engine command line: `start --data <file>... [--watch [--polling <ms>]] <passthrough>`.
pub fn engine_args(config: &DaemonConfig, report: &BootstrapReport) -> Vec<String> {
    let mut args = vec!["start".to_string(), "--data".to_string()];
    args.extend(report.environment_files.iter().map(|path| absolute_path(path)));
    if config.watch {
        args.push("--watch".to_string());
        args.push("--polling".to_string());
        args.push(config.poll_interval.as_millis().to_string());
    }
    args.extend(config.engine_args.iter().cloned());
    args
}

pub fn engine_command(config: &DaemonConfig, report: &BootstrapReport) -> Command {
    let mut command = Command::new(&config.engine_bin);
    command.args(engine_args(config, report));
    command
}

fn absolute_path(path: &Path) -> String {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()).display().to_string()
}

/// Bind the storage API, launch the engine and supervise both until exit.
pub async fn supervise(config: &DaemonConfig, report: &BootstrapReport, app: Router) -> Result<i32> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind storage API listener on {}", config.listen_addr))?;

    let command = engine_command(config, report);
    info!(engine = %config.engine_bin, args = ?engine_args(config, report), "launching engine");

    let supervisor = Supervisor::new(listener, app, command);
    install_panic_trigger(supervisor.trigger_sender());
    forward_signals(supervisor.trigger_sender())?;
    supervisor.run().await
}

/// Turn a panic anywhere in the process into a `Fault` shutdown trigger.
///
/// The previously installed hook still runs first. Panics inside request
/// handlers are left to the API's panic middleware.
pub fn install_panic_trigger(triggers: mpsc::UnboundedSender<ShutdownTrigger>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        previous(panic_info);
        if api::in_request_scope() {
            return;
        }
        let _ = triggers.send(ShutdownTrigger::Fault(panic_info.to_string()));
    }));
}

fn forward_signals(triggers: mpsc::UnboundedSender<ShutdownTrigger>) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        let mut interrupt = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = terminate.recv() => "SIGTERM",
                    _ = interrupt.recv() => "SIGINT",
                };
                info!(signal = name, "termination signal received");
                if triggers.send(ShutdownTrigger::Signal(name)).is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if triggers.send(ShutdownTrigger::Signal("ctrl-c")).is_err() {
                break;
            }
        }
    });

    Ok(())
}
