//! Login manager run loop
//!
//! Owns one display, one greeter, and at most one user session at a time.
//! The loop styles the screen, shows the prompt, waits for a submission,
//! and hands the attempt to a blocking worker that drives the session
//! lifecycle end to end. While the worker runs, further submissions are
//! rejected and the signal ring keeps being polled, so a terminating
//! signal is acted on within one poll interval even mid-session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{Credentials, Validator};
use crate::config::Config;
use crate::display::{DisplayError, DisplaySupervisor};
use crate::exit;
use crate::greet::{Greeter, GreeterError, GreeterEvent};
use crate::session::registry;
use crate::session::{ExitOutcome, LaunchContext, SessionCommand, SessionError, UserSession};

pub mod signals;

use signals::{should_ignore, SignalCatcher, SignalError};

/// How often the run loop drains the signal ring while waiting.
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run-loop failures, each mapped to a reserved exit code
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The signal catcher could not be installed.
    #[error("signal handling setup failed: {0}")]
    SignalSetup(#[from] SignalError),

    /// Display or compositor bring-up failed.
    #[error("display initialization failed: {0}")]
    DisplayInit(#[from] DisplayError),

    /// Root-window styling failed outright.
    #[error("screen styling failed: {0}")]
    Style(DisplayError),

    /// The login prompt failed or its event channel closed.
    #[error("login prompt failed: {0}")]
    Prompt(#[from] GreeterError),

    /// A caught signal ended the run loop.
    #[error("terminated by {signal} from pid {sender}")]
    Terminated {
        /// Name of the signal
        signal: String,
        /// Recorded sender pid
        sender: i32,
    },
}

impl ManagerError {
    /// Reserved process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SignalSetup(_) => exit::SIGNAL_SETUP,
            Self::DisplayInit(_) => exit::DISPLAY_INIT,
            Self::Style(_) => exit::STYLE,
            Self::Prompt(_) => exit::PROMPT,
            Self::Terminated { .. } => exit::SIGNAL_EXIT,
        }
    }
}

/// How one login attempt concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The validator rejected the credentials.
    AuthFailed,

    /// Preview mode stopped the attempt after authentication.
    PreviewCompleted,

    /// Authentication passed but the account session would not open.
    SessionOpenFailed,

    /// The session process could not be spawned.
    SpawnFailed,

    /// The session ran; `outcome` is `None` when the wait itself failed.
    SessionEnded {
        /// How the session process concluded
        outcome: Option<ExitOutcome>,
    },

    /// The attempt worker panicked.
    WorkerPanicked,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::PreviewCompleted => write!(f, "preview completed"),
            Self::SessionOpenFailed => write!(f, "session open failed"),
            Self::SpawnFailed => write!(f, "session spawn failed"),
            Self::SessionEnded {
                outcome: Some(outcome),
            } => write!(f, "session ended ({})", outcome),
            Self::SessionEnded { outcome: None } => write!(f, "session ended (wait failed)"),
            Self::WorkerPanicked => write!(f, "attempt worker panicked"),
        }
    }
}

/// The login manager
///
/// Construct once, then [`run`](Self::run) until a fatal error or a
/// terminating signal. Preview mode changes what an attempt does, not
/// how long the loop runs.
pub struct LoginManager {
    config: Arc<Config>,
    preview: bool,
    validator: Arc<dyn Validator>,
    greeter: Box<dyn Greeter>,
    display: DisplaySupervisor,
    ready_notified: bool,
}

impl LoginManager {
    /// Assemble the manager from its parts.
    pub fn new(
        config: Arc<Config>,
        preview: bool,
        validator: Arc<dyn Validator>,
        greeter: Box<dyn Greeter>,
    ) -> Self {
        let display = DisplaySupervisor::new(config.display.clone(), preview);
        Self {
            config,
            preview,
            validator,
            greeter,
            display,
            ready_notified: false,
        }
    }

    #[cfg(test)]
    fn with_display(
        config: Arc<Config>,
        preview: bool,
        validator: Arc<dyn Validator>,
        greeter: Box<dyn Greeter>,
        display: DisplaySupervisor,
    ) -> Self {
        Self {
            config,
            preview,
            validator,
            greeter,
            display,
            ready_notified: false,
        }
    }

    /// Run the login loop.
    ///
    /// Loops until a fatal error or a terminating signal; each concluded
    /// attempt puts the prompt back up, in preview mode too. The display
    /// is torn down on every exit path.
    pub async fn run(&mut self) -> Result<(), ManagerError> {
        let catcher = SignalCatcher::install()?;
        info!("Login manager starting (preview: {})", self.preview);

        let result = self.run_inner(&catcher).await;
        self.display.stop();
        result
    }

    async fn run_inner(&mut self, catcher: &SignalCatcher) -> Result<(), ManagerError> {
        self.display.start()?;
        self.display.await_compositor_ready().await?;

        let mut events = self.greeter.subscribe();

        loop {
            self.display.apply_style().map_err(ManagerError::Style)?;
            self.greeter.build()?;
            self.greeter.show()?;
            self.notify_ready();

            let credentials = match wait_for_submission(catcher, &mut events).await? {
                Some(credentials) => credentials,
                None => {
                    info!("Login prompt cancelled; showing it again");
                    continue;
                }
            };
            self.greeter.hide();

            self.run_attempt(credentials, catcher, &mut events).await?;
        }
    }

    /// Drive one attempt on a blocking worker, supervising it from here.
    ///
    /// Submissions arriving while the worker is out are rejected; a fatal
    /// drained signal abandons the supervision and bubbles up.
    async fn run_attempt(
        &mut self,
        credentials: Credentials,
        catcher: &SignalCatcher,
        events: &mut mpsc::UnboundedReceiver<GreeterEvent>,
    ) -> Result<AttemptOutcome, ManagerError> {
        let validator = Arc::clone(&self.validator);
        let command = registry::resolve_command(&self.config.session);
        let extra_env: Vec<(String, String)> = self
            .config
            .session
            .environment
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let ctx = self.display.launch_context(extra_env);
        let preview = self.preview;

        let mut worker = tokio::task::spawn_blocking(move || {
            attempt_worker(validator, credentials, command, ctx, preview)
        });

        let mut poll = tokio::time::interval(SIGNAL_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                joined = &mut worker => {
                    return Ok(match joined {
                        Ok((id, outcome)) => {
                            info!(attempt = %id, "Login attempt finished: {}", outcome);
                            outcome
                        }
                        Err(join_error) => {
                            error!("Login attempt worker panicked: {}", join_error);
                            AttemptOutcome::WorkerPanicked
                        }
                    });
                }
                event = events.recv(), if events_open => match event {
                    Some(GreeterEvent::Submit(rejected)) => {
                        warn!(
                            "Rejecting login for {} while a session is active",
                            rejected.username
                        );
                    }
                    Some(GreeterEvent::Cancel) => {
                        debug!("Ignoring prompt cancel while a session is active");
                    }
                    None => events_open = false,
                },
                _ = poll.tick() => {
                    if let Err(e) = check_signals(catcher) {
                        warn!("Terminating with a session still active");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Tell the service manager we are up, once.
    fn notify_ready(&mut self) {
        if self.ready_notified {
            return;
        }
        self.ready_notified = true;
        if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
            debug!("Service readiness notification skipped: {}", e);
        }
        info!("Login manager ready");
    }
}

/// Wait for the next submission while draining the signal ring.
///
/// `Ok(None)` means the prompt was cancelled and should be shown again.
async fn wait_for_submission(
    catcher: &SignalCatcher,
    events: &mut mpsc::UnboundedReceiver<GreeterEvent>,
) -> Result<Option<Credentials>, ManagerError> {
    let mut poll = tokio::time::interval(SIGNAL_POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(GreeterEvent::Submit(credentials)) => return Ok(Some(credentials)),
                Some(GreeterEvent::Cancel) => return Ok(None),
                None => return Err(ManagerError::Prompt(GreeterError::Closed)),
            },
            _ = poll.tick() => check_signals(catcher)?,
        }
    }
}

/// Drain the ring and apply the termination rule to each delivery.
fn check_signals(catcher: &SignalCatcher) -> Result<(), ManagerError> {
    for caught in catcher.drain() {
        let name = caught
            .signal()
            .map(|signal| signal.as_str().to_owned())
            .unwrap_or_else(|| format!("signal {}", caught.signo));
        info!(
            "Caught {} from pid {} (uid {}, code {}, errno {}, status {})",
            name, caught.sender_pid, caught.sender_uid, caught.code, caught.errno, caught.status
        );

        if should_ignore(&caught) {
            info!("SIGTERM from pid 1 ignored");
            catcher.rearm(Signal::SIGTERM);
            continue;
        }

        return Err(ManagerError::Terminated {
            signal: name,
            sender: caught.sender_pid,
        });
    }
    Ok(())
}

/// Drive one session attempt from credentials to conclusion.
///
/// Runs on a blocking thread; the session and its validator handle never
/// leave this function.
fn attempt_worker(
    validator: Arc<dyn Validator>,
    credentials: Credentials,
    command: SessionCommand,
    ctx: LaunchContext,
    preview: bool,
) -> (Uuid, AttemptOutcome) {
    let mut session = UserSession::new(credentials);
    let id = session.id();

    if let Err(e) = session.authenticate(validator.as_ref()) {
        info!(attempt = %id, "Authentication failed: {}", e);
        return (id, AttemptOutcome::AuthFailed);
    }

    if preview {
        info!(attempt = %id, "Preview mode: stopping after authentication");
        return (id, AttemptOutcome::PreviewCompleted);
    }

    if let Err(e) = session.login(&command, &ctx) {
        error!(attempt = %id, "{}", e);
        session.release();
        let outcome = match e {
            SessionError::Spawn { .. } => AttemptOutcome::SpawnFailed,
            _ => AttemptOutcome::SessionOpenFailed,
        };
        return (id, outcome);
    }

    let outcome = match session.wait() {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!(attempt = %id, "Session wait failed: {}", e);
            None
        }
    };
    if let Err(e) = session.logout() {
        warn!(attempt = %id, "Logout failed: {}", e);
    }
    (id, AttemptOutcome::SessionEnded { outcome })
}
