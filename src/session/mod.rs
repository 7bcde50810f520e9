//! User session lifecycle
//!
//! A [`UserSession`] drives one login attempt end to end: authenticate the
//! submitted credentials, open the account session, spawn the session
//! process as the resolved user, wait for it to conclude, close the account
//! session. The spawned child is waited with `waitpid` so stop/continue
//! events can be observed and logged without ending the session.

use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthError, AuthenticatedUser, Credentials, Validator, ValidatorSession};

pub mod registry;

/// Search path exported to session processes.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Session lifecycle errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation was called in a state that does not allow it.
    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },

    /// Credential validation failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The session process could not be spawned.
    #[error("failed to spawn session process {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Waiting on the session process failed.
    #[error("wait on session process failed: {0}")]
    Wait(Errno),
}

/// Session state
///
/// `Failed` and `Ended` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing checked yet
    New,

    /// Credential check in progress
    Authenticating,

    /// Credentials accepted, no process yet
    Authenticated,

    /// Session process is running
    Running,

    /// Session process concluded
    Ended,

    /// Authentication, session open, or spawn failed
    Failed,
}

/// How a session process concluded (or paused)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Process exited on its own with the given code
    Exited(i32),

    /// Process was killed by the given signal
    Signaled(Signal),

    /// Process was stopped by the given signal; it may continue later
    Stopped(Signal),

    /// Process resumed after a stop
    Continued,
}

impl ExitOutcome {
    /// Whether this outcome ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExitOutcome::Exited(_) | ExitOutcome::Signaled(_))
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exited with code {}", code),
            ExitOutcome::Signaled(sig) => write!(f, "killed by signal {}", sig),
            ExitOutcome::Stopped(sig) => write!(f, "stopped by signal {}", sig),
            ExitOutcome::Continued => write!(f, "continued after stop"),
        }
    }
}

/// Classify a wait status.
///
/// Returns `None` for statuses that carry no session-level meaning
/// (`StillAlive`, ptrace traps).
pub fn classify(status: WaitStatus) -> Option<ExitOutcome> {
    match status {
        WaitStatus::Exited(_, code) => Some(ExitOutcome::Exited(code)),
        WaitStatus::Signaled(_, signal, _core_dumped) => Some(ExitOutcome::Signaled(signal)),
        WaitStatus::Stopped(_, signal) => Some(ExitOutcome::Stopped(signal)),
        WaitStatus::Continued(_) => Some(ExitOutcome::Continued),
        _ => None,
    }
}

/// Program plus arguments for the session process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCommand {
    /// Program to execute
    pub program: PathBuf,

    /// Arguments (no shell interpretation)
    pub args: Vec<String>,
}

impl SessionCommand {
    /// Split an exec line on whitespace into program and arguments.
    ///
    /// Returns `None` for an empty line. No shell quoting or expansion is
    /// performed.
    pub fn parse(exec: &str) -> Option<Self> {
        let mut parts = exec.split_whitespace();
        let program = PathBuf::from(parts.next()?);
        let args = parts.map(str::to_string).collect();
        Some(Self { program, args })
    }
}

/// Display facts exported into the session process environment.
///
/// All fields are optional; preview runs and tests launch without a
/// supervised display.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    /// X display the session should talk to (":0" form)
    pub display: Option<String>,

    /// X authority file
    pub auth_file: Option<PathBuf>,

    /// Virtual terminal number the display server occupies
    pub vt: Option<u16>,

    /// Additional environment entries from configuration
    pub extra_env: Vec<(String, String)>,
}

/// One user's login attempt
pub struct UserSession<'v> {
    id: Uuid,
    credentials: Credentials,
    state: SessionState,
    validator: Option<Box<dyn ValidatorSession + 'v>>,
    session_opened: bool,
    user: Option<AuthenticatedUser>,
    process: Option<Child>,
}

impl<'v> UserSession<'v> {
    /// Create a fresh attempt for the submitted credentials.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            id: Uuid::new_v4(),
            credentials,
            state: SessionState::New,
            validator: None,
            session_opened: false,
            user: None,
            process: None,
        }
    }

    /// Attempt identifier, carried through all lifecycle logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Username this attempt was submitted for.
    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Identity resolved during login, if the attempt got that far.
    pub fn user(&self) -> Option<&AuthenticatedUser> {
        self.user.as_ref()
    }

    /// Pid of the running session process, if any.
    pub fn pid(&self) -> Option<Pid> {
        self.process
            .as_ref()
            .map(|child| Pid::from_raw(child.id() as i32))
    }

    /// Check the credentials against the validator.
    ///
    /// On success the validator handle is kept for the later session open;
    /// on rejection the handle is released and the attempt is `Failed`.
    pub fn authenticate(&mut self, validator: &'v dyn Validator) -> Result<(), SessionError> {
        if self.state != SessionState::New {
            return Err(SessionError::InvalidState {
                operation: "authenticate",
                state: self.state,
            });
        }
        self.state = SessionState::Authenticating;

        info!(attempt = %self.id, "Authenticating user: {}", self.credentials.username);

        let mut handle = match validator.open(&self.credentials) {
            Ok(handle) => handle,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e.into());
            }
        };

        if let Err(e) = handle.authenticate() {
            // Releases the transaction without a session close; no session
            // was opened on this handle.
            drop(handle);
            self.state = SessionState::Failed;
            return Err(e.into());
        }

        self.validator = Some(handle);
        self.state = SessionState::Authenticated;
        info!(attempt = %self.id, "User {} authenticated", self.credentials.username);
        Ok(())
    }

    /// Open the account session and spawn the session process as the user.
    ///
    /// On spawn failure the account session stays open and the attempt is
    /// `Failed`; the caller must still [`release`](Self::release) the
    /// session so it is closed exactly once.
    pub fn login(
        &mut self,
        command: &SessionCommand,
        ctx: &LaunchContext,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Authenticated {
            return Err(SessionError::InvalidState {
                operation: "login",
                state: self.state,
            });
        }

        let handle = match self.validator.as_mut() {
            Some(handle) => handle,
            None => {
                return Err(SessionError::InvalidState {
                    operation: "login",
                    state: self.state,
                })
            }
        };

        if let Err(e) = handle.open_session() {
            // The session never opened, so ending the transaction is the
            // whole cleanup.
            drop(self.validator.take());
            self.state = SessionState::Failed;
            return Err(e.into());
        }
        self.session_opened = true;

        let user = match handle.user() {
            Ok(user) => user,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e.into());
            }
        };

        info!(
            attempt = %self.id,
            "Spawning session {:?} for {} (uid {}, gid {})",
            command.program, user.username, user.uid, user.gid
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .env_clear()
            .env("PATH", DEFAULT_PATH)
            .env("HOME", &user.home)
            .env("USER", &user.username)
            .env("LOGNAME", &user.username)
            .env("SHELL", &user.shell)
            .current_dir(&user.home)
            .uid(user.uid)
            .gid(user.gid)
            .process_group(0);

        if let Some(display) = &ctx.display {
            cmd.env("DISPLAY", display);
        }
        if let Some(auth_file) = &ctx.auth_file {
            cmd.env("XAUTHORITY", auth_file);
        }
        if let Some(vt) = ctx.vt {
            cmd.env("XDG_VTNR", vt.to_string());
        }
        for (key, value) in &ctx.extra_env {
            cmd.env(key, value);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state = SessionState::Failed;
                return Err(SessionError::Spawn {
                    program: command.program.clone(),
                    source,
                });
            }
        };

        info!(attempt = %self.id, "Session process started, pid {}", child.id());
        self.user = Some(user);
        self.process = Some(child);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Wait for the session process to conclude.
    ///
    /// Stop and continue events are logged and waited through; only a real
    /// exit or a fatal signal ends the wait. A wait error (other than
    /// `EINTR`, which retries) also concludes the session; the caller should
    /// proceed to [`logout`](Self::logout) in both cases.
    pub fn wait(&mut self) -> Result<ExitOutcome, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::InvalidState {
                operation: "wait",
                state: self.state,
            });
        }
        let pid = match self.pid() {
            Some(pid) => pid,
            None => {
                return Err(SessionError::InvalidState {
                    operation: "wait",
                    state: self.state,
                })
            }
        };

        let options = WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        loop {
            match waitpid(pid, Some(options)) {
                Ok(status) => match classify(status) {
                    Some(outcome) if outcome.is_terminal() => {
                        info!(attempt = %self.id, "Session process {} {}", pid, outcome);
                        self.process = None;
                        self.state = SessionState::Ended;
                        return Ok(outcome);
                    }
                    Some(outcome) => {
                        debug!(attempt = %self.id, "Session process {} {}", pid, outcome);
                    }
                    None => {}
                },
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!(
                        attempt = %self.id,
                        "Wait on session process {} failed ({}); treating session as ended",
                        pid, e
                    );
                    self.process = None;
                    self.state = SessionState::Ended;
                    return Err(SessionError::Wait(e));
                }
            }
        }
    }

    /// Close the account session after the process concluded.
    ///
    /// Close failures are logged, not retried; the handle is gone either
    /// way.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Ended {
            return Err(SessionError::InvalidState {
                operation: "logout",
                state: self.state,
            });
        }

        match self.validator.take() {
            Some(handle) if self.session_opened => {
                self.session_opened = false;
                if let Err(e) = handle.close_session() {
                    warn!(attempt = %self.id, "Failed to close account session: {}", e);
                }
            }
            Some(handle) => drop(handle),
            None => warn!(attempt = %self.id, "Logout with no validator session to close"),
        }
        info!(attempt = %self.id, "User {} logged out", self.credentials.username);
        Ok(())
    }

    /// Dispose of a still-held validator handle from any state.
    ///
    /// Closes the account session if one was opened (this is the one
    /// permitted close); otherwise just ends the transaction. Used on the
    /// spawn-failure path, where `login` leaves the session open.
    pub fn release(&mut self) {
        if let Some(handle) = self.validator.take() {
            if self.session_opened {
                self.session_opened = false;
                if let Err(e) = handle.close_session() {
                    warn!(attempt = %self.id, "Failed to close account session: {}", e);
                }
            }
        }
    }
}

impl Drop for UserSession<'_> {
    fn drop(&mut self) {
        if self.validator.is_some() && self.session_opened {
            warn!(
                attempt = %self.id,
                "Account session still open at drop; closing"
            );
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeCounters {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct FakeValidator {
        deny: bool,
        fail_session_open: bool,
        counters: Arc<FakeCounters>,
    }

    impl FakeValidator {
        fn accepting() -> Self {
            Self {
                deny: false,
                fail_session_open: false,
                counters: Arc::new(FakeCounters::default()),
            }
        }

        fn denying() -> Self {
            Self {
                deny: true,
                fail_session_open: false,
                counters: Arc::new(FakeCounters::default()),
            }
        }
    }

    impl Validator for FakeValidator {
        fn open<'v>(
            &'v self,
            credentials: &Credentials,
        ) -> Result<Box<dyn ValidatorSession + 'v>, AuthError> {
            Ok(Box::new(FakeSession {
                username: credentials.username.clone(),
                deny: self.deny,
                fail_session_open: self.fail_session_open,
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    struct FakeSession {
        username: String,
        deny: bool,
        fail_session_open: bool,
        counters: Arc<FakeCounters>,
    }

    impl ValidatorSession for FakeSession {
        fn authenticate(&mut self) -> Result<(), AuthError> {
            if self.deny {
                Err(AuthError::Denied)
            } else {
                Ok(())
            }
        }

        fn open_session(&mut self) -> Result<(), AuthError> {
            if self.fail_session_open {
                return Err(AuthError::SessionOpen("fake refusal".into()));
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close_session(self: Box<Self>) -> Result<(), AuthError> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn user(&self) -> Result<AuthenticatedUser, AuthError> {
            let real = nix::unistd::User::from_uid(nix::unistd::getuid())
                .map_err(|e| AuthError::Lookup(e.to_string()))?
                .ok_or_else(|| AuthError::UnknownUser(self.username.clone()))?;
            Ok(AuthenticatedUser {
                username: real.name,
                uid: real.uid.as_raw(),
                gid: real.gid.as_raw(),
                home: real.dir,
                shell: real.shell,
                gecos: real.gecos.to_string_lossy().into_owned(),
            })
        }
    }

    fn true_command() -> SessionCommand {
        SessionCommand {
            program: PathBuf::from("/bin/true"),
            args: vec![],
        }
    }

    #[test]
    fn test_classify_wait_statuses() {
        let pid = Pid::from_raw(100);
        assert_eq!(
            classify(WaitStatus::Exited(pid, 3)),
            Some(ExitOutcome::Exited(3))
        );
        assert_eq!(
            classify(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some(ExitOutcome::Signaled(Signal::SIGKILL))
        );
        assert_eq!(
            classify(WaitStatus::Stopped(pid, Signal::SIGTSTP)),
            Some(ExitOutcome::Stopped(Signal::SIGTSTP))
        );
        assert_eq!(
            classify(WaitStatus::Continued(pid)),
            Some(ExitOutcome::Continued)
        );
        assert_eq!(classify(WaitStatus::StillAlive), None);
    }

    #[test]
    fn test_terminal_outcomes() {
        assert!(ExitOutcome::Exited(0).is_terminal());
        assert!(ExitOutcome::Signaled(Signal::SIGTERM).is_terminal());
        assert!(!ExitOutcome::Stopped(Signal::SIGSTOP).is_terminal());
        assert!(!ExitOutcome::Continued.is_terminal());
    }

    #[test]
    fn test_command_parse() {
        let command = SessionCommand::parse("/usr/bin/xterm -fg white").unwrap();
        assert_eq!(command.program, PathBuf::from("/usr/bin/xterm"));
        assert_eq!(command.args, vec!["-fg".to_string(), "white".to_string()]);
        assert!(SessionCommand::parse("   ").is_none());
    }

    #[test]
    fn test_operations_require_proper_state() {
        let validator = FakeValidator::accepting();
        let mut session = UserSession::new(Credentials::new("user", "pw"));

        assert!(matches!(
            session.login(&true_command(), &LaunchContext::default()),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            session.wait(),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            session.logout(),
            Err(SessionError::InvalidState { .. })
        ));

        session.authenticate(&validator).unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);

        // A second authenticate is out of order
        assert!(matches!(
            session.authenticate(&validator),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_denied_credentials_fail_attempt() {
        let validator = FakeValidator::denying();
        let mut session = UserSession::new(Credentials::new("user", "bad"));

        assert!(matches!(
            session.authenticate(&validator),
            Err(SessionError::Auth(AuthError::Denied))
        ));
        assert_eq!(session.state(), SessionState::Failed);

        // Failure is terminal: no session open is possible afterwards
        assert!(matches!(
            session.login(&true_command(), &LaunchContext::default()),
            Err(SessionError::InvalidState { .. })
        ));
        assert_eq!(validator.counters.opened.load(Ordering::SeqCst), 0);
        assert_eq!(validator.counters.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_full_lifecycle_closes_once() {
        let validator = FakeValidator::accepting();
        let mut session = UserSession::new(Credentials::new("user", "pw"));

        session.authenticate(&validator).unwrap();
        session
            .login(&true_command(), &LaunchContext::default())
            .unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.pid().is_some());

        let outcome = session.wait().unwrap();
        assert_eq!(outcome, ExitOutcome::Exited(0));
        assert_eq!(session.state(), SessionState::Ended);

        session.logout().unwrap();
        assert_eq!(validator.counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(validator.counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exit_code_is_propagated() {
        let validator = FakeValidator::accepting();
        let mut session = UserSession::new(Credentials::new("user", "pw"));

        session.authenticate(&validator).unwrap();
        let command = SessionCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "exit 7".into()],
        };
        session.login(&command, &LaunchContext::default()).unwrap();

        assert_eq!(session.wait().unwrap(), ExitOutcome::Exited(7));
        session.logout().unwrap();
        assert_eq!(validator.counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_failure_leaves_session_open_until_release() {
        let validator = FakeValidator::accepting();
        let mut session = UserSession::new(Credentials::new("user", "pw"));

        session.authenticate(&validator).unwrap();
        let missing = SessionCommand {
            program: PathBuf::from("/nonexistent/limen-test-binary"),
            args: vec![],
        };
        assert!(matches!(
            session.login(&missing, &LaunchContext::default()),
            Err(SessionError::Spawn { .. })
        ));
        assert_eq!(session.state(), SessionState::Failed);

        // The account session was opened and must be closed by release
        assert_eq!(validator.counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(validator.counters.closed.load(Ordering::SeqCst), 0);
        session.release();
        assert_eq!(validator.counters.closed.load(Ordering::SeqCst), 1);

        // A second release must not close again
        session.release();
        assert_eq!(validator.counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_session_open_failure_closes_nothing() {
        let validator = FakeValidator {
            deny: false,
            fail_session_open: true,
            counters: Arc::new(FakeCounters::default()),
        };
        let mut session = UserSession::new(Credentials::new("user", "pw"));

        session.authenticate(&validator).unwrap();
        assert!(matches!(
            session.login(&true_command(), &LaunchContext::default()),
            Err(SessionError::Auth(AuthError::SessionOpen(_)))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(validator.counters.opened.load(Ordering::SeqCst), 0);
        assert_eq!(validator.counters.closed.load(Ordering::SeqCst), 0);

        // Nothing opened, so release has nothing to close
        session.release();
        assert_eq!(validator.counters.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_guard_closes_leaked_session() {
        let validator = FakeValidator::accepting();
        let counters = Arc::clone(&validator.counters);
        {
            let mut session = UserSession::new(Credentials::new("user", "pw"));
            session.authenticate(&validator).unwrap();
            let missing = SessionCommand {
                program: PathBuf::from("/nonexistent/limen-test-binary"),
                args: vec![],
            };
            let _ = session.login(&missing, &LaunchContext::default());
            // Dropped without release
        }
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signaled_child_is_classified() {
        let validator = FakeValidator::accepting();
        let mut session = UserSession::new(Credentials::new("user", "pw"));

        session.authenticate(&validator).unwrap();
        let command = SessionCommand {
            program: PathBuf::from("/bin/sleep"),
            args: vec!["30".into()],
        };
        session.login(&command, &LaunchContext::default()).unwrap();

        let pid = session.pid().unwrap();
        nix::sys::signal::kill(pid, Signal::SIGKILL).unwrap();

        assert_eq!(
            session.wait().unwrap(),
            ExitOutcome::Signaled(Signal::SIGKILL)
        );
        session.logout().unwrap();
        assert_eq!(validator.counters.closed.load(Ordering::SeqCst), 1);
    }

    proptest! {
        // Whatever path an attempt takes, an account-session open is
        // balanced by exactly one close by the time the attempt is gone.
        #[test]
        fn prop_open_is_balanced_by_one_close(
            deny in any::<bool>(),
            fail_open in any::<bool>(),
            spawn_missing in any::<bool>(),
            explicit_release in any::<bool>(),
        ) {
            let validator = FakeValidator {
                deny,
                fail_session_open: fail_open,
                counters: Arc::new(FakeCounters::default()),
            };
            let counters = Arc::clone(&validator.counters);
            {
                let mut session = UserSession::new(Credentials::new("user", "pw"));
                if session.authenticate(&validator).is_ok() {
                    let command = if spawn_missing {
                        SessionCommand {
                            program: PathBuf::from("/nonexistent/limen-test-binary"),
                            args: vec![],
                        }
                    } else {
                        true_command()
                    };
                    if session.login(&command, &LaunchContext::default()).is_ok() {
                        prop_assert!(session.wait().is_ok());
                        prop_assert!(session.logout().is_ok());
                    }
                }
                if explicit_release {
                    session.release();
                    session.release();
                }
            }
            let opened = counters.opened.load(Ordering::SeqCst);
            let closed = counters.closed.load(Ordering::SeqCst);
            prop_assert!(opened <= 1);
            prop_assert_eq!(closed, opened);
        }
    }
}
