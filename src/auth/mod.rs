//! Credential validation
//!
//! Wraps the system authentication stack behind the [`Validator`] and
//! [`ValidatorSession`] traits. The PAM implementation lives in
//! [`pam`](self::pam) behind the `pam-auth` feature; tests drive the same
//! traits with in-memory fakes.
//!
//! A validator handle moves through three stages: authenticate, open the
//! account session, close it. `close_session` consumes the handle, so a
//! second close does not typecheck. A handle dropped before `open_session`
//! succeeded only ends the underlying transaction.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use zeroize::Zeroizing;

#[cfg(feature = "pam-auth")]
pub mod pam;

/// Credential validation errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// The authentication backend could not be initialized.
    #[error("failed to initialize authentication: {0}")]
    Init(String),

    /// The credentials were rejected. The reason (wrong password, locked
    /// account, expired token) is logged at the adapter and deliberately
    /// not distinguished here.
    #[error("authentication failed")]
    Denied,

    /// Opening the account session failed after successful authentication.
    #[error("failed to open account session: {0}")]
    SessionOpen(String),

    /// Closing the account session reported an error.
    #[error("failed to close account session: {0}")]
    SessionClose(String),

    /// The authenticated name has no entry in the user database.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The user database could not be queried.
    #[error("user lookup failed: {0}")]
    Lookup(String),
}

/// A username plus the secret submitted at the prompt.
///
/// The secret is wiped from memory when the credentials are dropped and is
/// redacted from debug output.
#[derive(Clone)]
pub struct Credentials {
    /// Login name as typed at the prompt
    pub username: String,

    /// Submitted secret (password or passphrase)
    pub secret: Zeroizing<String>,
}

impl Credentials {
    /// Create credentials from a username and secret.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Authenticated user information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Username
    pub username: String,

    /// User ID (UID)
    pub uid: u32,

    /// Group ID (GID)
    pub gid: u32,

    /// Home directory
    pub home: PathBuf,

    /// Login shell
    pub shell: PathBuf,

    /// Full name (GECOS)
    pub gecos: String,
}

impl AuthenticatedUser {
    /// Resolve user information from the system user database.
    pub fn from_username(username: &str) -> Result<Self, AuthError> {
        use nix::unistd::User as NixUser;

        let user = NixUser::from_name(username)
            .map_err(|e| AuthError::Lookup(e.to_string()))?
            .ok_or_else(|| AuthError::UnknownUser(username.to_string()))?;

        Ok(Self {
            username: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
            shell: user.shell,
            gecos: user.gecos.to_string_lossy().into_owned(),
        })
    }
}

/// Factory for per-attempt validation handles.
///
/// Implementations are shared across attempt workers, so they must be
/// `Send + Sync`; the handles they open are used on a single worker thread
/// and may borrow from the validator.
pub trait Validator: Send + Sync {
    /// Open a validation transaction for the submitted credentials.
    ///
    /// Opening only establishes the transaction; the credentials are not
    /// checked until [`ValidatorSession::authenticate`] runs.
    fn open<'v>(
        &'v self,
        credentials: &Credentials,
    ) -> Result<Box<dyn ValidatorSession + 'v>, AuthError>;
}

/// One credential-validation transaction.
pub trait ValidatorSession {
    /// Check the credentials loaded at open time.
    fn authenticate(&mut self) -> Result<(), AuthError>;

    /// Open the account session. Requires a prior successful
    /// [`authenticate`](Self::authenticate).
    fn open_session(&mut self) -> Result<(), AuthError>;

    /// Close the account session and end the transaction.
    ///
    /// Consumes the handle. Must be called exactly once after a successful
    /// `open_session`; a handle whose `open_session` failed or never ran is
    /// simply dropped instead.
    fn close_session(self: Box<Self>) -> Result<(), AuthError>;

    /// System identity of the user this handle validated.
    fn user(&self) -> Result<AuthenticatedUser, AuthError>;
}
