//! PAM-backed credential validation
//!
//! Performs blocking PAM calls and must run on a blocking thread (the
//! attempt worker). One [`PamSession`] maps to one PAM transaction:
//! `pam_start` at open, `pam_authenticate`, `pam_open_session`, and
//! `pam_close_session`/`pam_end` when the handle is consumed or dropped.

use pam::{Authenticator, PasswordConv};
use tracing::{debug, info, warn};

use super::{AuthError, AuthenticatedUser, Credentials, Validator, ValidatorSession};

/// PAM credential validator
///
/// Holds the PAM service name; each [`open`](Validator::open) starts a fresh
/// transaction against it.
pub struct PamValidator {
    service: String,
}

impl PamValidator {
    /// Create a validator for the given PAM service name.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Validator for PamValidator {
    fn open<'v>(
        &'v self,
        credentials: &Credentials,
    ) -> Result<Box<dyn ValidatorSession + 'v>, AuthError> {
        debug!(
            service = %self.service,
            username = %credentials.username,
            "Starting PAM transaction"
        );

        let mut authenticator = Authenticator::with_password(&self.service)
            .map_err(|e| AuthError::Init(e.to_string()))?;

        // Drop closes the session (if one was opened) and ends the
        // transaction, so an abandoned handle cannot leak a PAM session.
        authenticator.close_on_drop = true;
        authenticator
            .get_handler()
            .set_credentials(credentials.username.as_str(), credentials.secret.as_str());

        Ok(Box::new(PamSession {
            authenticator,
            username: credentials.username.clone(),
        }))
    }
}

/// One PAM transaction
pub struct PamSession<'v> {
    authenticator: Authenticator<'v, PasswordConv>,
    username: String,
}

impl ValidatorSession for PamSession<'_> {
    fn authenticate(&mut self) -> Result<(), AuthError> {
        if let Err(e) = self.authenticator.authenticate() {
            // Log the PAM detail here; callers only learn that the
            // credentials were rejected.
            info!(username = %self.username, error = %e, "PAM authentication rejected");
            return Err(AuthError::Denied);
        }

        debug!(username = %self.username, "PAM authentication successful");
        Ok(())
    }

    fn open_session(&mut self) -> Result<(), AuthError> {
        self.authenticator
            .open_session()
            .map_err(|e| AuthError::SessionOpen(e.to_string()))?;

        info!(username = %self.username, "PAM session opened");
        Ok(())
    }

    fn close_session(self: Box<Self>) -> Result<(), AuthError> {
        // pam_close_session runs in the authenticator's drop; PAM reports
        // close failures through its own syslog channel.
        info!(username = %self.username, "Closing PAM session");
        drop(self);
        Ok(())
    }

    fn user(&self) -> Result<AuthenticatedUser, AuthError> {
        let user = AuthenticatedUser::from_username(&self.username)?;
        if user.username != self.username {
            warn!(
                requested = %self.username,
                resolved = %user.username,
                "User database returned a different canonical name"
            );
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercises a real PAM stack; requires a configured service and a user
    // to test against, so it only runs when explicitly requested.
    #[test]
    #[ignore = "requires a configured PAM service and real credentials"]
    fn test_pam_rejects_bad_password() {
        let validator = PamValidator::new("login");
        let credentials = Credentials::new("root", "definitely-not-the-password");
        let mut session = validator.open(&credentials).unwrap();
        assert!(matches!(session.authenticate(), Err(AuthError::Denied)));
    }

    #[test]
    fn test_validator_holds_service_name() {
        let validator = PamValidator::new("limen");
        assert_eq!(validator.service, "limen");
    }
}
