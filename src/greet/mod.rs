//! Greeter seam
//!
//! The run loop never talks to a concrete login UI. It drives anything
//! implementing [`Greeter`] and consumes [`GreeterEvent`]s from the
//! channel handed out by `subscribe`. The built-in implementation is the
//! console prompt in [`console`]; a graphical greeter plugs into the same
//! four calls.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth::Credentials;

pub mod console;

pub use console::ConsoleGreeter;

/// Greeter-side failures
#[derive(Debug, Error)]
pub enum GreeterError {
    /// Reading or writing the login prompt failed.
    #[error("greeter I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The event channel has no live sender left.
    #[error("greeter event channel closed")]
    Closed,

    /// Terminal control (echo, attributes) failed.
    #[error("terminal control failed: {0}")]
    Terminal(String),
}

/// Event emitted by a greeter
#[derive(Debug)]
pub enum GreeterEvent {
    /// The user submitted a username and secret.
    Submit(Credentials),

    /// The user abandoned the prompt (EOF, escape).
    Cancel,
}

/// A login prompt the run loop can show and hide
///
/// `build` performs one-time setup and may be called again before every
/// `show`; implementations make repeat calls cheap. `subscribe` transfers
/// the single event receiver to the caller.
pub trait Greeter: Send {
    /// One-time construction of the prompt surface.
    fn build(&mut self) -> Result<(), GreeterError>;

    /// Present the prompt and start one submission cycle.
    fn show(&mut self) -> Result<(), GreeterError>;

    /// Take the prompt off the screen. Cosmetic; never fails.
    fn hide(&mut self);

    /// Hand over the event receiver. Later calls return a closed channel.
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<GreeterEvent>;
}
