//! Console login prompt
//!
//! A getty-style prompt on the controlling terminal: hostname banner,
//! username line, secret line with echo disabled. A single reader thread
//! sleeps on a condition variable and runs one prompt cycle per `show()`,
//! so the terminal is only touched while the run loop actually wants a
//! submission.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::thread;

use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, Termios};
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Greeter, GreeterError, GreeterEvent};
use crate::auth::Credentials;

/// Restores the terminal's echo flag when dropped.
struct EchoGuard {
    original: Termios,
}

impl EchoGuard {
    fn disable() -> Result<Self, GreeterError> {
        let stdin = io::stdin();
        let original = tcgetattr(&stdin)
            .map_err(|errno| GreeterError::Terminal(format!("tcgetattr: {errno}")))?;
        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(&stdin, SetArg::TCSANOW, &silent)
            .map_err(|errno| GreeterError::Terminal(format!("tcsetattr: {errno}")))?;
        Ok(Self { original })
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        let _ = tcsetattr(&io::stdin(), SetArg::TCSANOW, &self.original);
    }
}

#[derive(Default)]
struct GateState {
    pending: u32,
    shutdown: bool,
}

/// Wakes the reader thread once per requested prompt cycle.
struct Gate {
    state: Mutex<GateState>,
    wake: Condvar,
}

/// Built-in console greeter
pub struct ConsoleGreeter {
    host: String,
    gate: Arc<Gate>,
    sender: Option<mpsc::UnboundedSender<GreeterEvent>>,
    receiver: Option<mpsc::UnboundedReceiver<GreeterEvent>>,
    reader: Option<thread::JoinHandle<()>>,
}

impl ConsoleGreeter {
    /// Create a greeter for the local host. No thread starts until `build`.
    pub fn new() -> Self {
        let host = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_owned());
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            host,
            gate: Arc::new(Gate {
                state: Mutex::new(GateState::default()),
                wake: Condvar::new(),
            }),
            sender: Some(sender),
            receiver: Some(receiver),
            reader: None,
        }
    }
}

impl Default for ConsoleGreeter {
    fn default() -> Self {
        Self::new()
    }
}

impl Greeter for ConsoleGreeter {
    fn build(&mut self) -> Result<(), GreeterError> {
        if self.reader.is_some() {
            return Ok(());
        }
        let sender = match self.sender.take() {
            Some(sender) => sender,
            None => return Err(GreeterError::Closed),
        };
        let gate = Arc::clone(&self.gate);
        let host = self.host.clone();
        let handle = thread::Builder::new()
            .name("console-greeter".to_owned())
            .spawn(move || prompt_loop(gate, sender, host))?;
        self.reader = Some(handle);
        debug!("Console greeter reader thread started");
        Ok(())
    }

    fn show(&mut self) -> Result<(), GreeterError> {
        self.build()?;
        let mut state = self.gate.state.lock();
        state.pending += 1;
        self.gate.wake.notify_one();
        Ok(())
    }

    fn hide(&mut self) {
        // Visual separation only; the session owns the terminal next
        let _ = writeln!(io::stdout());
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<GreeterEvent> {
        match self.receiver.take() {
            Some(receiver) => receiver,
            None => {
                warn!("Greeter events already subscribed; handing out a closed channel");
                let (_sender, receiver) = mpsc::unbounded_channel();
                receiver
            }
        }
    }
}

impl Drop for ConsoleGreeter {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.shutdown = true;
        self.gate.wake.notify_all();
    }
}

fn prompt_loop(gate: Arc<Gate>, events: mpsc::UnboundedSender<GreeterEvent>, host: String) {
    loop {
        {
            let mut state = gate.state.lock();
            while state.pending == 0 && !state.shutdown {
                gate.wake.wait(&mut state);
            }
            if state.shutdown {
                return;
            }
            state.pending -= 1;
        }

        let stdin = io::stdin();
        let echo_control = stdin.is_terminal();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        let event = match prompt_once(&mut input, &mut output, &host, echo_control) {
            Ok(Some(credentials)) => GreeterEvent::Submit(credentials),
            Ok(None) => GreeterEvent::Cancel,
            Err(err) => {
                warn!("Login prompt failed: {}", err);
                GreeterEvent::Cancel
            }
        };

        let ended = matches!(event, GreeterEvent::Cancel);
        if events.send(event).is_err() {
            return;
        }
        if ended {
            // EOF or a read error on the terminal; no prompt can succeed now.
            // Ending the thread closes the channel, which the run loop
            // reports as a prompt failure.
            return;
        }
    }
}

/// One full prompt cycle. Returns `None` on end of input.
///
/// Usernames are whitespace-trimmed and empty ones re-prompt; the secret
/// keeps everything except the line ending.
fn prompt_once<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    host: &str,
    echo_control: bool,
) -> io::Result<Option<Credentials>> {
    let username = loop {
        write!(output, "\n{} login: ", host)?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            break trimmed.to_owned();
        }
    };

    write!(output, "Password: ")?;
    output.flush()?;

    let guard = if echo_control {
        match EchoGuard::disable() {
            Ok(guard) => Some(guard),
            Err(err) => {
                warn!("Cannot disable terminal echo: {}", err);
                None
            }
        }
    } else {
        None
    };

    let mut line = String::new();
    let read = input.read_line(&mut line);
    drop(guard);
    // Echo-off swallows the user's newline
    writeln!(output)?;
    if read? == 0 {
        return Ok(None);
    }

    let secret = line.trim_end_matches(['\r', '\n']);
    Ok(Some(Credentials::new(username, secret)))
}
