//! Display server supervision
//!
//! Brings up the X server on a free display number and free virtual
//! terminal, waits for the server log to settle before starting the
//! compositing manager, and applies root-window styling. In preview mode
//! everything here is a no-op: the engine runs inside an existing session
//! and inherits its `DISPLAY`.

use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Instant;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DisplayConfig;
use crate::session::LaunchContext;

pub mod readiness;

use readiness::{tail_line, ReadinessDetector, POLL_INTERVAL};

/// Display bring-up errors
#[derive(Debug, Error)]
pub enum DisplayError {
    /// Every probed display number already has a lock file.
    #[error("no free display number among the first {probed}")]
    NoFreeDisplay {
        /// How many numbers were probed
        probed: u32,
    },

    /// The kernel reported no free virtual terminal, or the console could
    /// not be queried.
    #[error("no free virtual terminal: {0}")]
    NoFreeVt(String),

    /// The X server binary could not be spawned.
    #[error("failed to spawn display server {program}: {source}")]
    ServerSpawn {
        /// Server binary
        program: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

/// A started display server
#[derive(Debug)]
pub struct DisplayHandle {
    /// Display number N of ":N"
    pub display_number: u32,

    /// Display string exported as `DISPLAY`
    pub display: String,

    /// Virtual terminal the server occupies
    pub vt: u16,

    /// The X server process
    pub server: Child,
}

/// Display server supervisor
pub struct DisplaySupervisor {
    config: DisplayConfig,
    preview: bool,
    handle: Option<DisplayHandle>,
    compositor: Option<Child>,
    compositor_started: bool,
}

impl DisplaySupervisor {
    /// Create a supervisor; nothing is spawned until [`start`](Self::start).
    pub fn new(config: DisplayConfig, preview: bool) -> Self {
        Self {
            config,
            preview,
            handle: None,
            compositor: None,
            compositor_started: false,
        }
    }

    /// Display string of the running server, if any.
    pub fn display(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.display.as_str())
    }

    /// Virtual terminal of the running server, if any.
    pub fn vt(&self) -> Option<u16> {
        self.handle.as_ref().map(|h| h.vt)
    }

    /// Whether the compositing stage has been brought up.
    pub fn compositor_started(&self) -> bool {
        self.compositor_started
    }

    /// Start the X server on a free display and VT.
    ///
    /// Exports `DISPLAY` and `XAUTHORITY` for every process spawned after
    /// this. No-op in preview mode.
    pub fn start(&mut self) -> Result<(), DisplayError> {
        if self.preview {
            info!("Preview mode: keeping the existing display");
            return Ok(());
        }

        let display_number = free_display_in(Path::new("/tmp"), self.config.max_displays)
            .ok_or(DisplayError::NoFreeDisplay {
                probed: self.config.max_displays,
            })?;
        let display = format!(":{}", display_number);
        let vt = free_vt()?;

        info!("Starting display server on :{} (vt{})", display_number, vt);

        let mut cmd = Command::new(&self.config.xorg_path);
        cmd.arg("-logverbose")
            .arg("-logfile")
            .arg(&self.config.server_log)
            .arg("-nolisten")
            .arg("tcp")
            .arg(&display)
            .arg("-auth")
            .arg(&self.config.auth_file)
            .arg(format!("vt{}", vt));

        let server = cmd.spawn().map_err(|source| DisplayError::ServerSpawn {
            program: self.config.xorg_path.clone(),
            source,
        })?;

        info!("Display server started, pid {}", server.id());

        std::env::set_var("DISPLAY", &display);
        std::env::set_var("XAUTHORITY", &self.config.auth_file);

        self.handle = Some(DisplayHandle {
            display_number,
            display,
            vt,
            server,
        });
        Ok(())
    }

    /// Wait until the server log settles, then start the compositor.
    ///
    /// Skips the wait when a compositor is already running (a leftover from
    /// a previous session keeps working). Compositor spawn failure is
    /// logged, not fatal.
    pub async fn await_compositor_ready(&mut self) -> Result<(), DisplayError> {
        if self.preview {
            return Ok(());
        }

        if compositor_running(&self.config.compositor_path) {
            info!(
                "Compositor {:?} already running, skipping startup wait",
                self.config.compositor_path
            );
            self.compositor_started = true;
            return Ok(());
        }

        let start = Instant::now();
        let mut detector = ReadinessDetector::default();
        loop {
            let tail = tail_line(&self.config.server_log);
            if detector.observe(tail.as_deref(), start.elapsed()) {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        debug!(
            "Display server log settled after {:?} (streak {})",
            start.elapsed(),
            detector.streak()
        );

        match Command::new(&self.config.compositor_path).spawn() {
            Ok(child) => {
                info!("Compositor started, pid {}", child.id());
                self.compositor = Some(child);
            }
            Err(e) => {
                warn!(
                    "Failed to start compositor {:?}: {} - continuing without compositing",
                    self.config.compositor_path, e
                );
            }
        }
        self.compositor_started = true;
        Ok(())
    }

    /// Apply wallpaper and cursor to the root window.
    ///
    /// Helper failures are logged and never abort the login loop. Skipped
    /// in preview mode.
    pub fn apply_style(&mut self) -> Result<(), DisplayError> {
        if self.preview {
            return Ok(());
        }

        run_style_helper(
            &self.config.hsetroot_path,
            &["-fill".as_ref(), self.config.wallpaper.as_os_str()],
        );
        run_style_helper(
            &self.config.xsetroot_path,
            &["-cursor_name".as_ref(), self.config.cursor_name.as_ref()],
        );
        Ok(())
    }

    /// Display facts for the session process environment.
    pub fn launch_context(&self, extra_env: Vec<(String, String)>) -> LaunchContext {
        match &self.handle {
            Some(handle) => LaunchContext {
                display: Some(handle.display.clone()),
                auth_file: Some(self.config.auth_file.clone()),
                vt: Some(handle.vt),
                extra_env,
            },
            None => LaunchContext {
                // Preview: sessions are never spawned, but tests and future
                // callers still get the configured environment.
                display: std::env::var("DISPLAY").ok(),
                auth_file: None,
                vt: None,
                extra_env,
            },
        }
    }

    /// Terminate the compositor and the X server, in that order.
    ///
    /// Called on every run-loop exit; a no-op when nothing was started.
    pub fn stop(&mut self) {
        if let Some(mut compositor) = self.compositor.take() {
            terminate_child("compositor", &mut compositor);
        }
        self.compositor_started = false;

        if let Some(mut handle) = self.handle.take() {
            info!("Stopping X server on {}", handle.display);
            terminate_child("X server", &mut handle.server);
        }
    }
}

/// SIGTERM a managed child and reap it.
fn terminate_child(name: &str, child: &mut Child) {
    let pid = Pid::from_raw(child.id() as i32);
    if let Err(errno) = signal::kill(pid, Signal::SIGTERM) {
        if errno != Errno::ESRCH {
            warn!("Failed to signal {} (pid {}): {}", name, pid, errno);
        }
    }
    match child.wait() {
        Ok(status) => debug!("{} exited: {}", name, status),
        Err(e) => warn!("Failed to reap {}: {}", name, e),
    }
}

/// Run a short-lived styling helper and log its outcome.
fn run_style_helper(program: &Path, args: &[&std::ffi::OsStr]) {
    match Command::new(program).args(args).status() {
        Ok(status) if status.success() => debug!("Style helper {:?} succeeded", program),
        Ok(status) => warn!("Style helper {:?} exited with {}", program, status),
        Err(e) => warn!("Style helper {:?} failed to start: {}", program, e),
    }
}

/// First display number in `0..max` whose lock file is absent in `dir`.
fn free_display_in(dir: &Path, max: u32) -> Option<u32> {
    (0..max).find(|n| !dir.join(format!(".X{}-lock", n)).exists())
}

/// Ask the console multiplexer for a free virtual terminal.
fn free_vt() -> Result<u16, DisplayError> {
    // VT_OPENQRY fills in the number of the first available VT.
    const VT_OPENQRY: libc::c_ulong = 0x5600;

    let tty = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty0")
        .map_err(|e| DisplayError::NoFreeVt(format!("cannot open /dev/tty0: {}", e)))?;

    let mut vt: libc::c_int = -1;
    // SAFETY: VT_OPENQRY writes a c_int through the provided pointer; the
    // fd is open for the duration of the call.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::ioctl(tty.as_raw_fd(), VT_OPENQRY, &mut vt) };
    if rc != 0 {
        return Err(DisplayError::NoFreeVt(format!(
            "VT_OPENQRY failed: {}",
            io::Error::last_os_error()
        )));
    }
    if vt < 1 {
        return Err(DisplayError::NoFreeVt("kernel reported none available".into()));
    }
    Ok(vt as u16)
}

/// Whether a process with the helper's file name is already running.
fn compositor_running(compositor: &Path) -> bool {
    let Some(name) = compositor.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    system
        .processes()
        .values()
        .any(|process| process.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_free_display_skips_locked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".X0-lock"), "1234").unwrap();
        std::fs::write(dir.path().join(".X1-lock"), "1235").unwrap();

        assert_eq!(free_display_in(dir.path(), 16), Some(2));
    }

    #[test]
    fn test_free_display_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        for n in 0..4 {
            std::fs::write(dir.path().join(format!(".X{}-lock", n)), "x").unwrap();
        }

        assert_eq!(free_display_in(dir.path(), 4), None);
    }

    #[test]
    fn test_compositor_running_detects_live_process() {
        let mut child = Command::new("/bin/sleep").arg("30").spawn().unwrap();

        // Give the process table a moment to show the child
        std::thread::sleep(Duration::from_millis(50));
        assert!(compositor_running(Path::new("/bin/sleep")));
        assert!(!compositor_running(Path::new(
            "/usr/bin/limen-no-such-compositor"
        )));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_preview_start_spawns_nothing() {
        let mut supervisor = DisplaySupervisor::new(DisplayConfig::default(), true);
        supervisor.start().unwrap();
        assert!(supervisor.display().is_none());
        assert!(supervisor.vt().is_none());
        assert!(!supervisor.compositor_started());
    }

    #[test]
    fn test_preview_style_is_noop() {
        let mut config = DisplayConfig::default();
        config.hsetroot_path = PathBuf::from("/nonexistent/hsetroot");
        config.xsetroot_path = PathBuf::from("/nonexistent/xsetroot");

        let mut supervisor = DisplaySupervisor::new(config, true);
        assert!(supervisor.apply_style().is_ok());
    }

    #[test]
    fn test_style_helper_failures_are_nonfatal() {
        let mut config = DisplayConfig::default();
        config.hsetroot_path = PathBuf::from("/nonexistent/hsetroot");
        config.xsetroot_path = PathBuf::from("/nonexistent/xsetroot");

        let mut supervisor = DisplaySupervisor::new(config, false);
        assert!(supervisor.apply_style().is_ok());
    }

    #[test]
    fn test_launch_context_without_display() {
        let supervisor = DisplaySupervisor::new(DisplayConfig::default(), true);
        let ctx = supervisor.launch_context(vec![("LANG".into(), "C".into())]);
        assert!(ctx.auth_file.is_none());
        assert!(ctx.vt.is_none());
        assert_eq!(ctx.extra_env.len(), 1);
    }

    #[test]
    #[ignore = "requires console access to /dev/tty0"]
    fn test_free_vt_answers() {
        let vt = free_vt().unwrap();
        assert!(vt >= 1);
    }
}
