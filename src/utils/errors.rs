//! User-Friendly Error Formatting
//!
//! Provides user-friendly error messages with troubleshooting hints
//! for common error scenarios.

use std::fmt::Write;

/// Format error for user consumption
///
/// Takes technical error and produces user-friendly message with
/// troubleshooting steps and context.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    // Header
    writeln!(&mut output, "").ok();
    writeln!(
        &mut output,
        "╔════════════════════════════════════════════════════════════╗"
    )
    .ok();
    writeln!(
        &mut output,
        "║                     ERROR                                  ║"
    )
    .ok();
    writeln!(
        &mut output,
        "╚════════════════════════════════════════════════════════════╝"
    )
    .ok();
    writeln!(&mut output, "").ok();

    // Analyze error and provide context
    let error_msg = error.to_string();

    if error_msg.contains("virtual terminal") || error_msg.contains("tty") {
        format_console_error(&mut output, &error_msg);
    } else if error_msg.contains("display") || error_msg.contains("X server") {
        format_display_error(&mut output, &error_msg);
    } else if error_msg.contains("PAM")
        || error_msg.contains("authentication")
        || error_msg.contains("pam")
    {
        format_auth_error(&mut output, &error_msg);
    } else if error_msg.contains("config") {
        format_config_error(&mut output, &error_msg);
    } else {
        format_generic_error(&mut output, &error_msg);
    }

    // Technical details
    writeln!(&mut output, "").ok();
    writeln!(
        &mut output,
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"
    )
    .ok();
    writeln!(&mut output, "Technical Details:").ok();
    writeln!(&mut output, "").ok();
    writeln!(&mut output, "{:#}", error).ok();
    writeln!(&mut output, "").ok();

    // Footer with help
    writeln!(
        &mut output,
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"
    )
    .ok();
    writeln!(&mut output, "Need Help?").ok();
    writeln!(
        &mut output,
        "  - Run with --verbose for detailed logs: limen -vv"
    )
    .ok();
    writeln!(&mut output, "  - Check logs in: /var/log/limen/").ok();
    writeln!(
        &mut output,
        "  - Try it inside an existing session first: limen --preview"
    )
    .ok();
    writeln!(
        &mut output,
        "╚════════════════════════════════════════════════════════════╝"
    )
    .ok();

    output
}

fn format_console_error(output: &mut String, _error: &str) {
    writeln!(output, "Console Access Error").ok();
    writeln!(output, "").ok();
    writeln!(
        output,
        "Could not query the kernel console for a free virtual terminal."
    )
    .ok();
    writeln!(output, "").ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output, "").ok();
    writeln!(output, "  1. Not running as root").ok();
    writeln!(output, "     → /dev/tty0 is only writable by root").ok();
    writeln!(output, "     → Start via the service manager, not a user shell").ok();
    writeln!(output, "").ok();
    writeln!(output, "  2. No kernel console available").ok();
    writeln!(output, "     → Containers and headless VMs often lack /dev/tty0").ok();
    writeln!(output, "     → Use --preview inside an existing session instead").ok();
    writeln!(output, "").ok();
    writeln!(output, "  3. Every virtual terminal is occupied").ok();
    writeln!(output, "     → Check: ls /dev/tty[1-9]*").ok();
    writeln!(output, "     → Log out of unused console sessions").ok();
}

fn format_display_error(output: &mut String, _error: &str) {
    writeln!(output, "Display Server Error").ok();
    writeln!(output, "").ok();
    writeln!(output, "Could not bring up the X server.").ok();
    writeln!(output, "").ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output, "").ok();
    writeln!(output, "  1. X server binary missing").ok();
    writeln!(output, "     → Check: which Xorg").ok();
    writeln!(output, "     → Install: sudo apt install xserver-xorg").ok();
    writeln!(
        output,
        "     → Or set xorg_path in /etc/limen/config.toml"
    )
    .ok();
    writeln!(output, "").ok();
    writeln!(output, "  2. Stale display lock files").ok();
    writeln!(output, "     → Check: ls /tmp/.X*-lock").ok();
    writeln!(
        output,
        "     → Remove locks left by a crashed server: sudo rm /tmp/.X0-lock"
    )
    .ok();
    writeln!(output, "").ok();
    writeln!(output, "  3. Another display manager is running").ok();
    writeln!(output, "     → Check: systemctl status display-manager").ok();
    writeln!(output, "     → Stop it before starting this one").ok();
    writeln!(output, "").ok();
    writeln!(output, "  4. X server crashes on startup").ok();
    writeln!(output, "     → Read the server log: /var/log/limen/xserver.log").ok();
}

fn format_auth_error(output: &mut String, _error: &str) {
    writeln!(output, "Authentication Error").ok();
    writeln!(output, "").ok();
    writeln!(output, "Could not authenticate against the PAM stack.").ok();
    writeln!(output, "").ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output, "").ok();
    writeln!(output, "  1. PAM service file missing").ok();
    writeln!(output, "     → Check: ls /etc/pam.d/limen").ok();
    writeln!(
        output,
        "     → Create one, or point service at an existing stack (e.g. 'login')"
    )
    .ok();
    writeln!(output, "").ok();
    writeln!(output, "  2. Not running as root").ok();
    writeln!(
        output,
        "     → Password checks against shadow entries need root"
    )
    .ok();
    writeln!(output, "").ok();
    writeln!(output, "  3. PAM misconfiguration").ok();
    writeln!(output, "     → Check the system log: journalctl -t limen").ok();
    writeln!(output, "     → Test the stack with: pamtester limen <user> authenticate").ok();
}

fn format_config_error(output: &mut String, _error: &str) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output, "").ok();
    writeln!(output, "Problem with configuration file.").ok();
    writeln!(output, "").ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output, "").ok();
    writeln!(output, "  1. Configuration file not found").ok();
    writeln!(output, "     → Default location: /etc/limen/config.toml").ok();
    writeln!(output, "     → Or specify: limen -c /path/to/config.toml").ok();
    writeln!(output, "").ok();
    writeln!(output, "  2. Invalid TOML syntax").ok();
    writeln!(output, "     → Check for typos, missing quotes, etc.").ok();
    writeln!(output, "").ok();
    writeln!(output, "  3. Invalid values").ok();
    writeln!(output, "     → max_displays must be at least 1").ok();
    writeln!(output, "     → logging.format must be pretty, compact, or json").ok();
}

fn format_generic_error(output: &mut String, error: &str) {
    writeln!(output, "Login Manager Error").ok();
    writeln!(output, "").ok();
    writeln!(output, "An error occurred while running the login manager.").ok();
    writeln!(output, "").ok();
    writeln!(output, "Error: {}", error).ok();
    writeln!(output, "").ok();
    writeln!(output, "Troubleshooting:").ok();
    writeln!(output, "").ok();
    writeln!(output, "  1. Check the X server came up:").ok();
    writeln!(output, "     → cat /var/log/limen/xserver.log").ok();
    writeln!(output, "").ok();
    writeln!(output, "  2. Verify required binaries exist:").ok();
    writeln!(output, "     → which Xorg xcompmgr hsetroot xsetroot").ok();
    writeln!(output, "").ok();
    writeln!(output, "  3. Try preview mode inside an existing session:").ok();
    writeln!(output, "     → limen --preview").ok();
}
