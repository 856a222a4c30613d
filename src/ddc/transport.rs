//! Transport seam between the command channel and the hardware.
//!
//! The production transport shells out to ddcutil; tests swap in a scripted
//! implementation.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::trace;

/// Raw transport outcome, before channel-level interpretation.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The display (or ddcutil) rejected the feature outright. Permanent.
    Rejected(String),
    /// The command ran but failed for a reason that may clear up.
    Failed(String),
    /// The command did not finish in time.
    TimedOut(Duration),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Low-level DDC operations against one display.
pub trait DdcTransport: Send {
    /// Reads a feature; returns the tool's raw stdout for the channel to parse.
    fn get_vcp(&mut self, code: u8, timeout: Duration) -> TransportResult<String>;

    /// Writes a feature. `verify` requests a read-back check by the tool.
    fn set_vcp(&mut self, code: u8, value: u16, verify: bool, timeout: Duration)
    -> TransportResult<()>;

    /// Queries the capabilities string.
    fn capabilities(&mut self, timeout: Duration) -> TransportResult<String>;
}

/// Shells out to the ddcutil binary.
pub struct DdcutilTransport {
    display: u32,
    sleep_multiplier: f64,
}

impl DdcutilTransport {
    pub fn new(display: u32, sleep_multiplier: f64) -> Self {
        Self {
            display,
            sleep_multiplier,
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("ddcutil");
        cmd.arg("--sleep-multiplier")
            .arg(format!("{}", self.sleep_multiplier))
            .arg("--display")
            .arg(self.display.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn run(&self, mut cmd: Command, timeout: Duration) -> TransportResult<String> {
        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Failed(format!("spawn failed: {e}")))?;
        let status = wait_timeout(&mut child, timeout)?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(out) = child.stdout.as_mut() {
            let _ = out.read_to_string(&mut stdout);
        }
        if let Some(err) = child.stderr.as_mut() {
            let _ = err.read_to_string(&mut stderr);
        }
        trace!(status = %status, stdout = %stdout.trim(), "ddcutil finished");

        if status.success() {
            Ok(stdout)
        } else if is_rejection(&stderr) || is_rejection(&stdout) {
            Err(TransportError::Rejected(stderr.trim().to_string()))
        } else {
            Err(TransportError::Failed(format!(
                "ddcutil exited with {status}: {}",
                stderr.trim()
            )))
        }
    }
}

/// Stderr markers that mean the display does not support the feature, as
/// opposed to a flaky bus.
fn is_rejection(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("unsupported") || lower.contains("invalid feature")
}

/// Polls a child process with a deadline, killing it on expiry.
fn wait_timeout(child: &mut Child, timeout: Duration) -> TransportResult<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(TransportError::TimedOut(timeout));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(TransportError::Failed(format!("wait failed: {e}"))),
        }
    }
}

impl DdcTransport for DdcutilTransport {
    fn get_vcp(&mut self, code: u8, timeout: Duration) -> TransportResult<String> {
        let mut cmd = self.base_command();
        cmd.arg("getvcp").arg(format!("0x{code:02X}"));
        self.run(cmd, timeout)
    }

    fn set_vcp(
        &mut self,
        code: u8,
        value: u16,
        verify: bool,
        timeout: Duration,
    ) -> TransportResult<()> {
        let mut cmd = self.base_command();
        cmd.arg("setvcp")
            .arg(format!("0x{code:02X}"))
            .arg(value.to_string());
        if !verify {
            cmd.arg("--noverify");
        }
        self.run(cmd, timeout).map(|_| ())
    }

    fn capabilities(&mut self, timeout: Duration) -> TransportResult<String> {
        let mut cmd = self.base_command();
        cmd.arg("capabilities");
        self.run(cmd, timeout)
    }
}
