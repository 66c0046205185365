//! SSH login with retry on early connection resets
//!
//! Logging into a machine right after its container started regularly fails
//! with `ssh_exchange_identification: read: Connection reset by peer` while
//! sshd is still coming up. The connector watches ssh's stderr for that line
//! and runs the whole invocation again when it shows up.

use crate::error::{Result, VindError};
use crate::exec::Cmd;
use regex::bytes::Regex;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

/// Attempts made before the last error is returned
pub const DEFAULT_ATTEMPTS: u32 = 25;

/// Pause between two attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Pause before scanning a host key, sshd needs a moment after start
const KEYSCAN_DELAY: Duration = Duration::from_millis(500);

/// Matches `ssh_exchange_identification: read: Connection reset by peer`
pub fn connect_refused() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^ssh_exchange_identification: ").expect("valid regex"))
}

/// Matches `Warning: Permanently added '[localhost]:2222' (ED25519) to the list of known hosts.`
pub fn known_hosts() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new("^Warning: Permanently added .* to the list of known hosts.")
            .expect("valid regex")
    })
}

/// Writer forwarding everything that does not match a pattern to an inner
/// writer, and remembering whether the pattern was ever seen.
///
/// Each write is expected to carry a whole line.
pub struct MatchFilter<W: Write> {
    writer: W,
    regex: &'static Regex,
    write_matched: bool,
    matched: bool,
}

impl<W: Write> MatchFilter<W> {
    /// Filter dropping matching writes
    pub fn new(writer: W, regex: &'static Regex) -> Self {
        Self {
            writer,
            regex,
            write_matched: false,
            matched: false,
        }
    }

    /// Forward matching writes too
    pub fn write_matched(mut self, write_matched: bool) -> Self {
        self.write_matched = write_matched;
        self
    }

    /// Whether a write matched the pattern
    pub fn matched(&self) -> bool {
        self.matched
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Write for MatchFilter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.regex.is_match(buf) {
            self.matched = true;
            if !self.write_matched {
                return Ok(buf.len());
            }
        }
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Command run after login to land in the host's working directory
pub fn auto_cd_command(dir: &str) -> String {
    format!("cd {}; exec $SHELL -l", dir)
}

/// Arguments of an ssh invocation against a published port
pub fn ssh_args(
    key_path: &Path,
    port: u16,
    user: &str,
    remote: &str,
    extra: &[String],
    auto_cd: Option<&str>,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "IdentitiesOnly=yes",
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(key_path.display().to_string());
    args.extend([
        "-p".to_string(),
        port.to_string(),
        "-l".to_string(),
        user.to_string(),
        "-t".to_string(),
        remote.to_string(),
    ]);

    if !extra.is_empty() {
        args.extend(extra.iter().cloned());
    } else if let Some(dir) = auto_cd {
        args.push(auto_cd_command(dir));
    }
    args
}

/// Run `attempt` until it asks not to be retried or `attempts` runs out.
/// `attempt` returns whether a failure is worth retrying, and its result.
pub fn retry<F>(attempts: u32, delay: Duration, mut attempt: F) -> Result<()>
where
    F: FnMut() -> (bool, Result<()>),
{
    let mut remaining = attempts.max(1);
    loop {
        let (again, result) = attempt();
        remaining -= 1;
        if !again || remaining == 0 {
            return result;
        }
        tracing::debug!(remaining, "ssh not ready, retrying");
        std::thread::sleep(delay);
    }
}

/// Runs the `ssh` client against machines
#[derive(Debug, Clone)]
pub struct SshConnector {
    program: String,
    keyscan_program: String,
    attempts: u32,
    delay: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            keyscan_program: "ssh-keyscan".to_string(),
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl SshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another ssh client binary
    pub fn program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    /// Use another host key scanner binary
    pub fn keyscan_program(mut self, program: &str) -> Self {
        self.keyscan_program = program.to_string();
        self
    }

    /// Change the retry bound and pause
    pub fn retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts;
        self.delay = delay;
        self
    }

    /// Log in with `args`, the terminal attached
    pub fn connect(&self, args: &[String]) -> Result<()> {
        retry(self.attempts, self.delay, || self.attempt(args))
    }

    fn attempt(&self, args: &[String]) -> (bool, Result<()>) {
        tracing::debug!("{} {}", self.program, args.join(" "));

        let mut refused = MatchFilter::new(io::stderr(), connect_refused());
        let result = self.run(args, &mut refused);
        (result.is_err() && refused.matched(), result)
    }

    fn run<W: Write>(&self, args: &[String], refused: &mut MatchFilter<W>) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VindError::Ssh(format!("failed to run {}: {}", self.program, e)))?;

        let forwarded = match child.stderr.take() {
            Some(stderr) => {
                let mut filter = MatchFilter::new(&mut *refused, known_hosts());
                forward_lines(BufReader::new(stderr), &mut filter)
            }
            None => Ok(()),
        };

        // reap the child even when its stderr could not be forwarded
        let status = child.wait()?;
        forwarded?;
        if !status.success() {
            return Err(VindError::Ssh(format!("{} exited with {}", self.program, status)));
        }
        Ok(())
    }

    /// RSA host key of the sshd listening on `remote:port`, in known_hosts format
    pub fn scan_host_key(&self, port: u16, remote: &str) -> Result<String> {
        std::thread::sleep(KEYSCAN_DELAY);

        let lines = Cmd::new(&self.keyscan_program)
            .args(["-t", "rsa", "-p"])
            .arg(port.to_string())
            .arg(remote)
            .combined_output_lines()?;

        let mut keys = String::new();
        for line in lines.iter().filter(|l| !l.starts_with('#') && !l.trim().is_empty()) {
            keys.push_str(line);
            keys.push('\n');
        }
        Ok(keys)
    }
}

/// Copy `reader` into `writer` one line per write
fn forward_lines<R: BufRead, W: Write>(mut reader: R, writer: &mut W) -> io::Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return writer.flush();
        }
        writer.write_all(&line)?;
    }
}
