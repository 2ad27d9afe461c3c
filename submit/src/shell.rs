use std::{
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, trace};
use wait_timeout::ChildExt;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Failed to wait for a child process: {0}")]
    Wait(#[from] std::io::Error),
    #[error("Failed to write to the standard input of a child process: {0}")]
    Stdin(#[source] std::io::Error),
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
/// container for everything a finished command left behind
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub runtime: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr, the way a terminal would have shown them
    pub fn combined(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            (out, "") => out.to_owned(),
            ("", err) => err.to_owned(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Runs command lines through `sh -c`, prefixed with the environment
/// initialisation every external tool of the calibration chain needs.
#[derive(Debug, Clone, Default)]
pub struct Shell {
    init_env: String,
    timeout: Option<Duration>,
    work_dir: Option<PathBuf>,
}

impl Shell {
    pub fn new(init_env: impl Into<String>) -> Self {
        Self {
            init_env: init_env.into(),
            timeout: None,
            work_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn in_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.work_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn init_env(&self) -> &str {
        &self.init_env
    }

    /// full script handed to the shell for `command`
    pub fn script(&self, command: &str) -> String {
        format!("{}{}", self.init_env, command)
    }

    pub fn run(&self, command: &str) -> Result<CommandOutput, ShellError> {
        self.execute(command, None)
    }

    pub fn run_with_input(&self, command: &str, input: &str) -> Result<CommandOutput, ShellError> {
        self.execute(command, Some(input))
    }

    #[tracing::instrument(level = "debug", skip(self, input))]
    fn execute(&self, command: &str, input: Option<&str>) -> Result<CommandOutput, ShellError> {
        let script = self.script(command);
        let mut builder = Command::new("sh");

        builder
            .arg("-c")
            .arg(&script)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = self.work_dir {
            builder.current_dir(dir);
        }

        debug!(script = %script, "Spawning shell");
        let start = Instant::now();
        let mut child = builder.spawn().map_err(ShellError::Spawn)?;

        // Both pipes are drained on their own threads, otherwise a chatty child
        // fills the pipe buffer and never exits while we wait on it.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), input) {
            match stdin.write_all(input.as_bytes()) {
                Ok(()) => {}
                // the child exited without reading everything, its status tells the rest
                Err(error) if error.kind() == ErrorKind::BrokenPipe => {
                    debug!(pid = child.id(), "Child closed its standard input early")
                }
                Err(error) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ShellError::Stdin(error));
                }
            }
            // closing stdin gives the child a clear end of input
            drop(stdin);
        }

        let status = match self.timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => status,
                None => {
                    debug!(pid = child.id(), "Command ran into timeout, killing it");
                    child.kill()?;
                    child.wait()?;

                    return Err(ShellError::Timeout(timeout));
                }
            },
            None => child.wait()?,
        };

        let output = CommandOutput {
            status: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
            runtime: start.elapsed(),
        };

        debug!(
            status = ?output.status,
            runtime_ms = output.runtime.as_millis() as u64,
            "Command finished"
        );
        trace!(stdout = %output.stdout, stderr = %output.stderr, "Command output");

        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        // a broken pipe only means the child went away, keep what was read
        let _ = pipe.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default()
}

/// quote a single word for `sh`
pub fn quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/_-.,:=+@%".contains(c))
    {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
