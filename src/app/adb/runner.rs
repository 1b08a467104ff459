use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

const LOCK_CONFLICT_HINTS: [&str; 2] = ["already running", "locked"];

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{argv}` exited with {}, output: {output}", exit_label(.exit_code))]
    Exit {
        argv: String,
        exit_code: Option<i32>,
        output: String,
    },
    #[error("`{argv}` timed out after {}s", .timeout.as_secs())]
    TimedOut { argv: String, timeout: Duration },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "no exit status (terminated by signal)".to_string(),
    }
}

impl CommandError {
    /// True when the process could not be launched because the AVD is held by
    /// another emulator instance.
    pub fn is_lock_conflict(&self) -> bool {
        let Self::Launch { source, .. } = self else {
            return false;
        };
        let message = source.to_string().to_lowercase();
        LOCK_CONFLICT_HINTS.iter().any(|hint| message.contains(hint))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// Live process started by [`HostCommand::spawn`].
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;
    fn has_exited(&mut self) -> bool;
    fn kill(&mut self) -> io::Result<()>;
    fn wait(&mut self) -> io::Result<Option<i32>>;
}

impl ProcessHandle for Child {
    fn pid(&self) -> Option<u32> {
        Some(self.id())
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.try_wait(), Ok(None))
    }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        Child::wait(self).map(|status| status.code())
    }
}

pub struct SpawnedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub stdout: Box<dyn Read + Send>,
    pub stderr: Box<dyn Read + Send>,
}

/// Description of an external program invocation.
///
/// The child inherits the full environment of this process. On Windows it is
/// started without a console window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: PathBuf,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl HostCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Bounds [`HostCommand::output`]. Has no effect on [`HostCommand::spawn`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn display(&self) -> String {
        self.argv().join(" ")
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }

    fn launch(&self) -> Result<Child, CommandError> {
        self.build().spawn().map_err(|source| CommandError::Launch {
            program: self.program.display().to_string(),
            source,
        })
    }

    /// Starts the process without waiting for it.
    pub fn spawn(&self) -> Result<SpawnedProcess, CommandError> {
        let mut child = self.launch()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CommandError::Io {
                context: "failed to capture process output",
                source: io::Error::new(io::ErrorKind::BrokenPipe, "missing stdio pipe"),
            });
        };
        Ok(SpawnedProcess {
            handle: Box::new(child),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        })
    }

    /// Runs the process to completion. A non-zero exit is an error carrying
    /// the captured output.
    pub fn output(&self) -> Result<CommandOutput, CommandError> {
        let mut child = self.launch()?;

        // Drain both pipes in parallel; a chatty child otherwise blocks once
        // the pipe buffer fills.
        let stdout_handle = child.stdout.take().map(drain);
        let stderr_handle = child.stderr.take().map(drain);

        let start = Instant::now();
        let exit_code = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status.code(),
                Ok(None) => {
                    if self.timeout.is_some_and(|timeout| start.elapsed() > timeout) {
                        let _ = child.kill();
                        let _ = child.wait();
                        join_drain(stdout_handle);
                        join_drain(stderr_handle);
                        return Err(CommandError::TimedOut {
                            argv: self.display(),
                            timeout: self.timeout.unwrap_or_default(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(source) => {
                    let _ = child.kill();
                    join_drain(stdout_handle);
                    join_drain(stderr_handle);
                    return Err(CommandError::Io {
                        context: "failed to poll command",
                        source,
                    });
                }
            }
        };

        let output = CommandOutput {
            stdout: join_drain(stdout_handle),
            stderr: join_drain(stderr_handle),
            exit_code,
        };
        if output.exit_code != Some(0) {
            return Err(CommandError::Exit {
                argv: self.display(),
                exit_code: output.exit_code,
                output: output.combined(),
            });
        }
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer);
        buffer
    })
}

fn join_drain(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Seam between the lifecycle controller and the operating system.
pub trait CommandExecutor: Send + Sync {
    fn spawn(&self, command: &HostCommand) -> Result<SpawnedProcess, CommandError>;
    fn run(&self, command: &HostCommand) -> Result<CommandOutput, CommandError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn spawn(&self, command: &HostCommand) -> Result<SpawnedProcess, CommandError> {
        command.spawn()
    }

    fn run(&self, command: &HostCommand) -> Result<CommandOutput, CommandError> {
        command.output()
    }
}
