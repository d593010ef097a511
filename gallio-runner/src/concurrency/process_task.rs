// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ExitInfo, Task, TaskCore, TaskFailure, TaskValue};
use crate::helpers::lock;
use camino::Utf8PathBuf;
use std::{
    fmt, io,
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, mpsc as std_mpsc},
    thread,
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// How long to keep reading output after a process exits, by default.
pub const DEFAULT_LEAK_TIMEOUT: Duration = Duration::from_millis(100);

/// A callback invoked for each line a process writes.
pub type LineHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Which output stream a line came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Builds a [`ProcessTask`].
#[derive(Clone)]
pub struct ProcessTaskBuilder {
    name: Option<String>,
    program: String,
    args: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    // `None` removes the variable.
    env: Vec<(String, Option<String>)>,
    capture_output: bool,
    echo_to_log: bool,
    on_stdout: Option<LineHandler>,
    on_stderr: Option<LineHandler>,
    leak_timeout: Duration,
}

impl fmt::Debug for ProcessTaskBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTaskBuilder")
            .field("name", &self.name)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("capture_output", &self.capture_output)
            .field("echo_to_log", &self.echo_to_log)
            .field("leak_timeout", &self.leak_timeout)
            .finish_non_exhaustive()
    }
}

impl ProcessTaskBuilder {
    /// Starts building a task that runs `program`. Output is captured by default.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            name: None,
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            capture_output: true,
            echo_to_log: false,
            on_stdout: None,
            on_stderr: None,
            leak_timeout: DEFAULT_LEAK_TIMEOUT,
        }
    }

    /// Sets the task's name. Defaults to the program.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn current_dir(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), Some(value.into())));
        self
    }

    /// Removes an environment variable inherited from this process.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env.push((key.into(), None));
        self
    }

    /// Whether to keep the process's output, for [`ProcessTask::console_output`] and
    /// [`ProcessTask::console_error`].
    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Whether to write each line of output to the log.
    pub fn echo_to_log(mut self, echo: bool) -> Self {
        self.echo_to_log = echo;
        self
    }

    /// Sets a callback invoked for each line written to standard output.
    pub fn on_stdout_line(mut self, handler: LineHandler) -> Self {
        self.on_stdout = Some(handler);
        self
    }

    /// Sets a callback invoked for each line written to standard error.
    pub fn on_stderr_line(mut self, handler: LineHandler) -> Self {
        self.on_stderr = Some(handler);
        self
    }

    /// Sets how long to wait for the output pipes to close once the process has exited.
    ///
    /// Subprocesses that inherited the pipes can keep them open after the process itself has
    /// exited or been killed. Past this timeout, the remaining output is discarded and the
    /// process is reported as leaky.
    pub fn leak_timeout(mut self, timeout: Duration) -> Self {
        self.leak_timeout = timeout;
        self
    }

    /// Builds the task. It doesn't run until started.
    pub fn build(self) -> ProcessTask {
        let name = self.name.clone().unwrap_or_else(|| self.program.clone());
        ProcessTask {
            core: Arc::new(TaskCore::new(name)),
            spec: Mutex::new(Some(self)),
            control: Mutex::new(None),
            shared: Arc::new(Shared::default()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Control {
    Kill,
    Interrupt,
}

#[derive(Debug, Default)]
struct Shared {
    stdout: Mutex<String>,
    stderr: Mutex<String>,
    exit: Mutex<Option<ExitInfo>>,
}

/// A task that runs an OS process.
///
/// The process is supervised by a helper thread. Aborting the task kills the process, and
/// interrupting it sends `SIGINT` on Unix. The task terminates once the process has exited and
/// its output has been fully read.
pub struct ProcessTask {
    core: Arc<TaskCore>,
    spec: Mutex<Option<ProcessTaskBuilder>>,
    control: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    shared: Arc<Shared>,
}

impl fmt::Debug for ProcessTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTask")
            .field("core", &self.core)
            .field("exit", &self.exit_info())
            .finish_non_exhaustive()
    }
}

impl ProcessTask {
    /// Starts building a task that runs `program`.
    pub fn builder(program: impl Into<String>) -> ProcessTaskBuilder {
        ProcessTaskBuilder::new(program)
    }

    /// How the process exited, or `None` if it hasn't exited yet.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *lock(&self.shared.exit)
    }

    /// The process's exit code, or `None` if it hasn't exited yet or was killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_info().and_then(|exit| exit.code)
    }

    /// The captured standard output.
    pub fn console_output(&self) -> String {
        lock(&self.shared.stdout).clone()
    }

    /// The captured standard error.
    pub fn console_error(&self) -> String {
        lock(&self.shared.stderr).clone()
    }

    fn send(&self, control: Control) {
        if let Some(sender) = lock(&self.control).as_ref() {
            // The supervisor is gone once the process has exited.
            let _ = sender.send(control);
        }
    }
}

impl Task for ProcessTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn start_impl(&self) -> Result<(), TaskFailure> {
        let Some(spec) = lock(&self.spec).take() else {
            return Ok(());
        };
        let (spawned_tx, spawned_rx) = std_mpsc::channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let core = self.core.clone();
        let shared = self.shared.clone();

        thread::Builder::new()
            .name(format!("{}-supervisor", self.core.name()))
            .spawn(move || supervise(spec, core, shared, spawned_tx, control_rx))
            .map_err(|error| TaskFailure::Spawn(Arc::new(error)))?;

        match spawned_rx.recv() {
            Ok(Ok(())) => {
                *lock(&self.control) = Some(control_tx);
                Ok(())
            }
            Ok(Err(error)) => Err(TaskFailure::Spawn(Arc::new(error))),
            Err(_) => Err(TaskFailure::Spawn(Arc::new(io::Error::other(
                "process supervisor exited before spawning the process",
            )))),
        }
    }

    fn abort_impl(&self) {
        self.send(Control::Kill);
    }

    fn interrupt_impl(&self) {
        self.send(Control::Interrupt);
    }
}

fn supervise(
    spec: ProcessTaskBuilder,
    core: Arc<TaskCore>,
    shared: Arc<Shared>,
    spawned_tx: std_mpsc::Sender<io::Result<()>>,
    control_rx: mpsc::UnboundedReceiver<Control>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            let _ = spawned_tx.send(Err(error));
            return;
        }
    };

    let supervised_core = core.clone();
    let result = runtime.block_on(async move {
        let core = supervised_core;
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            match value {
                Some(value) => command.env(key, value),
                None => command.env_remove(key),
            };
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                let _ = spawned_tx.send(Err(error));
                return None;
            }
        };
        debug!(task = %core.name(), pid = ?child.id(), "spawned process");
        let _ = spawned_tx.send(Ok(()));

        let sink = |stream| LineSink::new(&spec, &core, &shared, stream);
        let readers = [
            child
                .stdout
                .take()
                .map(|stdout| tokio::spawn(read_lines(stdout, sink(OutputStream::Stdout)))),
            child
                .stderr
                .take()
                .map(|stderr| tokio::spawn(read_lines(stderr, sink(OutputStream::Stderr)))),
        ];

        let (status, killed) = wait(&mut child, control_rx).await;
        drain_output(core.name(), readers.into_iter().flatten(), spec.leak_timeout).await;
        Some(match status {
            Ok(status) => {
                let exit = exit_info(status);
                *lock(&shared.exit) = Some(exit);
                if killed {
                    Err(TaskFailure::Aborted)
                } else {
                    Ok(TaskValue::Exited(exit))
                }
            }
            Err(error) => Err(TaskFailure::Error(Arc::new(error))),
        })
    });

    // On spawn failure, the starting thread terminates the task.
    if let Some(result) = result {
        core.notify_terminated(result);
    }
}

/// Waits for the child to exit while handling control messages. Returns whether the child was
/// killed.
async fn wait(
    child: &mut Child,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
) -> (io::Result<ExitStatus>, bool) {
    let mut killed = false;
    let mut control_open = true;
    loop {
        tokio::select! {
            status = child.wait() => return (status, killed),
            control = control_rx.recv(), if control_open => match control {
                Some(Control::Kill) => {
                    killed = true;
                    let _ = child.start_kill();
                }
                Some(Control::Interrupt) => interrupt(child),
                None => {
                    // The task was dropped.
                    control_open = false;
                    let _ = child.start_kill();
                }
            },
        }
    }
}

/// Waits for the output readers to finish, up to `leak_timeout` after the process exited.
async fn drain_output(
    task: &str,
    readers: impl IntoIterator<Item = JoinHandle<()>>,
    leak_timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + leak_timeout;
    let mut leaked = false;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            reader.abort();
            leaked = true;
        }
    }
    if leaked {
        warn!(
            task = %task,
            "process leaked: its output was still open {leak_timeout:?} after it exited"
        );
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) {
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };

    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        if let Err(error) = kill(pid, Signal::SIGINT) {
            warn!("failed to interrupt process {pid}: {error}");
        }
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) {
    let _ = child.start_kill();
}

fn exit_info(status: ExitStatus) -> ExitInfo {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    ExitInfo {
        code: status.code(),
        signal,
    }
}

struct LineSink {
    task: String,
    stream: OutputStream,
    buffer: Option<Arc<Shared>>,
    echo_to_log: bool,
    handler: Option<LineHandler>,
}

impl LineSink {
    fn new(
        spec: &ProcessTaskBuilder,
        core: &TaskCore,
        shared: &Arc<Shared>,
        stream: OutputStream,
    ) -> Self {
        let handler = match stream {
            OutputStream::Stdout => spec.on_stdout.clone(),
            OutputStream::Stderr => spec.on_stderr.clone(),
        };
        Self {
            task: core.name().to_owned(),
            stream,
            buffer: spec.capture_output.then(|| shared.clone()),
            echo_to_log: spec.echo_to_log,
            handler,
        }
    }

    fn line(&self, line: &str) {
        if let Some(shared) = &self.buffer {
            let mut buffer = match self.stream {
                OutputStream::Stdout => lock(&shared.stdout),
                OutputStream::Stderr => lock(&shared.stderr),
            };
            buffer.push_str(line);
            buffer.push('\n');
        }
        if self.echo_to_log {
            match self.stream {
                OutputStream::Stdout => info!(target: "gallio::process", task = %self.task, "{line}"),
                OutputStream::Stderr => warn!(target: "gallio::process", task = %self.task, "{line}"),
            }
        }
        if let Some(handler) = &self.handler {
            handler(line);
        }
    }
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R, sink: LineSink) {
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(mut segment)) => {
                if segment.last() == Some(&b'\r') {
                    segment.pop();
                }
                sink.line(&String::from_utf8_lossy(&segment));
            }
            Ok(None) => break,
            Err(error) => {
                warn!(
                    task = %sink.task,
                    stream = ?sink.stream,
                    "error reading process output: {error}"
                );
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> ProcessTaskBuilder {
        ProcessTask::builder("sh").arg("-c").arg(script)
    }

    #[test]
    fn captures_output_and_exit_code() {
        let task = sh("echo hello; echo oops >&2; exit 3").build();
        assert_eq!(task.exit_code(), None);
        let result = task.run(Some(Duration::from_secs(30)));
        let Ok(TaskValue::Exited(exit)) = result else {
            panic!("unexpected result: {result:?}");
        };
        assert_eq!(exit.code, Some(3));
        assert_eq!(task.exit_code(), Some(3));
        assert_eq!(task.console_output(), "hello\n");
        assert_eq!(task.console_error(), "oops\n");
    }

    #[test]
    fn environment_and_working_directory() {
        let dir = camino_tempfile::tempdir().unwrap();
        let task = sh("echo \"$GALLIO_GREETING\"; pwd; echo \"${HOME:-unset}\"")
            .env("GALLIO_GREETING", "hi")
            .env_remove("HOME")
            .current_dir(dir.path())
            .build();
        assert!(task.run(None).is_ok());
        let output = task.console_output();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], "hi");
        assert_eq!(
            std::fs::canonicalize(lines[1]).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
        assert_eq!(lines[2], "unset");
    }

    #[test]
    fn line_callbacks_without_capture() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let lines2 = lines.clone();
        let task = sh("printf 'a\\nb\\r\\nc'")
            .capture_output(false)
            .on_stdout_line(Arc::new(move |line: &str| lock(&lines2).push(line.to_owned())))
            .build();
        assert!(task.run(None).is_ok());
        assert_eq!(*lock(&lines), ["a", "b", "c"]);
        assert_eq!(task.console_output(), "");
    }

    #[test]
    fn spawn_failure() {
        let task = ProcessTask::builder("/nonexistent/gallio-test-program").build();
        task.start();
        assert!(task.is_terminated());
        assert!(matches!(task.result(), Some(Err(TaskFailure::Spawn(_)))));
    }

    #[test]
    fn abort_kills_process() {
        let task = ProcessTask::builder("sleep").arg("60").build();
        task.start();
        assert!(task.is_running());
        task.abort();
        assert!(task.join(Some(Duration::from_secs(30))));
        assert!(matches!(task.result(), Some(Err(TaskFailure::Aborted))));
        assert_eq!(task.exit_info().and_then(|exit| exit.signal), Some(libc::SIGKILL));
    }

    #[test]
    fn abort_with_leaked_output_pipe() {
        // The backgrounded sleep keeps stdout open after the shell is killed.
        let task = sh("sleep 20 & echo started; wait")
            .leak_timeout(Duration::from_millis(200))
            .build();
        task.start();
        thread::sleep(Duration::from_millis(200));
        let start = std::time::Instant::now();
        task.abort();
        assert!(task.join(Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(matches!(task.result(), Some(Err(TaskFailure::Aborted))));
    }

    #[test]
    fn exit_with_leaked_output_pipe() {
        let task = sh("sleep 20 & exit 0").build();
        let result = task.run(Some(Duration::from_secs(10)));
        assert!(
            matches!(result, Ok(TaskValue::Exited(ExitInfo { code: Some(0), .. }))),
            "unexpected result: {result:?}"
        );
    }

    #[test]
    fn interrupt_sends_sigint() {
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        let task = sh("trap 'exit 7' INT; echo ready; while true; do sleep 0.1; done")
            .on_stdout_line(Arc::new(move |_: &str| {
                let _ = lock(&tx).send(());
            }))
            .build();
        task.start();
        rx.recv_timeout(Duration::from_secs(30)).unwrap();
        task.interrupt();
        assert!(task.join(Some(Duration::from_secs(30))));
        assert_eq!(task.exit_code(), Some(7));
    }
}
