//! Process session
//!
//! Drives one child process through its lifecycle: spawn with stderr merged
//! into stdout, pump the output through a line assembler into records,
//! forward input, observe exit, and kill on request.
//!
//! # Threads
//!
//! ```text
//! caller ── start / stop / send_input ──┐
//!                                       ├── active: Mutex<Option<ActiveRun>>
//! reader thread ── read, poll exit ─────┘
//!                  └── RunContext (log mutex) ── SessionSink
//! ```
//!
//! Lock order is always `active` then the run log. Both the reader and
//! `stop` finish a run through `RunContext::complete`, which delivers the
//! outcome at most once.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::buffer::{push_bounded, DEFAULT_MAX_LINES};
use super::command::tokenize;
use super::lines::{LineAssembler, Utf8Decoder};
use super::record::{ExecutionOutcome, OutputRecord, RunEnding, START_FAILED_EXIT_CODE};

/// Exit code reported when the OS gives none
pub const UNKNOWN_EXIT_CODE: i32 = -1;

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

/// How often the reader checks for exit after end of output
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 4096;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A process is already running in this session")]
    AlreadyRunning,
}

/// Session events, for sinks backed by a channel
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// One assembled line
    Record(OutputRecord),
    /// The run is over
    Finished(ExecutionOutcome),
}

/// Receives the output of a run.
///
/// Called from the reader thread as well as from the caller's thread.
/// Implementations must not call back into the session synchronously.
pub trait SessionSink: Send + Sync {
    fn on_record(&self, record: OutputRecord);
    fn on_outcome(&self, outcome: ExecutionOutcome);
}

impl SessionSink for Sender<SessionEvent> {
    fn on_record(&self, record: OutputRecord) {
        let _ = self.send(SessionEvent::Record(record));
    }

    fn on_outcome(&self, outcome: ExecutionOutcome) {
        let _ = self.send(SessionEvent::Finished(outcome));
    }
}

/// Sink built from a pair of closures
pub struct FnSink<R, O> {
    on_record: R,
    on_outcome: O,
}

impl<R, O> FnSink<R, O>
where
    R: Fn(OutputRecord) + Send + Sync,
    O: Fn(ExecutionOutcome) + Send + Sync,
{
    pub fn new(on_record: R, on_outcome: O) -> Self {
        Self {
            on_record,
            on_outcome,
        }
    }
}

impl<R, O> SessionSink for FnSink<R, O>
where
    R: Fn(OutputRecord) + Send + Sync,
    O: Fn(ExecutionOutcome) + Send + Sync,
{
    fn on_record(&self, record: OutputRecord) {
        (self.on_record)(record)
    }

    fn on_outcome(&self, outcome: ExecutionOutcome) {
        (self.on_outcome)(outcome)
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Records kept for the outcome of one run (oldest dropped first)
    pub retained_records: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retained_records: DEFAULT_MAX_LINES,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RunLog {
    records: VecDeque<OutputRecord>,
    assembler: LineAssembler,
    finished: bool,
}

/// State of one run shared by the reader thread and the control path
struct RunContext {
    id: u64,
    sink: Arc<dyn SessionSink>,
    retained: usize,
    /// Set by `stop`; the reader quits at its next check
    cancelled: AtomicBool,
    log: Mutex<RunLog>,
}

impl RunContext {
    fn new(id: u64, sink: Arc<dyn SessionSink>, retained: usize) -> Self {
        Self {
            id,
            sink,
            retained: retained.max(1),
            cancelled: AtomicBool::new(false),
            log: Mutex::new(RunLog {
                records: VecDeque::new(),
                assembler: LineAssembler::new(),
                finished: false,
            }),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Deliver under the log lock so order and finality hold
    fn deliver(&self, log: &mut RunLog, record: OutputRecord) {
        if log.finished {
            return;
        }
        push_bounded(&mut log.records, record.clone(), self.retained);
        self.sink.on_record(record);
    }

    fn emit(&self, record: OutputRecord) {
        let mut log = lock(&self.log);
        self.deliver(&mut log, record);
    }

    /// Feed decoded child output, emitting each completed line
    fn emit_output(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut log = lock(&self.log);
        let mut lines = Vec::new();
        log.assembler.push_str(text, |line| lines.push(line));
        for line in lines {
            self.deliver(&mut log, OutputRecord::stdout(line));
        }
    }

    /// End of stream: emit the trailing partial line
    fn finish_output(&self) {
        let mut log = lock(&self.log);
        if let Some(line) = log.assembler.finish() {
            self.deliver(&mut log, OutputRecord::stdout(line));
        }
    }

    /// Echo input, after any pending prompt text
    fn echo_input(&self, text: &str) {
        let mut log = lock(&self.log);
        if let Some(prompt) = log.assembler.take_partial() {
            self.deliver(&mut log, OutputRecord::stdout(prompt));
        }
        self.deliver(&mut log, OutputRecord::stdin(text));
    }

    /// Emit the final record and the outcome. Returns false if the run
    /// was already finished.
    fn complete(&self, last: OutputRecord, exit_code: i32, ending: RunEnding) -> bool {
        let mut log = lock(&self.log);
        if log.finished {
            return false;
        }
        self.deliver(&mut log, last);
        log.finished = true;

        let records = log.records.drain(..).collect();
        self.sink.on_outcome(ExecutionOutcome {
            exit_code,
            ending,
            records,
        });
        true
    }
}

/// The live process of a session
struct ActiveRun {
    child: Child,
    stdin: Option<Arc<Mutex<ChildStdin>>>,
    ctx: Arc<RunContext>,
}

/// Owns at most one child process at a time
pub struct ProcessSession {
    active: Arc<Mutex<Option<ActiveRun>>>,
    options: SessionOptions,
    next_run: AtomicU64,
}

impl Default for ProcessSession {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl ProcessSession {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            active: Arc::new(Mutex::new(None)),
            options,
            next_run: AtomicU64::new(1),
        }
    }

    /// Start `command` in `working_dir`.
    ///
    /// Returns the run id as soon as the process is spawned; the outcome
    /// arrives later through `sink`. A spawn failure is not an error here:
    /// it is reported to the sink as a record plus a `StartFailed` outcome.
    ///
    /// # Errors
    ///
    /// `SessionError::AlreadyRunning` if this session still holds a process.
    pub fn start(
        &self,
        command: &str,
        working_dir: &Path,
        sink: Arc<dyn SessionSink>,
    ) -> Result<u64, SessionError> {
        let mut active = lock(&self.active);
        if active.is_some() {
            return Err(SessionError::AlreadyRunning);
        }

        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::new(RunContext::new(id, sink, self.options.retained_records));
        ctx.emit(OutputRecord::system("Starting process..."));

        let (mut child, output) = match spawn_merged(command, working_dir) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!("Run {}: failed to start {:?}: {}", id, command, e);
                ctx.complete(
                    OutputRecord::stderr(format!("Failed to start process: {}", e)),
                    START_FAILED_EXIT_CODE,
                    RunEnding::StartFailed,
                );
                return Ok(id);
            }
        };
        info!("Run {}: started {:?} (pid {})", id, command, child.id());

        let reader = thread::Builder::new()
            .name(format!("runpane-reader-{}", id))
            .spawn({
                let active = Arc::clone(&self.active);
                let ctx = Arc::clone(&ctx);
                move || read_output(output, &ctx, &active)
            });

        if let Err(e) = reader {
            warn!("Run {}: failed to spawn reader thread: {}", id, e);
            let _ = child.kill();
            let _ = child.wait();
            ctx.complete(
                OutputRecord::stderr(format!("Failed to start process: {}", e)),
                START_FAILED_EXIT_CODE,
                RunEnding::StartFailed,
            );
            return Ok(id);
        }

        // The reader cannot observe `active` before this: we hold the lock
        let stdin = child.stdin.take().map(|s| Arc::new(Mutex::new(s)));
        *active = Some(ActiveRun { child, stdin, ctx });
        Ok(id)
    }

    /// Kill the running process and its process group. No-op when idle.
    pub fn stop(&self) {
        let Some(mut run) = lock(&self.active).take() else {
            return;
        };

        run.ctx.cancelled.store(true, Ordering::SeqCst);
        drop(run.stdin.take());

        if let Err(e) = kill_process_tree(&mut run.child) {
            debug!("Run {}: kill failed: {}", run.ctx.id, e);
        }
        let exit_code = match run.child.wait() {
            Ok(status) => exit_code(status),
            Err(_) => UNKNOWN_EXIT_CODE,
        };

        info!("Run {}: terminated by user", run.ctx.id);
        run.ctx.complete(
            OutputRecord::system("Process terminated by user"),
            exit_code,
            RunEnding::Terminated,
        );
    }

    /// Write `text` and a line terminator to the child. No-op when idle.
    pub fn send_input(&self, text: &str) {
        let (stdin, ctx) = {
            let mut active = lock(&self.active);
            let Some(run) = active.as_mut() else {
                return;
            };
            if !matches!(run.child.try_wait(), Ok(None)) {
                return;
            }
            (run.stdin.clone(), Arc::clone(&run.ctx))
        };

        ctx.echo_input(text);

        let result = match stdin {
            Some(stdin) => {
                let mut stdin = lock(&stdin);
                stdin
                    .write_all(text.as_bytes())
                    .and_then(|()| stdin.write_all(LINE_ENDING.as_bytes()))
                    .and_then(|()| stdin.flush())
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed")),
        };

        if let Err(e) = result {
            warn!("Run {}: failed to send input: {}", ctx.id, e);
            ctx.emit(OutputRecord::stderr(format!("Failed to send input: {}", e)));
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    pub fn state(&self) -> SessionState {
        if self.is_running() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn with stdout and stderr sharing one pipe
fn spawn_merged(command: &str, working_dir: &Path) -> io::Result<(Child, io::PipeReader)> {
    let tokens = tokenize(command);
    let (program, args) = tokens
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

    if !working_dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("working directory {} does not exist", working_dir.display()),
        ));
    }

    let (output, writer) = io::pipe()?;
    let error_writer = writer.try_clone()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(writer)
        .stderr(error_writer);

    // Own process group, so `stop` reaches everything holding the pipe
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let child = cmd.spawn()?;

    // Our copies of the write end live in `cmd`; EOF needs them closed
    drop(cmd);
    Ok((child, output))
}

/// Force-kill the child and, on Unix, every process in its group
fn kill_process_tree(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match i32::try_from(child.id()) {
            Ok(pgid) => match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                Ok(()) => return Ok(()),
                Err(e) => debug!("killpg({}) failed: {}", pgid, e),
            },
            Err(_) => debug!("pid {} out of range for a process group", child.id()),
        }
    }
    child.kill()
}

/// Reader thread body
fn read_output(mut output: impl Read, ctx: &Arc<RunContext>, active: &Mutex<Option<ActiveRun>>) {
    let mut decoder = Utf8Decoder::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut text = String::with_capacity(READ_CHUNK);

    loop {
        if ctx.is_cancelled() {
            debug!("Run {}: reader cancelled", ctx.id);
            return;
        }

        match output.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                text.clear();
                decoder.decode(&buffer[..n], &mut text);
                ctx.emit_output(&text);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !ctx.is_cancelled() {
                    warn!("Run {}: error reading output: {}", ctx.id, e);
                    ctx.emit(OutputRecord::stderr(format!("Error reading output: {}", e)));
                }
                break;
            }
        }
    }

    text.clear();
    decoder.finish(&mut text);
    ctx.emit_output(&text);
    ctx.finish_output();
    drop(output);

    let Some(status) = wait_for_exit(ctx, active) else {
        debug!("Run {}: stopped before exit was observed", ctx.id);
        return;
    };

    let exit_code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!("Run {}: failed to wait for exit: {}", ctx.id, e);
            UNKNOWN_EXIT_CODE
        }
    };
    info!("Run {}: exited with code {}", ctx.id, exit_code);

    let notice = if exit_code == 0 {
        format!("Process completed successfully (exit code: {})", exit_code)
    } else {
        format!("Process exited with code: {}", exit_code)
    };
    ctx.complete(OutputRecord::system(notice), exit_code, RunEnding::Completed);
}

/// Poll until the child exits, releasing it from `active`.
///
/// Returns `None` if the run was taken over by `stop`.
fn wait_for_exit(
    ctx: &Arc<RunContext>,
    active: &Mutex<Option<ActiveRun>>,
) -> Option<io::Result<ExitStatus>> {
    loop {
        {
            let mut guard = lock(active);
            let run = guard.as_mut().filter(|run| Arc::ptr_eq(&run.ctx, ctx))?;

            match run.child.try_wait() {
                Ok(Some(status)) => {
                    guard.take();
                    return Some(Ok(status));
                }
                Ok(None) => {}
                Err(e) => {
                    if let Some(mut run) = guard.take() {
                        let _ = run.child.kill();
                        let _ = run.child.wait();
                    }
                    return Some(Err(e));
                }
            }
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT_CODE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::OutputKind;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn collect(rx: &Receiver<SessionEvent>) -> (Vec<OutputRecord>, ExecutionOutcome) {
        let mut records = Vec::new();
        loop {
            match rx.recv_timeout(TIMEOUT).expect("session produced no outcome") {
                SessionEvent::Record(record) => records.push(record),
                SessionEvent::Finished(outcome) => return (records, outcome),
            }
        }
    }

    fn run(session: &ProcessSession, command: &str, dir: &Path) -> (Vec<OutputRecord>, ExecutionOutcome) {
        let (tx, rx) = mpsc::channel();
        session.start(command, dir, Arc::new(tx)).unwrap();
        collect(&rx)
    }

    fn texts(records: &[OutputRecord], kind: OutputKind) -> Vec<&str> {
        records
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.text.as_str())
            .collect()
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("script.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    #[cfg(unix)]
    fn test_echo_hello() {
        let dir = tempfile::tempdir().unwrap();
        let session = ProcessSession::default();
        let (records, outcome) = run(&session, "echo hello", dir.path());

        let kinds: Vec<OutputKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![OutputKind::System, OutputKind::Stdout, OutputKind::System]);
        assert_eq!(texts(&records, OutputKind::Stdout), vec!["hello"]);
        assert_eq!(records[2].text, "Process completed successfully (exit code: 0)");

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.ending, RunEnding::Completed);
        assert_eq!(outcome.records, records);
        assert!(!session.is_running());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let session = ProcessSession::default();
        let (records, outcome) = run(&session, "runpane-no-such-program --flag", dir.path());

        assert_eq!(outcome.exit_code, START_FAILED_EXIT_CODE);
        assert_eq!(outcome.ending, RunEnding::StartFailed);
        assert!(texts(&records, OutputKind::Stdout).is_empty());

        let errors = texts(&records, OutputKind::Stderr);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Failed to start process:"));
        assert!(!session.is_running());
    }

    #[test]
    fn test_missing_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let session = ProcessSession::default();
        let (records, outcome) = run(&session, "echo hi", &missing);

        assert_eq!(outcome.ending, RunEnding::StartFailed);
        assert!(texts(&records, OutputKind::Stderr)[0].contains("does not exist"));
    }

    #[test]
    fn test_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let session = ProcessSession::default();
        let (_, outcome) = run(&session, "   ", dir.path());
        assert_eq!(outcome.ending, RunEnding::StartFailed);
    }

    #[test]
    fn test_idle_operations_are_noops() {
        let session = ProcessSession::default();
        session.send_input("ignored");
        session.stop();
        session.stop();
        assert!(!session.is_running());
    }

    #[test]
    #[cfg(unix)]
    fn test_exit_code_and_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "printf 'first\\nno newline'\nexit 3\n");
        let session = ProcessSession::default();
        let (records, outcome) = run(&session, &format!("sh {}", script.display()), dir.path());

        assert_eq!(texts(&records, OutputKind::Stdout), vec!["first", "no newline"]);
        assert_eq!(records.last().unwrap().text, "Process exited with code: 3");
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.success());
    }

    #[test]
    #[cfg(unix)]
    fn test_stderr_is_merged_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo out\necho err >&2\necho again\n");
        let session = ProcessSession::default();
        let (records, _) = run(&session, &format!("sh {}", script.display()), dir.path());

        assert_eq!(texts(&records, OutputKind::Stdout), vec!["out", "err", "again"]);
        assert!(texts(&records, OutputKind::Stderr).is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn test_line_breaks_from_child() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "printf 'a\\r\\nb\\rc\\n\\nd'\n");
        let session = ProcessSession::default();
        let (records, _) = run(&session, &format!("sh {}", script.display()), dir.path());

        assert_eq!(texts(&records, OutputKind::Stdout), vec!["a", "b", "c", "", "d"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_send_input() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "read name\necho \"Hello $name\"\n");
        let session = ProcessSession::default();
        let (tx, rx) = mpsc::channel();
        session
            .start(&format!("sh {}", script.display()), dir.path(), Arc::new(tx))
            .unwrap();

        session.send_input("World");
        let (records, outcome) = collect(&rx);

        assert_eq!(texts(&records, OutputKind::Stdin), vec!["World"]);
        assert_eq!(texts(&records, OutputKind::Stdout), vec!["Hello World"]);
        let echo = records.iter().position(|r| r.kind == OutputKind::Stdin).unwrap();
        let reply = records.iter().position(|r| r.kind == OutputKind::Stdout).unwrap();
        assert!(echo < reply);
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_double_start_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let session = ProcessSession::default();
        let (tx, rx) = mpsc::channel();
        session.start("sleep 30", dir.path(), Arc::new(tx.clone())).unwrap();

        let second = session.start("echo again", dir.path(), Arc::new(tx));
        assert!(matches!(second, Err(SessionError::AlreadyRunning)));
        assert!(session.is_running());

        session.stop();
        let (_, outcome) = collect(&rx);
        assert_eq!(outcome.ending, RunEnding::Terminated);
    }

    #[test]
    #[cfg(unix)]
    fn test_stop_unbounded_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "i=0\nwhile true; do i=$((i+1)); echo \"line $i\"; done\n",
        );
        let session = ProcessSession::default();
        let (tx, rx) = mpsc::channel();
        session
            .start(&format!("sh {}", script.display()), dir.path(), Arc::new(tx))
            .unwrap();

        // Wait until output is flowing
        loop {
            match rx.recv_timeout(TIMEOUT).unwrap() {
                SessionEvent::Record(r) if r.kind == OutputKind::Stdout => break,
                _ => {}
            }
        }

        session.stop();
        assert!(!session.is_running());

        let (records, outcome) = collect(&rx);
        let last = records.last().unwrap();
        assert_eq!(last.kind, OutputKind::System);
        assert_eq!(last.text, "Process terminated by user");
        assert_eq!(outcome.ending, RunEnding::Terminated);
        assert_eq!(outcome.exit_code, 128 + 9);

        // Nothing after the outcome
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        session.stop();
        assert!(rx.try_recv().is_err());
    }

    /// Wait for a stdout record with `text`, returning what came before it
    fn wait_for_line(rx: &Receiver<SessionEvent>, text: &str) -> Vec<OutputRecord> {
        let mut seen = Vec::new();
        loop {
            match rx.recv_timeout(TIMEOUT).expect("line never arrived") {
                SessionEvent::Record(r) if r.kind == OutputKind::Stdout && r.text == text => {
                    return seen;
                }
                SessionEvent::Record(r) => seen.push(r),
                SessionEvent::Finished(outcome) => panic!("run ended early: {:?}", outcome),
            }
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_stop_releases_reader_when_grandchild_holds_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "sleep 30 &\necho ready\nwhile true; do sleep 1; done\n",
        );
        let session = ProcessSession::default();
        let (tx, rx) = mpsc::channel();
        session
            .start(&format!("sh {}", script.display()), dir.path(), Arc::new(tx))
            .unwrap();
        wait_for_line(&rx, "ready");

        session.stop();
        let (_, outcome) = collect(&rx);
        assert_eq!(outcome.ending, RunEnding::Terminated);

        // The reader thread owns the last sender; it exits once the whole
        // group is gone and the pipe reports EOF
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(3)).unwrap_err(),
            RecvTimeoutError::Disconnected
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_send_input_to_closed_stdin_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exec 0<&-\necho ready\nsleep 5\n");
        let session = ProcessSession::default();
        let (tx, rx) = mpsc::channel();
        session
            .start(&format!("sh {}", script.display()), dir.path(), Arc::new(tx))
            .unwrap();
        wait_for_line(&rx, "ready");

        session.send_input("x");
        let next = || match rx.recv_timeout(TIMEOUT).unwrap() {
            SessionEvent::Record(r) => r,
            SessionEvent::Finished(outcome) => panic!("run ended early: {:?}", outcome),
        };
        let echo = next();
        assert_eq!((echo.kind, echo.text.as_str()), (OutputKind::Stdin, "x"));
        let error = next();
        assert_eq!(error.kind, OutputKind::Stderr);
        assert!(error.text.starts_with("Failed to send input:"), "{}", error.text);

        // A write failure does not end the run
        assert!(session.is_running());
        session.stop();
        let (_, outcome) = collect(&rx);
        assert_eq!(outcome.ending, RunEnding::Terminated);
    }

    /// Replays scripted read results, then reports end of stream
    struct ScriptedReader {
        reads: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_read_error_reported_before_exit_notice() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let ctx = Arc::new(RunContext::new(7, Arc::new(tx), 100));
        let (child, _output) = spawn_merged("true", dir.path()).unwrap();
        let active = Mutex::new(Some(ActiveRun {
            child,
            stdin: None,
            ctx: Arc::clone(&ctx),
        }));

        let reader = ScriptedReader {
            reads: VecDeque::from(vec![
                Ok(b"before\npart".to_vec()),
                Err(io::Error::from(io::ErrorKind::Interrupted)),
                Err(io::Error::other("device gone")),
                Ok(b"never read\n".to_vec()),
            ]),
        };
        read_output(reader, &ctx, &active);

        let (records, outcome) = collect(&rx);
        let seen: Vec<(OutputKind, &str)> = records.iter().map(|r| (r.kind, r.text.as_str())).collect();
        assert_eq!(
            seen,
            vec![
                (OutputKind::Stdout, "before"),
                (OutputKind::Stderr, "Error reading output: device gone"),
                (OutputKind::Stdout, "part"),
                (OutputKind::System, "Process completed successfully (exit code: 0)"),
            ]
        );
        assert_eq!(outcome.ending, RunEnding::Completed);
        assert!(lock(&active).is_none());
    }

    #[test]
    #[cfg(unix)]
    fn test_stop_racing_exit_completes_once() {
        let dir = tempfile::tempdir().unwrap();
        let session = ProcessSession::default();

        for _ in 0..20 {
            let (tx, rx) = mpsc::channel();
            session.start("true", dir.path(), Arc::new(tx)).unwrap();
            session.stop();

            let (_, outcome) = collect(&rx);
            assert!(matches!(outcome.ending, RunEnding::Completed | RunEnding::Terminated));

            thread::sleep(Duration::from_millis(50));
            let extra = rx.try_iter().filter(|e| matches!(e, SessionEvent::Finished(_))).count();
            assert_eq!(extra, 0);
            assert!(!session.is_running());
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_session_reusable_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let session = ProcessSession::default();
        let (first, _) = run(&session, "echo one", dir.path());
        let (second, _) = run(&session, "echo two", dir.path());

        assert_eq!(texts(&first, OutputKind::Stdout), vec!["one"]);
        assert_eq!(texts(&second, OutputKind::Stdout), vec!["two"]);
    }

    #[test]
    fn test_run_context_flushes_prompt_before_echo() {
        let (tx, rx) = mpsc::channel();
        let ctx = RunContext::new(1, Arc::new(tx), 100);
        ctx.emit_output("Name: ");
        ctx.echo_input("Ada");
        ctx.emit_output("Hi Ada\n");

        let records: Vec<(OutputKind, String)> = rx
            .try_iter()
            .filter_map(|e| match e {
                SessionEvent::Record(r) => Some((r.kind, r.text)),
                SessionEvent::Finished(_) => None,
            })
            .collect();
        assert_eq!(
            records,
            vec![
                (OutputKind::Stdout, "Name: ".to_string()),
                (OutputKind::Stdin, "Ada".to_string()),
                (OutputKind::Stdout, "Hi Ada".to_string()),
            ]
        );
    }

    #[test]
    fn test_run_context_completes_once() {
        let (tx, rx) = mpsc::channel();
        let ctx = RunContext::new(1, Arc::new(tx), 2);
        ctx.emit(OutputRecord::stdout("a"));
        ctx.emit(OutputRecord::stdout("b"));

        assert!(ctx.complete(OutputRecord::system("done"), 0, RunEnding::Completed));
        assert!(!ctx.complete(OutputRecord::system("again"), 1, RunEnding::Terminated));
        ctx.emit(OutputRecord::stdout("late"));

        let events: Vec<SessionEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        match &events[3] {
            SessionEvent::Finished(outcome) => {
                // Retention cap of two keeps the newest records
                let kept: Vec<&str> = outcome.records.iter().map(|r| r.text.as_str()).collect();
                assert_eq!(kept, vec!["b", "done"]);
            }
            other => panic!("expected outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_fn_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let records = Arc::clone(&seen);
            let outcomes = Arc::clone(&seen);
            FnSink::new(
                move |r: OutputRecord| lock(&records).push(r.text),
                move |o: ExecutionOutcome| lock(&outcomes).push(format!("exit {}", o.exit_code)),
            )
        };
        let ctx = RunContext::new(1, Arc::new(sink), 10);
        ctx.emit(OutputRecord::system("x"));
        ctx.complete(OutputRecord::system("y"), 4, RunEnding::Completed);

        assert_eq!(*lock(&seen), vec!["x", "y", "exit 4"]);
    }
}
