use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::error::{ProcmanError, Result};
use crate::printer::{column_width, Printer};

/// How long the loop waits for output before checking on the processes
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time processes get to exit after SIGTERM before they are killed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Result code when the run is interrupted with Ctrl-C
pub const INTERRUPTED_CODE: i32 = 130;

/// Result code when the supervisor itself receives SIGTERM
pub const TERMINATED_CODE: i32 = 143;

/// What a reader task forwards for one line of child output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Line(String),
    /// The line was not valid UTF-8
    DecodeError,
}

struct Supervised {
    name: String,
    command: String,
    quiet: bool,
    printer: Printer,
    child: Option<Child>,
    pid: Option<u32>,
    dead: bool,
}

/// Runs a group of shell commands and multiplexes their output.
///
/// The first process to exit decides the result code and takes the rest of
/// the group down with it: SIGTERM first, SIGKILL for anything still alive
/// once the grace period is over.
pub struct ProcessManager {
    processes: Vec<Supervised>,
    system: Printer,
    output: Box<dyn Write + Send>,
    grace_period: Duration,
    returncode: Option<i32>,
    terminating: bool,
    kill_deadline: Option<Instant>,
    killed: bool,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            system: Printer::system(0),
            output: Box::new(std::io::stdout()),
            grace_period: DEFAULT_GRACE_PERIOD,
            returncode: None,
            terminating: false,
            kill_deadline: None,
            killed: false,
        }
    }

    /// Send the multiplexed log somewhere other than stdout
    pub fn with_output(mut self, output: impl Write + Send + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Register a command. Nothing runs until [`ProcessManager::run`].
    ///
    /// Output of quiet processes is discarded and their name is marked.
    pub fn add_process(&mut self, name: impl Into<String>, command: impl Into<String>, quiet: bool) {
        let name = name.into();
        let name = if quiet { format!("{} (quiet)", name) } else { name };

        self.processes.push(Supervised {
            printer: Printer::new(name.clone(), 0),
            name,
            command: command.into(),
            quiet,
            child: None,
            pid: None,
            dead: false,
        });
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Start every process and supervise them until all have exited.
    ///
    /// Returns the exit code of the first process to exit (128 + signal
    /// number for a signal death), or 130 when interrupted before that.
    pub async fn run(&mut self) -> Result<i32> {
        if self.processes.is_empty() {
            return Ok(0);
        }

        self.init_printers();
        let mut sigterm = signal(SignalKind::terminate())?;
        let (tx, mut rx) = mpsc::unbounded_channel();

        if let Err(e) = self.spawn_all(&tx) {
            self.kill_survivors();
            return Err(e);
        }
        drop(tx);

        for index in 0..self.processes.len() {
            if let Some(pid) = self.processes[index].pid {
                self.print(index, &format!("started with pid {}", pid));
            }
        }

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut interrupted = false;
        let mut readers_done = false;

        loop {
            tokio::select! {
                message = rx.recv(), if !readers_done => match message {
                    Some((index, output)) => self.print_output(index, output),
                    None => readers_done = true,
                },
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = &mut ctrl_c, if !interrupted => {
                    interrupted = true;
                    self.system_print("SIGINT received");
                    self.returncode.get_or_insert(INTERRUPTED_CODE);
                    self.terminate();
                }
                _ = sigterm.recv(), if !interrupted => {
                    interrupted = true;
                    self.system_print("SIGTERM received");
                    self.returncode.get_or_insert(TERMINATED_CODE);
                    self.terminate();
                }
            }

            self.reap()?;
            self.enforce_deadline();

            if self.alive_count() == 0 {
                break;
            }
        }

        self.flush(&mut rx).await;

        let code = self.returncode.unwrap_or(0);
        log::debug!("All processes exited, result code {}", code);
        Ok(code)
    }

    /// Ask every process group that still has members to stop and arm the
    /// kill deadline. Groups are signalled even when their leader already
    /// exited. Calling it again while already shutting down does nothing.
    pub fn terminate(&mut self) -> bool {
        if self.terminating {
            return false;
        }
        self.terminating = true;

        self.system_print("sending SIGTERM to all processes");
        for index in 0..self.processes.len() {
            if let Some(pid) = self.live_group(index) {
                self.system_print(&format!("sending SIGTERM to pid {}", pid));
                signal_group(pid, libc::SIGTERM);
            }
        }

        self.kill_deadline = Some(Instant::now() + self.grace_period);
        true
    }

    fn init_printers(&mut self) {
        let width = column_width(self.processes.iter().filter(|p| !p.quiet).map(|p| p.name.as_str()));

        self.system = Printer::system(width);
        for process in &mut self.processes {
            process.printer = Printer::new(process.name.clone(), width);
        }
    }

    fn spawn_all(&mut self, tx: &UnboundedSender<(usize, Output)>) -> Result<()> {
        for (index, process) in self.processes.iter_mut().enumerate() {
            let mut command = Command::new("sh");
            // Fold stderr into stdout inside the shell so both share one pipe
            command
                .arg("-c")
                .arg(format!("exec 2>&1\n{}", process.command))
                .stdin(Stdio::null())
                .process_group(0)
                .kill_on_drop(true);

            if process.quiet {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            } else {
                command.stdout(Stdio::piped()).stderr(Stdio::null());
            }

            let mut child = command.spawn().map_err(|source| ProcmanError::Spawn {
                name: process.name.clone(),
                source,
            })?;
            log::debug!("Started {} ({:?})", process.name, process.command);

            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(pump(index, stdout, tx.clone()));
            }

            process.pid = child.id();
            process.child = Some(child);
        }
        Ok(())
    }

    /// Note processes that exited since the last pass
    fn reap(&mut self) -> Result<()> {
        for index in 0..self.processes.len() {
            let process = &mut self.processes[index];
            if process.dead {
                continue;
            }
            let status = match process.child.as_mut() {
                Some(child) => child.try_wait()?,
                None => None,
            };

            if let Some(status) = status {
                self.processes[index].dead = true;
                self.print(index, "process terminated");
                log::debug!("{} exited with {}", self.processes[index].name, status);

                if self.returncode.is_none() {
                    self.returncode = Some(exit_code(status));
                }
                self.terminate();
            }
        }
        Ok(())
    }

    fn enforce_deadline(&mut self) {
        match self.kill_deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.kill_deadline = None;
                self.killed = true;
                self.kill_survivors();
            }
            _ => {}
        }
    }

    fn kill_survivors(&mut self) {
        for index in 0..self.processes.len() {
            if let Some(pid) = self.live_group(index) {
                self.system_print(&format!("sending SIGKILL to pid {}", pid));
                signal_group(pid, libc::SIGKILL);
                let process = &mut self.processes[index];
                if let (false, Some(child)) = (process.dead, process.child.as_mut()) {
                    let _ = child.start_kill();
                }
            }
        }
    }

    /// Print whatever the readers still have buffered, until they go quiet
    async fn flush(&mut self, rx: &mut UnboundedReceiver<(usize, Output)>) {
        while let Ok(Some((index, output))) = tokio::time::timeout(POLL_INTERVAL, rx.recv()).await {
            self.print_output(index, output);
        }
    }

    /// Process group id of a spawned process while anything in the group lives
    fn live_group(&self, index: usize) -> Option<u32> {
        self.processes[index].pid.filter(|pid| group_exists(*pid))
    }

    /// A process counts until it has been reaped and its group is empty.
    /// Once SIGKILL went out only unreaped leaders count, since orphaned
    /// zombies can linger in a group until init collects them.
    fn alive_count(&self) -> usize {
        self.processes
            .iter()
            .filter(|p| p.child.is_some())
            .filter(|p| !p.dead || (!self.killed && p.pid.is_some_and(group_exists)))
            .count()
    }

    fn print_output(&mut self, index: usize, output: Output) {
        match output {
            Output::Line(line) => self.print(index, &line),
            Output::DecodeError => {
                let message = format!(
                    "UnicodeDecodeError while decoding line from process {}",
                    self.processes[index].name
                );
                self.system_print(&message);
            }
        }
    }

    fn print(&mut self, index: usize, line: &str) {
        let printer = &self.processes[index].printer;
        if let Err(e) = printer.write_line(&mut self.output, line) {
            log::warn!("Failed to write output of {}: {}", printer.name(), e);
        }
    }

    fn system_print(&mut self, line: &str) {
        if let Err(e) = self.system.write_line(&mut self.output, line) {
            log::warn!("Failed to write supervisor output: {}", e);
        }
    }
}

/// Forward a child's output to the supervisor line by line
async fn pump(index: usize, stdout: ChildStdout, tx: UnboundedSender<(usize, Output)>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                let output = match String::from_utf8(std::mem::take(&mut buf)) {
                    Ok(line) => Output::Line(line),
                    Err(_) => Output::DecodeError,
                };
                if tx.send((index, output)).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::debug!("Reader for process {} stopped: {}", index, e);
                break;
            }
        }
    }
}

/// Signal the process group `pgid`. An already empty group (ESRCH) is done.
fn signal_group(pgid: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return false;
    };

    // SAFETY: kill(2) has no memory safety requirements
    if unsafe { libc::kill(-pgid, signal) } == 0 {
        return true;
    }

    let error = std::io::Error::last_os_error();
    if error.raw_os_error() != Some(libc::ESRCH) {
        log::debug!("Failed to signal process group {}: {}", pgid, error);
    }
    false
}

/// Whether any process is left in the group `pgid`
fn group_exists(pgid: u32) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return false;
    };

    // SAFETY: signal 0 only checks for existence and permission
    if unsafe { libc::kill(-pgid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Exit code of a finished process, 128 + signal number for a signal death
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
