//! Child process channel
//!
//! Wraps one external program started through the platform shell. Output is
//! read on background threads and delivered as [`ChildEvent`]s over a
//! channel, so reads never block the thread that drives the session.

use std::io::{self, Read, Write};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

/// How often the waiter thread checks whether the child has exited
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Default size of a single pipe read
pub const DEFAULT_READ_BUFFER: usize = 4096;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start I/O thread: {0}")]
    Thread(#[source] io::Error),

    #[error("Process input is closed")]
    StdinClosed,
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Identifies one spawned child for the lifetime of a session
pub type ChildId = u64;

/// Output stream of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Notifications from the background threads of a child
#[derive(Debug)]
pub enum ChildEvent {
    /// Bytes read from one of the output pipes
    Output {
        child: ChildId,
        stream: OutputStream,
        data: Vec<u8>,
    },
    /// The child has exited and been reaped. Sent after all of its output.
    Exited {
        child: ChildId,
        status: Option<ExitStatus>,
    },
}

/// Program and arguments used to run one command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl ShellCommand {
    /// `shell flag line`, e.g. `/bin/sh -c "ls -l"` or `cmd /C "dir"`
    pub fn new(shell: &str, flag: &str, line: &str, working_dir: &Path) -> Self {
        Self {
            program: shell.to_string(),
            args: vec![flag.to_string(), line.to_string()],
            working_dir: working_dir.to_path_buf(),
        }
    }
}

/// Platform shell and the flag that makes it run a single command line
pub fn default_shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("/bin/sh", "-c")
    }
}

/// Handle to a running child. Dropping it kills and reaps the child if it
/// has not exited yet.
///
/// On Unix the child leads its own process group, so teardown also reaches
/// whatever the shell started in the foreground.
pub struct ChildProcess {
    id: ChildId,
    pid: u32,
    /// Queue of the stdin writer thread; `None` once input is closed
    stdin: Option<Sender<Vec<u8>>>,
    child: Arc<Mutex<Child>>,
    /// Cleared on teardown so the waiter stops without reporting
    running: Arc<AtomicBool>,
}

impl ChildProcess {
    /// Start `command` and begin forwarding its output to `events`
    pub fn spawn<E>(
        id: ChildId,
        command: &ShellCommand,
        read_buffer: usize,
        events: Sender<E>,
    ) -> Result<Self>
    where
        E: From<ChildEvent> + Send + 'static,
    {
        let mut builder = Command::new(&command.program);
        builder
            .args(&command.args)
            .current_dir(&command.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        builder.process_group(0);

        let mut child = builder
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let pid = child.id();
        tracing::info!(
            "Spawned child {} (pid {}): {} {:?} in {}",
            id,
            pid,
            command.program,
            command.args,
            command.working_dir.display()
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let child = Arc::new(Mutex::new(child));
        let running = Arc::new(AtomicBool::new(true));

        let mut process = ChildProcess {
            id,
            pid,
            stdin: None,
            child,
            running,
        };

        // From here on, dropping `process` kills the child if a thread fails
        if let Some(pipe) = stdin {
            let (input_tx, input_rx) = mpsc::channel();
            spawn_writer(id, pipe, input_rx)?;
            process.stdin = Some(input_tx);
        }

        let read_buffer = read_buffer.max(1);
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = stdout {
            readers.push(spawn_reader(id, OutputStream::Stdout, pipe, read_buffer, events.clone())?);
        }
        if let Some(pipe) = stderr {
            readers.push(spawn_reader(id, OutputStream::Stderr, pipe, read_buffer, events.clone())?);
        }
        spawn_waiter(id, process.child.clone(), process.running.clone(), readers, events)?;

        Ok(process)
    }

    pub fn id(&self) -> ChildId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Queue bytes for the child's standard input. Never blocks; the writer
    /// thread delivers them as the child reads.
    pub fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_ref().ok_or(ProcessError::StdinClosed)?;
        stdin
            .send(data.to_vec())
            .map_err(|_| ProcessError::StdinClosed)
    }

    /// Close standard input so the child sees end-of-file once the queued
    /// bytes are written
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Kill the child if it is still running and reap it
    fn terminate(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.stdin = None;

        if let Ok(mut child) = self.child.lock() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => {
                    tracing::info!("Killing child {} (pid {})", self.id, self.pid);
                    kill_process_group(self.pid);
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Kill every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        tracing::debug!(
            "Failed to kill process group {}: {}",
            pgid,
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

fn spawn_writer(id: ChildId, mut pipe: ChildStdin, input: Receiver<Vec<u8>>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("child-{}-stdin", id))
        .spawn(move || {
            for data in input {
                if let Err(e) = pipe.write_all(&data).and_then(|_| pipe.flush()) {
                    // The child stopped reading; later writes report StdinClosed
                    tracing::warn!("Failed to write to child {}: {}", id, e);
                    return;
                }
            }
            tracing::debug!("Stdin of child {} closed", id);
        })
        .map_err(ProcessError::Thread)
}

fn spawn_reader<R, E>(
    id: ChildId,
    stream: OutputStream,
    mut pipe: R,
    read_buffer: usize,
    events: Sender<E>,
) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    E: From<ChildEvent> + Send + 'static,
{
    thread::Builder::new()
        .name(format!("child-{}-{:?}", id, stream).to_lowercase())
        .spawn(move || {
            let mut buffer = vec![0u8; read_buffer];
            loop {
                match pipe.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let event = ChildEvent::Output {
                            child: id,
                            stream,
                            data: buffer[..n].to_vec(),
                        };
                        if events.send(event.into()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::debug!("Read error on child {} {:?}: {}", id, stream, e);
                        break;
                    }
                }
            }
        })
        .map_err(ProcessError::Thread)
}

fn spawn_waiter<E>(
    id: ChildId,
    child: Arc<Mutex<Child>>,
    running: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
    events: Sender<E>,
) -> Result<JoinHandle<()>>
where
    E: From<ChildEvent> + Send + 'static,
{
    thread::Builder::new()
        .name(format!("child-{}-wait", id))
        .spawn(move || {
            let status = loop {
                if !running.load(Ordering::SeqCst) {
                    return;
                }

                let polled = match child.lock() {
                    Ok(mut child) => child.try_wait(),
                    Err(_) => return,
                };
                match polled {
                    Ok(Some(status)) => break Some(status),
                    Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                    Err(e) => {
                        tracing::warn!("Failed to poll child {}: {}", id, e);
                        break None;
                    }
                }
            };

            // Output still buffered in the pipes goes out before the exit
            for reader in readers {
                let _ = reader.join();
            }

            if !running.load(Ordering::SeqCst) {
                return;
            }
            tracing::info!("Child {} exited: {:?}", id, status);
            let _ = events.send(ChildEvent::Exited { child: id, status }.into());
        })
        .map_err(ProcessError::Thread)
}
