//! Session management
//!
//! Routes submitted lines either to the `cd` built-in, to a newly spawned
//! child, or to the stdin of the child that is already running, and turns
//! child output into styled segments for the display sink.

use std::path::Path;
use std::process::ExitStatus;
use std::sync::mpsc::{Receiver, Sender};

use super::cwd::WorkingDirectory;
use super::process::{self, ChildEvent, ChildId, ChildProcess, OutputStream, ProcessError, ShellCommand};
use super::term::{Color, Decoder, SegmentKind, Style, StyledSegment};

/// Prefix of the only built-in command
const BUILTIN_CD: &str = "cd ";

/// Session events, delivered in arrival order to [`Session::handle_event`]
#[derive(Debug)]
pub enum SessionEvent {
    /// A line committed by the input source
    Input(String),
    /// The input source has no more lines
    InputClosed,
    /// Output or exit of a child
    Child(ChildEvent),
}

impl From<ChildEvent> for SessionEvent {
    fn from(event: ChildEvent) -> Self {
        SessionEvent::Child(event)
    }
}

/// Receives styled output, in order
pub trait DisplaySink {
    fn emit(&mut self, segments: &[StyledSegment]);

    /// Hint that the view should follow the newest output
    fn scroll_to_latest(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No child is running; lines are commands
    Idle,
    /// A child is running; lines are its input
    Busy,
}

/// Settings the session needs from configuration
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub shell: String,
    pub shell_flag: String,
    pub read_buffer: usize,
    pub echo_color: Color,
    pub status_color: Color,
    pub error_color: Color,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let (shell, flag) = process::default_shell();
        Self {
            shell: shell.to_string(),
            shell_flag: flag.to_string(),
            read_buffer: process::DEFAULT_READ_BUFFER,
            echo_color: Color::Rgb(0, 255, 0),
            status_color: Color::Rgb(0, 255, 0),
            error_color: Color::Rgb(255, 0, 0),
        }
    }
}

/// The running child and one decoder per output stream
struct ActiveChild {
    process: ChildProcess,
    stdout: Decoder,
    stderr: Decoder,
}

impl ActiveChild {
    fn decoder(&mut self, stream: OutputStream) -> &mut Decoder {
        match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        }
    }
}

/// An interactive command session
pub struct Session<S: DisplaySink> {
    cwd: WorkingDirectory,
    options: SessionOptions,
    sink: S,
    /// Handed to each child so its events join the session's queue
    events: Sender<SessionEvent>,
    active: Option<ActiveChild>,
    next_child_id: ChildId,
    input_closed: bool,
}

impl<S: DisplaySink> Session<S> {
    pub fn new(
        cwd: WorkingDirectory,
        options: SessionOptions,
        sink: S,
        events: Sender<SessionEvent>,
    ) -> Self {
        Self {
            cwd,
            options,
            sink,
            events,
            active: None,
            next_child_id: 1,
            input_closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Busy
        } else {
            SessionState::Idle
        }
    }

    pub fn current_directory(&self) -> &Path {
        self.cwd.current()
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Whether the input source is gone and nothing is left to wait for
    pub fn is_finished(&self) -> bool {
        self.input_closed && self.state() == SessionState::Idle
    }

    /// Process events until the input source closes and the last child exits
    pub fn run(&mut self, events: &Receiver<SessionEvent>) {
        while !self.is_finished() {
            match events.recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => break,
            }
        }
        tracing::info!("Session finished");
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Input(line) => self.submit_line(&line),
            SessionEvent::InputClosed => self.close_input(),
            SessionEvent::Child(ChildEvent::Output { child, stream, data }) => {
                self.on_output(child, stream, &data)
            }
            SessionEvent::Child(ChildEvent::Exited { child, status }) => self.on_exit(child, status),
        }
    }

    /// Handle one line from the input source
    pub fn submit_line(&mut self, line: &str) {
        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');

        if let Some(active) = self.active.as_mut() {
            // Everything goes to the running child, even empty lines and `cd`
            let input = format!("{}\n", line);
            if let Err(e) = active.process.write_stdin(input.as_bytes()) {
                // The child is exiting; its exit event settles the state
                tracing::warn!("Dropped input for child {}: {}", active.process.id(), e);
            }
            return;
        }

        let command = line.trim_start();
        if command.trim_end().is_empty() {
            return;
        }

        self.emit_line(format!("$ {}", command.trim_end()), self.options.echo_color, SegmentKind::Echo);

        match command.strip_prefix(BUILTIN_CD) {
            Some(target) => self.change_directory(target),
            None => self.spawn(command.trim_end()),
        }
    }

    fn close_input(&mut self) {
        tracing::info!("Input closed");
        self.input_closed = true;
        if let Some(active) = self.active.as_mut() {
            active.process.close_stdin();
        }
    }

    fn change_directory(&mut self, target: &str) {
        let message = self
            .cwd
            .change_directory(target)
            .map(|path| format!("Directory changed to {}", path.display()));

        match message {
            Ok(text) => self.emit_line(text, self.options.status_color, SegmentKind::Status),
            Err(e) => {
                tracing::info!("cd {:?} failed: {}", target, e);
                self.emit_error(e.to_string());
            }
        }
    }

    fn spawn(&mut self, line: &str) {
        let command = ShellCommand::new(
            &self.options.shell,
            &self.options.shell_flag,
            line,
            self.cwd.current(),
        );
        let id = self.next_child_id;
        self.next_child_id += 1;

        match ChildProcess::spawn(id, &command, self.options.read_buffer, self.events.clone()) {
            Ok(process) => {
                tracing::debug!("Child {} is pid {}", id, process.pid());
                self.active = Some(ActiveChild {
                    process,
                    stdout: Decoder::new(SegmentKind::Stdout),
                    stderr: Decoder::new(SegmentKind::Stderr),
                });
            }
            Err(e) => {
                tracing::error!("Spawn failed: {}", e);
                self.emit_error(spawn_error_text(&e));
            }
        }
    }

    fn on_output(&mut self, child: ChildId, stream: OutputStream, data: &[u8]) {
        let Some(active) = self.active_for(child) else {
            tracing::debug!("Ignoring output of stale child {}", child);
            return;
        };
        let segments = active.decoder(stream).feed(data);
        self.emit(&segments);
    }

    fn on_exit(&mut self, child: ChildId, status: Option<ExitStatus>) {
        if self.active_for(child).is_none() {
            tracing::debug!("Ignoring exit of stale child {}", child);
            return;
        }
        let Some(mut active) = self.active.take() else {
            return;
        };
        tracing::info!("Child {} finished: {:?}", child, status);

        let mut segments = active.stdout.finish();
        segments.extend(active.stderr.finish());
        self.emit(&segments);
        self.emit_line("Process finished".to_string(), self.options.status_color, SegmentKind::Status);
    }

    fn active_for(&mut self, child: ChildId) -> Option<&mut ActiveChild> {
        self.active.as_mut().filter(|active| active.process.id() == child)
    }

    fn emit_error(&mut self, reason: String) {
        self.emit_line(format!("Error: {}", reason), self.options.error_color, SegmentKind::Error);
    }

    fn emit_line(&mut self, text: String, color: Color, kind: SegmentKind) {
        let segment = StyledSegment::new(text + "\n", Style::fg(color), kind);
        self.emit(std::slice::from_ref(&segment));
    }

    fn emit(&mut self, segments: &[StyledSegment]) {
        if segments.is_empty() {
            return;
        }
        self.sink.emit(segments);
        self.sink.scroll_to_latest();
    }
}

impl<S: DisplaySink> Drop for Session<S> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!("Session closing, terminating child {}", active.process.id());
        }
    }
}

fn spawn_error_text(error: &ProcessError) -> String {
    match error {
        ProcessError::Spawn { program, source } => format!("{}: {}", program, source),
        other => other.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::term::coalesce;
    use crate::ui::SegmentLog;
    use std::sync::mpsc;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    struct Harness {
        session: Session<SegmentLog>,
        tx: Sender<SessionEvent>,
        rx: Receiver<SessionEvent>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_options(SessionOptions::default())
        }

        fn with_options(options: SessionOptions) -> Self {
            let (tx, rx) = mpsc::channel();
            let cwd = WorkingDirectory::new(std::env::temp_dir()).unwrap();
            let session = Session::new(cwd, options, SegmentLog::new(), tx.clone());
            Self { session, tx, rx }
        }

        fn submit(&mut self, line: &str) {
            self.session.handle_event(SessionEvent::Input(line.to_string()));
        }

        fn run_until_idle(&mut self) {
            while self.session.state() == SessionState::Busy {
                let event = self.rx.recv_timeout(TIMEOUT).expect("child did not finish in time");
                self.session.handle_event(event);
            }
        }

        fn segments(&self) -> &[StyledSegment] {
            self.session.sink().segments()
        }

        fn texts(&self, kind: SegmentKind) -> Vec<String> {
            self.segments()
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| s.text.clone())
                .collect()
        }
    }

    #[test]
    fn test_empty_line_ignored() {
        let mut h = Harness::new();
        h.submit("");
        h.submit("   ");
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.segments().is_empty());
    }

    #[test]
    fn test_echo_hello() {
        let mut h = Harness::new();
        h.submit("echo hello");
        assert_eq!(h.session.state(), SessionState::Busy);
        h.run_until_idle();

        let segments = h.segments();
        assert_eq!(segments[0].kind, SegmentKind::Echo);
        assert_eq!(segments[0].text, "$ echo hello\n");
        assert_eq!(h.session.sink().plain_text(SegmentKind::Stdout), "hello\n");
        assert_eq!(segments.last().unwrap().text, "Process finished\n");
        assert_eq!(h.texts(SegmentKind::Status), vec!["Process finished\n".to_string()]);
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[test]
    fn test_stderr_and_colors_decoded() {
        let mut h = Harness::new();
        h.submit("printf '\\033[31mred\\033[0m\\n'; echo oops >&2");
        h.run_until_idle();

        let merged = coalesce(h.segments().to_vec());
        let red: Vec<_> = merged
            .iter()
            .filter(|s| s.kind == SegmentKind::Stdout && s.text == "red")
            .collect();
        assert_eq!(red.len(), 1);
        assert_eq!(red[0].foreground(), Some(Color::Indexed(1)));
        assert_eq!(h.session.sink().plain_text(SegmentKind::Stderr), "oops\n");
    }

    #[test]
    fn test_cd_nonexistent() {
        let mut h = Harness::new();
        let before = h.session.current_directory().to_path_buf();

        h.submit("cd /does/not/exist");
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.current_directory(), before.as_path());
        assert_eq!(h.texts(SegmentKind::Error).len(), 1);
        assert!(h.texts(SegmentKind::Status).is_empty());
    }

    #[test]
    fn test_cd_empty_target_is_error() {
        let mut h = Harness::new();
        let before = h.session.current_directory().to_path_buf();

        h.submit("cd    ");
        assert_eq!(h.texts(SegmentKind::Error).len(), 1);
        assert_eq!(h.session.current_directory(), before.as_path());
    }

    #[test]
    fn test_cd_then_spawn_uses_new_directory() {
        let temp = tempfile::tempdir().unwrap();
        let canonical = std::fs::canonicalize(temp.path()).unwrap();
        let mut h = Harness::new();

        h.submit(&format!("cd {}", canonical.display()));
        assert_eq!(h.session.current_directory(), canonical.as_path());
        assert_eq!(
            h.texts(SegmentKind::Status),
            vec![format!("Directory changed to {}\n", canonical.display())]
        );

        h.submit("pwd");
        h.run_until_idle();
        assert_eq!(
            h.session.sink().plain_text(SegmentKind::Stdout),
            format!("{}\n", canonical.display())
        );
    }

    #[test]
    fn test_cd_without_space_goes_to_shell() {
        let mut h = Harness::new();
        let before = h.session.current_directory().to_path_buf();

        h.submit("cd");
        assert_eq!(h.session.state(), SessionState::Busy);
        h.run_until_idle();
        assert_eq!(h.session.current_directory(), before.as_path());
    }

    #[test]
    fn test_busy_lines_go_to_stdin() {
        let mut h = Harness::new();
        h.submit("cat");
        assert_eq!(h.session.state(), SessionState::Busy);

        h.submit("line1");
        h.submit("cd /");
        h.submit("");
        h.session.handle_event(SessionEvent::InputClosed);
        h.run_until_idle();

        assert_eq!(h.session.sink().plain_text(SegmentKind::Stdout), "line1\ncd /\n\n");
        assert_eq!(h.texts(SegmentKind::Echo), vec!["$ cat\n".to_string()]);
        assert_ne!(h.session.current_directory(), Path::new("/"));
        assert!(h.session.is_finished());
    }

    #[test]
    fn test_large_input_does_not_stall_session() {
        let mut h = Harness::new();
        h.submit("sleep 1");

        // The child never reads; the line is far larger than a pipe buffer
        let start = std::time::Instant::now();
        h.submit(&"x".repeat(1 << 20));
        assert!(start.elapsed() < Duration::from_millis(500));

        h.run_until_idle();
        assert_eq!(h.texts(SegmentKind::Status), vec!["Process finished\n".to_string()]);
    }

    #[test]
    fn test_input_after_child_died_waits_for_exit_event() {
        let mut h = Harness::new();
        h.submit("true");
        // Let the child exit without delivering its events
        std::thread::sleep(Duration::from_millis(300));

        h.submit("too late");
        h.submit("still too late");
        assert_eq!(h.session.state(), SessionState::Busy);
        assert_eq!(h.segments().len(), 1);

        h.run_until_idle();
        assert_eq!(h.texts(SegmentKind::Status), vec!["Process finished\n".to_string()]);
        assert!(h.texts(SegmentKind::Error).is_empty());
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[test]
    fn test_new_command_after_exit_spawns_new_child() {
        let mut h = Harness::new();
        h.submit("true");
        h.run_until_idle();
        h.submit("echo second");
        assert_eq!(h.session.state(), SessionState::Busy);
        h.run_until_idle();

        assert_eq!(h.session.sink().plain_text(SegmentKind::Stdout), "second\n");
        assert_eq!(h.texts(SegmentKind::Status).len(), 2);
        assert_eq!(h.texts(SegmentKind::Echo).len(), 2);
    }

    #[test]
    fn test_spawn_failure_reports_error_and_stays_idle() {
        let options = SessionOptions {
            shell: "/definitely/not/a/shell".to_string(),
            ..SessionOptions::default()
        };
        let mut h = Harness::with_options(options);

        h.submit("echo hi");
        assert_eq!(h.session.state(), SessionState::Idle);
        let errors = h.texts(SegmentKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Error: /definitely/not/a/shell"));
    }

    #[test]
    fn test_stale_child_events_ignored() {
        let mut h = Harness::new();
        h.session.handle_event(SessionEvent::Child(ChildEvent::Output {
            child: 42,
            stream: OutputStream::Stdout,
            data: b"ghost".to_vec(),
        }));
        h.session.handle_event(SessionEvent::Child(ChildEvent::Exited {
            child: 42,
            status: None,
        }));
        assert!(h.segments().is_empty());
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[test]
    fn test_output_follows_echo() {
        let mut h = Harness::new();
        h.submit("echo one; echo two");
        h.run_until_idle();

        let kinds: Vec<_> = h.segments().iter().map(|s| s.kind).collect();
        assert_eq!(kinds.first(), Some(&SegmentKind::Echo));
        assert_eq!(kinds.last(), Some(&SegmentKind::Status));
        assert!(kinds[1..kinds.len() - 1].iter().all(|k| *k == SegmentKind::Stdout));
    }

    #[test]
    fn test_run_stops_after_input_closed() {
        let mut h = Harness::new();
        h.tx.send(SessionEvent::Input("echo done".to_string())).unwrap();
        h.tx.send(SessionEvent::InputClosed).unwrap();
        h.session.run(&h.rx);

        assert!(h.session.is_finished());
        assert_eq!(h.session.sink().plain_text(SegmentKind::Stdout), "done\n");
    }
}
