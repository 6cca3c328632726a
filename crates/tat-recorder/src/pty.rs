// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// PTY passthrough hosting the user's shell
//
// Uses portable-pty for the pseudo-terminal and crossterm for raw mode and
// terminal size. Two OS threads copy bytes: real input to the PTY, and PTY
// output to the real terminal and then to an output tap.

use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("PTY error while trying to {action}: {message}")]
    Pty {
        action: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("PTY {0} thread panicked")]
    ThreadPanicked(&'static str),
}

impl MirrorError {
    fn pty(action: &'static str, err: anyhow::Error) -> Self {
        MirrorError::Pty {
            action,
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

/// Receives every chunk after it has been written to the real terminal.
pub trait OutputTap: Send {
    fn on_output(&mut self, bytes: &[u8]);
}

impl<F> OutputTap for F
where
    F: FnMut(&[u8]) + Send,
{
    fn on_output(&mut self, bytes: &[u8]) {
        self(bytes)
    }
}

/// Configuration for the mirrored shell
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    /// Read buffer size for both copy loops
    pub read_buffer_size: usize,
    /// Extra environment for the child
    pub env_vars: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            program: "/bin/bash".into(),
            args: Vec::new(),
            cols: 80,
            rows: 24,
            read_buffer_size: 8192,
            env_vars: Vec::new(),
            cwd: None,
        }
    }
}

impl MirrorConfig {
    /// `$SHELL -l` (falling back to bash) sized to the controlling terminal.
    pub fn login_shell() -> Self {
        let program = std::env::var("SHELL")
            .ok()
            .filter(|shell| !shell.is_empty())
            .unwrap_or_else(|| "/bin/bash".into());
        let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
        Self {
            program,
            args: vec!["-l".into()],
            cols,
            rows,
            ..Self::default()
        }
    }
}

/// Exit information for the mirrored child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorExit {
    pub exit_code: u32,
    pub success: bool,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

type SharedMaster = Arc<Mutex<Box<dyn MasterPty + Send>>>;

/// Resizes the PTY while the mirror runs.
#[derive(Clone)]
pub struct PtyResizer {
    master: SharedMaster,
}

impl PtyResizer {
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let master = self.master.lock().unwrap_or_else(PoisonError::into_inner);
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| MirrorError::pty("resize", e))?;
        trace!(cols, rows, "Resized PTY");
        Ok(())
    }
}

/// A child process running on a fresh pseudo-terminal
pub struct PtyMirror {
    master: SharedMaster,
    child: Box<dyn Child + Send + Sync>,
    config: MirrorConfig,
}

impl PtyMirror {
    pub fn spawn(config: MirrorConfig) -> Result<Self> {
        let pty_system = portable_pty::native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| MirrorError::pty("open a PTY", e))?;

        let mut cmd = CommandBuilder::new(&config.program);
        cmd.args(&config.args);
        for (key, value) in &config.env_vars {
            cmd.env(key, value);
        }
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| MirrorError::pty("spawn the shell", e))?;
        // The reader only sees EOF once no slave handle remains open here
        drop(pair.slave);

        debug!(
            program = %config.program,
            args = ?config.args,
            cols = config.cols,
            rows = config.rows,
            "Spawned command in PTY"
        );

        Ok(Self {
            master: Arc::new(Mutex::new(pair.master)),
            child,
            config,
        })
    }

    pub fn resizer(&self) -> PtyResizer {
        PtyResizer {
            master: Arc::clone(&self.master),
        }
    }

    /// Mirror until the child exits. Blocks the calling thread.
    ///
    /// `input` must not block indefinitely: return `TimedOut` or
    /// `WouldBlock` periodically (see [`PolledStdin`]) so the input loop can
    /// observe the stop flag after the child exits.
    pub fn run<I, O, T>(mut self, input: I, output: O, tap: T) -> Result<MirrorExit>
    where
        I: Read + Send + 'static,
        O: Write + Send + 'static,
        T: OutputTap + 'static,
    {
        let (reader, writer) = {
            let master = self.master.lock().unwrap_or_else(PoisonError::into_inner);
            let reader = master
                .try_clone_reader()
                .map_err(|e| MirrorError::pty("clone the PTY reader", e))?;
            let writer = master
                .take_writer()
                .map_err(|e| MirrorError::pty("take the PTY writer", e))?;
            (reader, writer)
        };

        let buffer_size = self.config.read_buffer_size.max(1);
        let stop = Arc::new(AtomicBool::new(false));

        let output_thread = thread::Builder::new()
            .name("tat-pty-output".into())
            .spawn(move || copy_output(reader, output, tap, buffer_size))?;
        let input_stop = Arc::clone(&stop);
        let input_thread = thread::Builder::new()
            .name("tat-pty-input".into())
            .spawn(move || copy_input(input, writer, &input_stop, buffer_size))?;

        let bytes_out = match output_thread.join() {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!(error = %e, "PTY output loop ended with an error");
                0
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                let _ = self.child.kill();
                return Err(MirrorError::ThreadPanicked("output"));
            }
        };

        let status = self.child.wait()?;
        stop.store(true, Ordering::SeqCst);

        let bytes_in = match input_thread.join() {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!(error = %e, "PTY input loop ended with an error");
                0
            }
            Err(_) => return Err(MirrorError::ThreadPanicked("input")),
        };

        let exit = MirrorExit {
            exit_code: status.exit_code(),
            success: status.success(),
            bytes_in,
            bytes_out,
        };
        debug!(?exit, "Mirrored shell exited");
        Ok(exit)
    }
}

/// Copy PTY output to `writer`, then hand each chunk to `tap`.
///
/// Ends on EOF. On Linux a PTY master reports `EIO` once the child side is
/// gone, which is treated the same way.
pub fn copy_output<R, W, T>(mut reader: R, mut writer: W, mut tap: T, buffer_size: usize) -> io::Result<u64>
where
    R: Read,
    W: Write,
    T: OutputTap,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                writer.write_all(&buf[..n])?;
                writer.flush()?;
                tap.on_output(&buf[..n]);
                total += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => break,
            Err(e) => {
                error!(error = %e, "PTY read error");
                return Err(e);
            }
        }
    }
    trace!(total, "PTY output loop finished");
    Ok(total)
}

/// Copy input into the PTY until the input closes, a write fails or `stop` is raised.
///
/// `writer` is dropped on return, which signals end-of-file to the child.
pub fn copy_input<R, W>(mut reader: R, mut writer: W, stop: &AtomicBool, buffer_size: usize) -> io::Result<u64>
where
    R: Read,
    W: Write,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    while !stop.load(Ordering::SeqCst) {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).and_then(|_| writer.flush()) {
                    debug!(error = %e, "PTY write failed, child likely exited");
                    break;
                }
                total += n as u64;
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(e),
        }
    }
    trace!(total, "PTY input loop finished");
    Ok(total)
}

/// Standard input that gives up after `timeout` with `ErrorKind::TimedOut`
#[derive(Debug, Clone, Copy)]
pub struct PolledStdin {
    timeout: Duration,
}

impl Default for PolledStdin {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
        }
    }
}

impl Read for PolledStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stdin = io::stdin();
        let fd = stdin.as_fd();
        let timeout = PollTimeout::from(u16::try_from(self.timeout.as_millis()).unwrap_or(u16::MAX));
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        if poll(&mut fds, timeout)? == 0 {
            return Err(io::ErrorKind::TimedOut.into());
        }
        // Read the descriptor directly; std's buffered stdin would hide
        // pending bytes from the next poll
        Ok(nix::unistd::read(fd, buf)?)
    }
}

/// Puts the controlling terminal in raw mode; restores it on drop.
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    /// Enable raw mode when stdin is a terminal; otherwise a no-op guard.
    pub fn enable() -> io::Result<Self> {
        if !io::stdin().is_terminal() {
            return Ok(Self { enabled: false });
        }
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { enabled: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = crossterm::terminal::disable_raw_mode() {
                error!(error = %e, "Failed to restore terminal mode");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A writer whose contents stay readable after it is moved into a thread.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tat_test_utils::logged_test]
    fn test_copy_output_writes_before_tapping() {
        let terminal = SharedBuf::default();
        let seen = SharedBuf::default();
        let terminal_view = terminal.clone();
        let mut tapped = seen.clone();

        let total = copy_output(
            Cursor::new(b"abcdefgh".to_vec()),
            terminal.clone(),
            move |bytes: &[u8]| {
                // Everything tapped so far is already on the terminal
                assert!(terminal_view.text().len() >= bytes.len());
                tapped.write_all(bytes).unwrap();
            },
            3,
        )
        .unwrap();

        assert_eq!(total, 8);
        assert_eq!(terminal.text(), "abcdefgh");
        assert_eq!(seen.text(), "abcdefgh");
    }

    #[tat_test_utils::logged_test]
    fn test_copy_input_honors_stop_flag() {
        let stop = AtomicBool::new(true);
        let sink = SharedBuf::default();
        let total = copy_input(Cursor::new(b"ignored".to_vec()), sink.clone(), &stop, 16).unwrap();
        assert_eq!(total, 0);
        assert_eq!(sink.text(), "");

        let running = AtomicBool::new(false);
        let total = copy_input(Cursor::new(b"typed".to_vec()), sink.clone(), &running, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(sink.text(), "typed");
    }

    #[tat_test_utils::logged_test]
    fn test_mirror_round_trip_through_real_pty() {
        let mirror = PtyMirror::spawn(MirrorConfig {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), r#"read line; printf 'got:%s\n' "$line""#.into()],
            ..MirrorConfig::default()
        })
        .unwrap();

        let terminal = SharedBuf::default();
        let tapped = SharedBuf::default();
        let mut tap_writer = tapped.clone();
        let exit = mirror
            .run(
                Cursor::new(b"hello\n".to_vec()),
                terminal.clone(),
                move |bytes: &[u8]| tap_writer.write_all(bytes).unwrap(),
            )
            .unwrap();

        assert!(exit.success);
        assert_eq!(exit.exit_code, 0);
        assert_eq!(exit.bytes_in, 6);
        assert!(terminal.text().contains("got:hello"), "terminal saw {:?}", terminal.text());
        assert_eq!(tapped.text(), terminal.text());
    }

    #[tat_test_utils::logged_test]
    fn test_mirror_reports_child_exit_code() {
        let mirror = PtyMirror::spawn(MirrorConfig {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "exit 3".into()],
            ..MirrorConfig::default()
        })
        .unwrap();
        let exit = mirror.run(io::empty(), io::sink(), |_: &[u8]| {}).unwrap();
        assert!(!exit.success);
        assert_eq!(exit.exit_code, 3);
    }

    /// Input from an idle terminal: never closes, only times out.
    struct IdleInput {
        reads: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Read for IdleInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Err(io::ErrorKind::TimedOut.into())
        }
    }

    #[tat_test_utils::logged_test]
    fn test_both_loops_end_when_child_exits_with_idle_input() {
        let mirror = PtyMirror::spawn(MirrorConfig {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "sleep 0.2; echo bye".into()],
            ..MirrorConfig::default()
        })
        .unwrap();

        let reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let terminal = SharedBuf::default();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let input = IdleInput {
            reads: Arc::clone(&reads),
        };
        let output = terminal.clone();
        thread::spawn(move || {
            let _ = done_tx.send(mirror.run(input, output, |_: &[u8]| {}));
        });

        // The input side only stops once the stop flag is raised after the child is reaped
        let exit = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("mirror did not return after the child exited")
            .unwrap();
        assert!(exit.success);
        assert_eq!(exit.bytes_in, 0);
        assert!(terminal.text().contains("bye"), "terminal saw {:?}", terminal.text());
        assert!(reads.load(Ordering::SeqCst) > 1, "input loop should have polled while the child ran");
    }
}
