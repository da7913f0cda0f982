//! Process worker - runs the job in a forked child (Unix)
//!
//! ```text
//! parent                               child
//! ──────                               ─────
//! pipe()
//! fork() ───────────────────────────►  job() → frame
//! relay thread: read_frame(pipe) ◄───  write_frame(pipe); _exit(0)
//!   └─ put(frame) / EOF → producer gone
//! terminate: kill(SIGKILL)
//! join: waitpid
//! ```
//!
//! Frames are an 8-byte big-endian length followed by the JSON body. The
//! relay delivers a frame as soon as it is complete; EOF without a frame
//! means the worker is gone.
//!
//! Children never exec, so `FD_CLOEXEC` does not help: a sibling forked by
//! another thread between our `pipe()` and `drop(writer)` inherits the
//! write end. Every child therefore closes all inherited descriptors except
//! stdio and its own writer before running the job, so EOF tracks the
//! exit of the one child that owns the pipe.
//!
//! The child is a copy of a multithreaded process. Locks held by other
//! parent threads at fork time stay locked forever in the child; a target
//! that touches one (stdout/stderr, a `Mutex` it shares with the caller,
//! the allocator on platforms without fork-aware malloc) can deadlock. Such
//! a worker ends as a timeout, or never at timeout zero. Targets should keep
//! to their arguments and their own state.

use super::r#trait::{Job, Spawner, WorkerExit, WorkerHandle, WorkerStatus};
use super::FAULT_EXIT_CODE;
use crate::channel::{Channel, Producer, Signal};
use crate::task::TaskId;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Upper bound on a single frame, guards the relay against garbage headers
pub const MAX_FRAME_LEN: u64 = 256 * 1024 * 1024;

/// Spawns workers as forked child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

impl ProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(
        &self,
        task_id: TaskId,
        job: Job,
        channel: Arc<Channel>,
    ) -> io::Result<Box<dyn WorkerHandle>> {
        let (reader, writer) = pipe()?;

        // SAFETY: the child only runs the job, writes to its pipe and calls
        // `_exit`; it never returns into the caller's stack or runtime. It
        // inherits no other threads, so locks held elsewhere at fork time
        // are never released in the child (see module docs).
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(io::Error::last_os_error());
        }

        if pid == 0 {
            close_inherited_fds(writer.as_raw_fd());
            drop(reader);
            let code = child_main(job, writer);
            // SAFETY: `_exit` skips atexit handlers and destructors that
            // belong to the parent.
            unsafe { libc::_exit(code) }
        }

        drop(writer);
        drop(job);

        let mut worker = ProcessWorker { pid, status: None };
        let producer = Producer::new(channel);

        let relay = thread::Builder::new()
            .name(format!("isotask-relay-{}", task_id.as_u64()))
            .spawn(move || relay(task_id, reader, producer));

        if let Err(e) = relay {
            warn!("Failed to start relay for task {}: {}", task_id, e);
            let _ = worker.terminate();
            let _ = worker.join();
            return Err(e);
        }

        debug!("Forked worker pid {} for task {}", pid, task_id);
        Ok(Box::new(worker))
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Close every descriptor except stdio and `keep`. Runs in the child only.
fn close_inherited_fds(keep: RawFd) {
    for fd in open_fds() {
        if fd > 2 && fd != keep {
            // SAFETY: nothing in the child owns these descriptors yet.
            unsafe { libc::close(fd) };
        }
    }
}

fn open_fds() -> Vec<RawFd> {
    #[cfg(target_os = "linux")]
    if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
        return entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect();
    }

    // SAFETY: plain query.
    let max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    let max = if max <= 0 { 1024 } else { max.min(65_536) as RawFd };
    (0..max).collect()
}

fn child_main(job: Job, mut writer: File) -> i32 {
    match job() {
        WorkerExit::Frame(frame) => match write_frame(&mut writer, &frame) {
            Ok(()) => 0,
            Err(_) => FAULT_EXIT_CODE,
        },
        WorkerExit::Fault(_) => FAULT_EXIT_CODE,
    }
}

fn relay(task_id: TaskId, mut reader: File, producer: Producer) {
    match read_frame(&mut reader) {
        Ok(Some(frame)) => {
            producer.put(Signal::Frame(frame));
        }
        Ok(None) => debug!("Worker for task {} closed its pipe without a frame", task_id),
        Err(e) => warn!("Failed to read frame for task {}: {}", task_id, e),
    }
}

/// Write one length-prefixed frame
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(&(frame.len() as u64).to_be_bytes())?;
    writer.write_all(frame)?;
    writer.flush()
}

/// Read one length-prefixed frame. `Ok(None)` on a clean EOF before any
/// header byte arrived; a truncated frame is an error.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated frame header",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let len = u64::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

fn pipe() -> io::Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a valid two-element buffer.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    for fd in fds {
        // SAFETY: `fd` was just returned by pipe(2).
        unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    }
    // SAFETY: both descriptors are open and owned by nobody else.
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

struct ProcessWorker {
    pid: libc::pid_t,
    status: Option<WorkerStatus>,
}

impl WorkerHandle for ProcessWorker {
    fn label(&self) -> String {
        format!("pid {}", self.pid)
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid as u32)
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        // SAFETY: plain syscall; the pid is our unreaped child.
        if unsafe { libc::kill(self.pid, libc::SIGKILL) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn join(&mut self) -> io::Result<WorkerStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let mut raw: libc::c_int = 0;
        loop {
            // SAFETY: `raw` is a valid out pointer.
            let rc = unsafe { libc::waitpid(self.pid, &mut raw, 0) };
            if rc == self.pid {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }

        let status = if libc::WIFEXITED(raw) {
            WorkerStatus::Exited(libc::WEXITSTATUS(raw))
        } else if libc::WIFSIGNALED(raw) {
            WorkerStatus::Signaled(libc::WTERMSIG(raw))
        } else {
            WorkerStatus::Exited(FAULT_EXIT_CODE)
        };
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = self.terminate();
            let _ = self.join();
        }
    }
}
