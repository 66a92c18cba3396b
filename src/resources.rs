//! Ownership of everything a run must release on exit.
//!
//! Fields are filled in as setup progresses; [`Resources::teardown`] releases
//! whatever is present. It runs once, either explicitly or from `Drop`.

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::connector::DataSocket;
use crate::scheduler::ArmedTimers;

#[derive(Debug, Default)]
pub struct Resources {
    pub listener: Option<UnixListener>,
    /// Socket file created by [`Resources::listen`].
    pub socket_path: Option<PathBuf>,
    pub control: Option<UnixStream>,
    pub data: Option<DataSocket>,
    pub timers: Option<ArmedTimers>,
    torn_down: bool,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the control listener and take ownership of its socket file.
    pub fn listen(&mut self, path: &Path) -> io::Result<&UnixListener> {
        let listener = UnixListener::bind(path)?;
        self.socket_path = Some(path.to_path_buf());
        Ok(self.listener.insert(listener))
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Release everything. Later calls do nothing.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(mut timers) = self.timers.take() {
            timers.cancel();
        }
        drop(self.data.take());
        drop(self.control.take());
        drop(self.listener.take());

        if let Some(path) = self.socket_path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove socket file"),
            }
        }

        if let Err(e) = restore_signal_mask() {
            warn!(error = %e, "failed to restore signal mask");
        }
        debug!("resources released");
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Unblock every signal on the calling thread.
#[cfg(unix)]
fn restore_signal_mask() -> io::Result<()> {
    // SAFETY: `set` is initialised by sigemptyset before use and the old-mask
    // pointer may be null.
    let rc = unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::pthread_sigmask(libc::SIG_SETMASK, &set, std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_signal_mask() -> io::Result<()> {
    Ok(())
}
