use crate::error::{Error, Result, SetupStage};
use crate::srt::transport::Transport;
use log::{debug, info};
use std::sync::{Arc, Mutex};

/// Process-scoped transport library state.
///
/// Native SRT keeps global state that must be set up before the first socket is created
/// and torn down after the last one is closed. `Library` reference counts its users so any
/// number of sinks can share one transport: the first [`acquire`](Library::acquire) runs
/// [`Transport::startup`], dropping the last [`LibraryGuard`] runs [`Transport::cleanup`].
pub struct Library {
    transport: Arc<dyn Transport>,
    users: Mutex<usize>,
}

impl Library {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Library> {
        Arc::new(Library {
            transport,
            users: Mutex::new(0),
        })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Current number of live guards.
    pub fn users(&self) -> usize {
        *self.users.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn acquire(self: &Arc<Self>) -> Result<LibraryGuard> {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        if *users == 0 {
            self.transport
                .startup()
                .map_err(Error::setup(SetupStage::Startup))?;
            info!("SRT transport library started.");
        }
        *users += 1;
        debug!("SRT transport library users: {}", *users);
        Ok(LibraryGuard {
            library: self.clone(),
        })
    }

    fn release(&self) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        *users = users.saturating_sub(1);
        debug!("SRT transport library users: {}", *users);
        if *users == 0 {
            self.transport.cleanup();
            info!("SRT transport library cleaned up.");
        }
    }
}

/// Keeps the transport library initialized while alive.
pub struct LibraryGuard {
    library: Arc<Library>,
}

impl LibraryGuard {
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.library.transport
    }
}

impl Drop for LibraryGuard {
    fn drop(&mut self) {
        self.library.release();
    }
}
