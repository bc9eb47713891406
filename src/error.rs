use crate::srt::transport::TransportError;
use std::fmt;

/// Result type of every fallible `ez-srt` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error:{0}")]
    IO(#[from] std::io::Error),

    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("SRT setup failed while trying to {stage}: {source}")]
    Setup {
        stage: SetupStage,
        #[source]
        source: TransportError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sink is not started")]
    NotStarted,

    #[error("Sink is already started")]
    AlreadyStarted,

    #[error("SRT server is broken: {0}")]
    ServerBroken(String),

    #[error("Connection to the SRT peer was lost: {0}")]
    PeerLost(TransportError),
}

/// The step of a sink start sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Startup,
    CreateSocket,
    Configure,
    CreatePoll,
    Bind,
    Listen,
    Connect,
    SpawnThread,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            SetupStage::Startup => "initialize the transport library",
            SetupStage::CreateSocket => "create the socket",
            SetupStage::Configure => "configure the socket",
            SetupStage::CreatePoll => "create the poll context",
            SetupStage::Bind => "bind",
            SetupStage::Listen => "listen",
            SetupStage::Connect => "connect",
            SetupStage::SpawnThread => "spawn the acceptor thread",
        };
        f.write_str(stage)
    }
}

impl Error {
    pub(crate) fn setup(stage: SetupStage) -> impl FnOnce(TransportError) -> Error {
        move |source| Error::Setup { stage, source }
    }
}
