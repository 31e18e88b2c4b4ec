mod message;
mod transport;

pub use message::{Envelope, GameStatus, LinkMessage};
pub use transport::{LinkConfig, LinkTransport};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link unavailable after {attempts} send attempts")]
    LinkUnavailable { attempts: u32 },

    #[error("timed out waiting for a message")]
    ReceiveTimeout,

    #[error("link closed by peer")]
    Closed,

    #[error("link i/o: {0}")]
    Io(#[from] std::io::Error),
}
