pub mod args;
pub mod manager;
pub mod process;
pub mod stream;

use std::path::PathBuf;
use thiserror::Error;

pub use args::{FollowMode, TailArgs, TailStart};
pub use manager::{RequestContext, TailExit, TailManager, TailTask};
pub use stream::TailStream;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to spawn '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tail process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("tail process reported an error: {0}")]
    ProcessOutput(String),
}
