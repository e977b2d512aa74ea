use crate::rules::GameOutcome;
use shakmaty::Square;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
   #[error("malformed position: {0}")]
   MalformedPosition(String),
   #[error("malformed move: {0}")]
   MalformedMove(String),
   #[error("move {origin}{destination} is not legal here")]
   MoveRejected { origin: Square, destination: Square },
   #[error("invalid SAN: {0}")]
   InvalidSan(String),
   #[error("engine {engine} is still working on request {pending}")]
   EngineBusy { engine: String, pending: u64 },
   #[error("failed to launch engine {engine}")]
   EngineLaunch {
      engine: String,
      #[source]
      source: io::Error,
   },
   #[error("engine {engine} exited before replying")]
   EngineExited { engine: String },
   #[error("no engine named {0} in the roster")]
   UnknownEngine(String),
   #[error("invalid player binding: {0}")]
   InvalidBinding(String),
   #[error("engine roster is not valid JSON")]
   Roster(#[from] serde_json::Error),
   #[error("failed to read engine roster {path:?}")]
   RosterFile {
      path: PathBuf,
      #[source]
      source: io::Error,
   },
   #[error("game is already decided: {0}")]
   GameAlreadyDecided(GameOutcome),
   #[error("an ongoing game has no result to record")]
   NotAResult,
}
