//! In-memory engines for session and game tests.

use crate::config::EngineDescriptor;
use crate::engine::{EngineIo, Launcher};
use crate::rules::{self, Move, Position, Square};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

enum Script {
   Silent,
   FirstLegalMove,
   Failing,
}

/// Hands out duplex pipes instead of processes. Every launch is kept so a
/// test can drive or inspect it afterwards.
pub struct ScriptedLauncher {
   script: Script,
   engines: Mutex<Vec<ScriptedEngine>>,
}

impl ScriptedLauncher {
   /// Engines that only speak when a test tells them to.
   pub fn silent() -> ScriptedLauncher {
      ScriptedLauncher::with_script(Script::Silent)
   }

   /// Engines that answer every `go` with the first legal move they find.
   pub fn first_legal_move() -> ScriptedLauncher {
      ScriptedLauncher::with_script(Script::FirstLegalMove)
   }

   pub fn failing() -> ScriptedLauncher {
      ScriptedLauncher::with_script(Script::Failing)
   }

   fn with_script(script: Script) -> ScriptedLauncher {
      ScriptedLauncher {
         script,
         engines: Mutex::new(Vec::new()),
      }
   }

   pub fn launches(&self) -> usize {
      self.engines.lock().len()
   }

   pub fn engine(&self, launch: usize) -> ScriptedEngine {
      self.engines.lock()[launch].clone()
   }
}

impl Launcher for ScriptedLauncher {
   fn launch(&self, engine: &EngineDescriptor) -> io::Result<EngineIo> {
      let responder: Option<Responder> = match self.script {
         Script::Silent => None,
         Script::FirstLegalMove => Some(first_legal_move_responder()),
         Script::Failing => {
            return Err(io::Error::new(
               io::ErrorKind::NotFound,
               format!("{} is not installed", engine.path.display()),
            ))
         }
      };
      let (input, engine_stdin) = tokio::io::duplex(64 * 1024);
      let (engine_stdout, output) = tokio::io::duplex(64 * 1024);
      let (script, lines) = mpsc::unbounded_channel();
      let handle = ScriptedEngine {
         received: Arc::new(Mutex::new(Vec::new())),
         script,
      };
      tokio::spawn(run_engine(engine_stdin, engine_stdout, lines, handle.received.clone(), responder));
      self.engines.lock().push(handle);
      Ok(EngineIo {
         input: Box::new(input),
         output: Box::new(output),
         child: None,
      })
   }
}

fn first_legal_move_responder() -> Responder {
   let mut position = Position::new_game();
   Box::new(move |line: &str| {
      if let Some(text) = line.strip_prefix("position fen ") {
         if let Ok(p) = text.parse() {
            position = p;
         }
         Vec::new()
      } else if line.starts_with("go ") {
         let m = (0..64).map(Square::new).find_map(|origin| {
            rules::legal_moves(&position, origin).first().map(|&destination| Move {
               origin,
               destination,
               promotion: None,
            })
         });
         match m {
            Some(m) => vec![format!("info depth 1 score cp 0 pv {}", m), format!("bestmove {}", m)],
            None => vec!["bestmove (none)".to_owned()],
         }
      } else {
         Vec::new()
      }
   })
}

async fn run_engine(
   stdin: DuplexStream,
   stdout: DuplexStream,
   mut script: mpsc::UnboundedReceiver<Option<String>>,
   received: Arc<Mutex<Vec<String>>>,
   mut responder: Option<Responder>,
) {
   let mut commands = BufReader::new(stdin).lines();
   let mut stdout = Some(stdout);
   let mut script_open = true;
   loop {
      tokio::select! {
         command = commands.next_line() => {
            let command = match command {
               Ok(Some(command)) => command,
               _ => break,
            };
            received.lock().push(command.clone());
            let replies = responder.as_mut().map(|r| r(&command)).unwrap_or_default();
            if let Some(out) = stdout.as_mut() {
               for reply in replies {
                  let _ = out.write_all(format!("{}\n", reply).as_bytes()).await;
               }
            }
         }
         said = script.recv(), if script_open => match said {
            Some(Some(line)) => {
               if let Some(out) = stdout.as_mut() {
                  let _ = out.write_all(format!("{}\n", line).as_bytes()).await;
               }
            }
            Some(None) => stdout = None,
            None => script_open = false,
         }
      }
   }
}

/// Test-side handle on one launched engine.
#[derive(Clone)]
pub struct ScriptedEngine {
   received: Arc<Mutex<Vec<String>>>,
   script: mpsc::UnboundedSender<Option<String>>,
}

impl ScriptedEngine {
   pub fn say(&self, line: &str) {
      let _ = self.script.send(Some(line.to_owned()));
   }

   /// Closes the engine's output, as if the process died.
   pub fn hang_up(&self) {
      let _ = self.script.send(None);
   }

   pub fn received(&self) -> Vec<String> {
      self.received.lock().clone()
   }

   pub async fn wait_for_commands(&self, count: usize) -> Vec<String> {
      let waited = tokio::time::timeout(Duration::from_secs(5), async {
         loop {
            let received = self.received();
            if received.len() >= count {
               return received;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
         }
      })
      .await;
      match waited {
         Ok(received) => received,
         Err(_) => panic!("engine saw {:?}, wanted {} commands", self.received(), count),
      }
   }
}
