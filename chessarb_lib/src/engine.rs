//! Sessions with external engine processes.
//!
//! Each session owns one engine, started on first use, plus a writer task
//! draining commands to its stdin and a reader task feeding its stdout lines
//! to whatever request is outstanding. A session accepts one request at a
//! time; a second one is turned away rather than queued.

use crate::config::{EngineDescriptor, EngineRoster, SearchBudget, HELPER_MOVE_TIME, HELPER_SKILL};
use crate::error::{Error, Result};
use crate::messages::{EngineMessage, InterfaceMessage, Score};
use crate::rules::{self, Color, Move, Position, Square};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

pub type EngineInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type EngineOutput = Box<dyn AsyncRead + Send + Unpin>;

/// The two ends of a running engine. `child` is held for as long as the
/// session lives so the process is killed with it.
pub struct EngineIo {
   pub input: EngineInput,
   pub output: EngineOutput,
   pub child: Option<Child>,
}

pub trait Launcher: Send + Sync {
   fn launch(&self, engine: &EngineDescriptor) -> io::Result<EngineIo>;
}

/// Runs engines as child processes talking over stdin and stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
   fn launch(&self, engine: &EngineDescriptor) -> io::Result<EngineIo> {
      let mut child = Command::new(&engine.path)
         .args(&engine.args)
         .stdin(Stdio::piped())
         .stdout(Stdio::piped())
         .stderr(Stdio::null())
         .kill_on_drop(true)
         .spawn()?;
      let input = child
         .stdin
         .take()
         .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdin was not captured"))?;
      let output = child
         .stdout
         .take()
         .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdout was not captured"))?;
      info!("launched {} (pid {:?})", engine.name, child.id());
      Ok(EngineIo {
         input: Box::new(input),
         output: Box::new(output),
         child: Some(child),
      })
   }
}

/// Gathers engine output for one request until it has an answer.
pub trait Collector: Send + 'static {
   type Output: Send + 'static;

   fn for_request(position: &Position) -> Self;

   fn observe(&mut self, message: &EngineMessage) -> Option<Self::Output>;
}

/// Answers with the first move an engine commits to.
#[derive(Debug)]
pub struct MoveSearch;

impl Collector for MoveSearch {
   type Output = Move;

   fn for_request(_position: &Position) -> MoveSearch {
      MoveSearch
   }

   fn observe(&mut self, message: &EngineMessage) -> Option<Move> {
      match message {
         EngineMessage::BestMove(m) => *m,
         _ => None,
      }
   }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisResult {
   /// Squares of the engine's preferred lines, deepest line first.
   pub moves: Vec<Square>,
   /// Latest reported evaluation, positive when white is better.
   pub score: Score,
}

#[derive(Debug)]
pub struct AnalysisSearch {
   side_to_move: Color,
   score: Score,
   lines: Vec<(Square, Square)>,
}

impl Collector for AnalysisSearch {
   type Output = AnalysisResult;

   fn for_request(position: &Position) -> AnalysisSearch {
      AnalysisSearch {
         side_to_move: rules::side_to_move(position),
         score: Score::Centipawns(0),
         lines: Vec::new(),
      }
   }

   fn observe(&mut self, message: &EngineMessage) -> Option<AnalysisResult> {
      match message {
         EngineMessage::Info(info) => {
            self.score = info.score.for_white(self.side_to_move);
            self.lines.push(info.pv);
            None
         }
         EngineMessage::BestMove(_) => {
            let mut moves = Vec::with_capacity(self.lines.len() * 2);
            for (origin, destination) in self.lines.drain(..).rev() {
               for square in [origin, destination] {
                  if !moves.contains(&square) {
                     moves.push(square);
                  }
               }
            }
            Some(AnalysisResult {
               moves,
               score: self.score,
            })
         }
         EngineMessage::Other => None,
      }
   }
}

enum SessionState<C: Collector> {
   Idle,
   AwaitingReply {
      request_id: u64,
      collector: C,
      reply: oneshot::Sender<C::Output>,
   },
}

struct Link {
   commands: mpsc::UnboundedSender<InterfaceMessage>,
   // set by the reader, under the state lock, once the engine's output ends
   closed: Arc<AtomicBool>,
   _child: Option<Child>,
}

impl Link {
   fn start<C: Collector>(
      engine: &EngineDescriptor,
      launcher: &dyn Launcher,
      state: Arc<Mutex<SessionState<C>>>,
   ) -> Result<Link> {
      let io = launcher.launch(engine).map_err(|source| Error::EngineLaunch {
         engine: engine.name.clone(),
         source,
      })?;
      let (commands, receiver) = mpsc::unbounded_channel();
      let closed = Arc::new(AtomicBool::new(false));
      tokio::spawn(write_commands(engine.name.clone(), io.input, receiver));
      tokio::spawn(read_lines(engine.name.clone(), io.output, state, closed.clone()));
      Ok(Link {
         commands,
         closed,
         _child: io.child,
      })
   }
}

async fn send_line(input: &mut EngineInput, line: &str) -> io::Result<()> {
   input.write_all(line.as_bytes()).await?;
   input.write_all(b"\n").await?;
   input.flush().await
}

async fn write_commands(name: String, mut input: EngineInput, mut commands: mpsc::UnboundedReceiver<InterfaceMessage>) {
   while let Some(command) = commands.recv().await {
      let line = command.to_string();
      trace!("{} -> {}", name, line);
      if let Err(e) = send_line(&mut input, &line).await {
         warn!("failed to write to {}: {}", name, e);
         break;
      }
   }
}

async fn read_lines<C: Collector>(
   name: String,
   output: EngineOutput,
   state: Arc<Mutex<SessionState<C>>>,
   closed: Arc<AtomicBool>,
) {
   let mut lines = BufReader::new(output).lines();
   loop {
      match lines.next_line().await {
         Ok(Some(line)) => {
            trace!("{} <- {}", name, line);
            observe(&name, &state, &EngineMessage::parse(&line));
         }
         Ok(None) => break,
         Err(e) => {
            warn!("failed to read from {}: {}", name, e);
            break;
         }
      }
   }
   debug!("{} closed its output", name);
   let mut slot = state.lock();
   closed.store(true, Ordering::Release);
   // Dropping the reply sender fails whatever is still waiting.
   *slot = SessionState::Idle;
}

fn observe<C: Collector>(name: &str, state: &Mutex<SessionState<C>>, message: &EngineMessage) {
   let mut slot = state.lock();
   let output = match &mut *slot {
      SessionState::AwaitingReply { collector, .. } => collector.observe(message),
      SessionState::Idle => None,
   };
   if let Some(output) = output {
      if let SessionState::AwaitingReply { request_id, reply, .. } = std::mem::replace(&mut *slot, SessionState::Idle) {
         debug!("{} answered request {}", name, request_id);
         if reply.send(output).is_err() {
            debug!("nobody was waiting on request {} any more", request_id);
         }
      }
   }
}

/// An answer an engine still owes. Resolves to `EngineExited` if the engine
/// goes away first.
#[derive(Debug)]
pub struct Pending<T> {
   receiver: oneshot::Receiver<T>,
   engine: String,
   request_id: u64,
}

impl<T> Pending<T> {
   pub fn request_id(&self) -> u64 {
      self.request_id
   }
}

impl<T> Future for Pending<T> {
   type Output = Result<T>;

   fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
      let this = self.get_mut();
      match Pin::new(&mut this.receiver).poll(cx) {
         Poll::Ready(Ok(value)) => Poll::Ready(Ok(value)),
         Poll::Ready(Err(_)) => Poll::Ready(Err(Error::EngineExited {
            engine: this.engine.clone(),
         })),
         Poll::Pending => Poll::Pending,
      }
   }
}

pub struct Session<C: Collector> {
   engine: Arc<EngineDescriptor>,
   skill: u8,
   budget: SearchBudget,
   launcher: Arc<dyn Launcher>,
   state: Arc<Mutex<SessionState<C>>>,
   link: Option<Link>,
   next_request: u64,
}

pub type EngineSession = Session<MoveSearch>;
pub type AnalysisSession = Session<AnalysisSearch>;
pub type PendingMove = Pending<Move>;
pub type PendingAnalysis = Pending<AnalysisResult>;

impl<C: Collector> Session<C> {
   /// Nothing is launched until the first request.
   pub fn new(engine: Arc<EngineDescriptor>, skill: u8, budget: SearchBudget, launcher: Arc<dyn Launcher>) -> Session<C> {
      Session {
         engine,
         skill,
         budget,
         launcher,
         state: Arc::new(Mutex::new(SessionState::Idle)),
         link: None,
         next_request: 0,
      }
   }

   pub fn engine(&self) -> &EngineDescriptor {
      &self.engine
   }

   pub fn is_busy(&self) -> bool {
      matches!(*self.state.lock(), SessionState::AwaitingReply { .. })
   }

   fn link(&mut self) -> Result<&Link> {
      let link = match self.link.take() {
         Some(link) if !link.closed.load(Ordering::Acquire) => link,
         stale => {
            if stale.is_some() {
               info!("{} exited earlier, relaunching", self.engine.name);
            }
            Link::start(&self.engine, self.launcher.as_ref(), self.state.clone())?
         }
      };
      Ok(self.link.insert(link))
   }

   pub fn request(&mut self, position: &Position) -> Result<Pending<C::Output>> {
      if let SessionState::AwaitingReply { request_id, .. } = &*self.state.lock() {
         warn!("{} is busy with request {}, turning away another", self.engine.name, request_id);
         return Err(Error::EngineBusy {
            engine: self.engine.name.clone(),
            pending: *request_id,
         });
      }
      let link = self.link()?;
      let commands = link.commands.clone();
      let closed = link.closed.clone();

      self.next_request += 1;
      let request_id = self.next_request;
      let (reply, receiver) = oneshot::channel();
      {
         let mut slot = self.state.lock();
         // The reader may have hit the end of output since `link()` looked.
         if closed.load(Ordering::Acquire) {
            return Err(Error::EngineExited {
               engine: self.engine.name.clone(),
            });
         }
         *slot = SessionState::AwaitingReply {
            request_id,
            collector: C::for_request(position),
            reply,
         };
      }

      let search = match self.budget {
         SearchBudget::MoveTime(t) => InterfaceMessage::GoTime(t),
         SearchBudget::Depth(d) => InterfaceMessage::GoDepth(d),
      };
      let sequence = [
         InterfaceMessage::Position(position.as_str().to_owned()),
         InterfaceMessage::SkillLevel(self.skill),
         search,
      ];
      for command in sequence {
         if commands.send(command).is_err() {
            *self.state.lock() = SessionState::Idle;
            return Err(Error::EngineExited {
               engine: self.engine.name.clone(),
            });
         }
      }
      debug!("request {} sent to {}", request_id, self.engine.name);
      Ok(Pending {
         receiver,
         engine: self.engine.name.clone(),
         request_id,
      })
   }
}

impl EngineSession {
   pub fn request_move(&mut self, position: &Position) -> Result<PendingMove> {
      self.request(position)
   }
}

impl AnalysisSession {
   /// The helper always runs the roster's first engine at full strength for
   /// a fixed second per position.
   pub fn helper(roster: &EngineRoster, launcher: Arc<dyn Launcher>) -> Result<AnalysisSession> {
      Ok(Session::new(
         roster.helper()?,
         HELPER_SKILL,
         SearchBudget::MoveTime(HELPER_MOVE_TIME),
         launcher,
      ))
   }

   pub fn request_analysis(&mut self, position: &Position) -> Result<PendingAnalysis> {
      self.request(position)
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::testing::ScriptedLauncher;
   use std::time::Duration;

   fn descriptor() -> Arc<EngineDescriptor> {
      Arc::new(EngineDescriptor {
         name: "Scripted".into(),
         path: "scripted".into(),
         args: Vec::new(),
      })
   }

   fn engine_session(launcher: &Arc<ScriptedLauncher>, budget: SearchBudget) -> EngineSession {
      Session::new(descriptor(), 7, budget, launcher.clone())
   }

   #[tokio::test]
   async fn nothing_launches_before_the_first_request() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut session = engine_session(&launcher, SearchBudget::Depth(4));
      assert_eq!(launcher.launches(), 0);
      assert!(!session.is_busy());
      let _pending = session.request_move(&Position::new_game()).unwrap();
      assert_eq!(launcher.launches(), 1);
      assert!(session.is_busy());
   }

   #[tokio::test]
   async fn sends_position_skill_then_search() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut session = engine_session(&launcher, SearchBudget::MoveTime(Duration::from_secs(2)));
      let _pending = session.request_move(&Position::new_game()).unwrap();
      let sent = launcher.engine(0).wait_for_commands(3).await;
      assert_eq!(
         sent,
         vec![
            format!("position fen {}", rules::NEW_GAME),
            "setoption name Skill Level value 7".to_owned(),
            "go movetime 2000".to_owned(),
         ]
      );
   }

   #[tokio::test]
   async fn depth_budget_sends_go_depth() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut session = engine_session(&launcher, SearchBudget::Depth(9));
      let _pending = session.request_move(&Position::new_game()).unwrap();
      let sent = launcher.engine(0).wait_for_commands(3).await;
      assert_eq!(sent[2], "go depth 9");
   }

   #[tokio::test]
   async fn resolves_on_best_move_and_ignores_chatter() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut session = engine_session(&launcher, SearchBudget::Depth(4));
      let pending = session.request_move(&Position::new_game()).unwrap();
      let engine = launcher.engine(0);
      engine.wait_for_commands(3).await;
      engine.say("Stockfish 16 by the Stockfish developers");
      engine.say("info depth 1 score cp 20 pv d2d4");
      engine.say("bestmove (none)");
      engine.say("bestmove g1f3 ponder d7d5");
      let m = pending.await.unwrap();
      assert_eq!(m.to_string(), "g1f3");
      assert!(!session.is_busy());
   }

   #[tokio::test]
   async fn second_request_is_turned_away() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut session = engine_session(&launcher, SearchBudget::Depth(4));
      let first = session.request_move(&Position::new_game()).unwrap();
      let other = rules::apply_san(&Position::new_game(), "e4").unwrap();
      match session.request_move(&other) {
         Err(Error::EngineBusy { pending, .. }) => assert_eq!(pending, first.request_id()),
         Err(e) => panic!("expected busy, got {}", e),
         Ok(_) => panic!("expected busy, got a second request"),
      }

      let engine = launcher.engine(0);
      // only the first request reached the engine
      assert_eq!(engine.wait_for_commands(3).await.len(), 3);
      tokio::time::sleep(Duration::from_millis(20)).await;
      assert_eq!(engine.received().len(), 3);

      engine.say("bestmove e2e4");
      assert_eq!(first.await.unwrap().to_string(), "e2e4");

      // and the session takes requests again afterwards
      let again = session.request_move(&other).unwrap();
      assert_eq!(again.request_id(), 2);
      assert_eq!(engine.wait_for_commands(6).await[3], format!("position fen {}", other));
   }

   #[tokio::test]
   async fn hang_up_fails_the_pending_request() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut session = engine_session(&launcher, SearchBudget::Depth(4));
      let pending = session.request_move(&Position::new_game()).unwrap();
      launcher.engine(0).wait_for_commands(3).await;
      launcher.engine(0).hang_up();
      assert!(matches!(pending.await, Err(Error::EngineExited { .. })));
      assert!(!session.is_busy());
   }

   #[tokio::test]
   async fn exited_engine_is_relaunched() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut session = engine_session(&launcher, SearchBudget::Depth(4));
      let pending = session.request_move(&Position::new_game()).unwrap();
      launcher.engine(0).hang_up();
      assert!(pending.await.is_err());

      let pending = session.request_move(&Position::new_game()).unwrap();
      assert_eq!(launcher.launches(), 2);
      launcher.engine(1).wait_for_commands(3).await;
      launcher.engine(1).say("bestmove d2d4");
      assert_eq!(pending.await.unwrap().to_string(), "d2d4");
   }

   #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
   async fn request_right_after_exit_never_reuses_the_dead_engine() {
      for _ in 0..50 {
         let launcher = Arc::new(ScriptedLauncher::silent());
         let mut session = engine_session(&launcher, SearchBudget::Depth(4));
         let pending = session.request_move(&Position::new_game()).unwrap();
         launcher.engine(0).hang_up();
         assert!(matches!(pending.await, Err(Error::EngineExited { .. })));
         assert!(session.link.as_ref().unwrap().closed.load(Ordering::Acquire));

         let pending = session.request_move(&Position::new_game()).unwrap();
         assert_eq!(launcher.launches(), 2);
         launcher.engine(1).wait_for_commands(3).await;
         launcher.engine(1).say("bestmove e2e4");
         let answered = tokio::time::timeout(Duration::from_secs(5), pending).await;
         assert_eq!(answered.unwrap().unwrap().to_string(), "e2e4");
      }
   }

   #[tokio::test]
   async fn launch_failure_is_reported() {
      let launcher = Arc::new(ScriptedLauncher::failing());
      let mut session = engine_session(&launcher, SearchBudget::Depth(4));
      assert!(matches!(
         session.request_move(&Position::new_game()),
         Err(Error::EngineLaunch { .. })
      ));
      assert!(!session.is_busy());
   }

   #[tokio::test]
   async fn analysis_keeps_last_score_and_deepest_line_first() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut helper = AnalysisSession::helper(&EngineRoster::default(), launcher.clone()).unwrap();
      assert_eq!(helper.engine().name, "Stockfish");
      let pending = helper.request_analysis(&Position::new_game()).unwrap();
      let engine = launcher.engine(0);
      let sent = engine.wait_for_commands(3).await;
      assert_eq!(sent[1], "setoption name Skill Level value 20");
      assert_eq!(sent[2], "go movetime 1000");

      engine.say("info depth 1 score cp 30 pv e2e4 e7e5");
      engine.say("info depth 2 score cp 45 pv d2d4 d7d5");
      engine.say("info depth 2 nodes 5000 nps 100000");
      engine.say("bestmove d2d4");
      let analysis = pending.await.unwrap();
      assert_eq!(analysis.score, Score::Centipawns(45));
      assert_eq!(analysis.moves, vec![Square::D2, Square::D4, Square::E2, Square::E4]);
   }

   #[tokio::test]
   async fn analysis_drops_repeated_squares_and_starts_fresh() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut helper = AnalysisSession::helper(&EngineRoster::default(), launcher.clone()).unwrap();
      let pending = helper.request_analysis(&Position::new_game()).unwrap();
      let engine = launcher.engine(0);
      engine.wait_for_commands(3).await;
      engine.say("info depth 1 score cp 10 pv e2e4");
      engine.say("info depth 2 score cp 12 pv g1f3");
      engine.say("info depth 3 score cp 15 pv e2e4");
      engine.say("bestmove e2e4");
      let analysis = pending.await.unwrap();
      assert_eq!(analysis.moves, vec![Square::E2, Square::E4, Square::G1, Square::F3]);
      assert_eq!(analysis.score, Score::Centipawns(15));

      let pending = helper.request_analysis(&Position::new_game()).unwrap();
      engine.wait_for_commands(6).await;
      engine.say("bestmove e2e4");
      let analysis = pending.await.unwrap();
      assert!(analysis.moves.is_empty());
      assert_eq!(analysis.score, Score::Centipawns(0));
   }

   #[tokio::test]
   async fn analysis_scores_favour_white() {
      let launcher = Arc::new(ScriptedLauncher::silent());
      let mut helper = AnalysisSession::helper(&EngineRoster::default(), launcher.clone()).unwrap();
      let black_to_move = rules::apply_san(&Position::new_game(), "e4").unwrap();
      let pending = helper.request_analysis(&black_to_move).unwrap();
      let engine = launcher.engine(0);
      engine.wait_for_commands(3).await;
      engine.say("info depth 12 score cp 35 pv c7c5 g1f3");
      engine.say("bestmove c7c5");
      assert_eq!(pending.await.unwrap().score, Score::Centipawns(-35));
   }
}
