use crate::config::{BotProfile, EngineBinding, EngineRoster};
use crate::engine::{AnalysisResult, AnalysisSession, EngineSession, Launcher, PendingAnalysis, PendingMove, ProcessLauncher};
use crate::error::{Error, Result};
use crate::rules::{self, Color, GameOutcome, Move, MoveRecord, Position, PromotionTarget, Square};
use fxhash::FxHashMap;
use log::{debug, info};
use std::collections::hash_map::Entry;
use std::sync::Arc;

/// One game: the move log, the position it leads to, and who plays each side.
pub struct Game {
   roster: Arc<EngineRoster>,
   launcher: Arc<dyn Launcher>,
   white: EngineBinding,
   black: EngineBinding,
   // keyed by profile so rebinding a side never tears down a busy engine
   sessions: FxHashMap<BotProfile, EngineSession>,
   helper: Option<AnalysisSession>,
   log: Vec<String>,
   position: Position,
   last_analysis: Option<AnalysisResult>,
}

impl Game {
   pub fn new(roster: Arc<EngineRoster>) -> Game {
      Game::with_launcher(roster, Arc::new(ProcessLauncher))
   }

   pub fn with_launcher(roster: Arc<EngineRoster>, launcher: Arc<dyn Launcher>) -> Game {
      Game {
         roster,
         launcher,
         white: EngineBinding::Human,
         black: EngineBinding::Human,
         sessions: FxHashMap::default(),
         helper: None,
         log: Vec::new(),
         position: Position::new_game(),
         last_analysis: None,
      }
   }

   pub fn set_binding(&mut self, side: Color, binding: EngineBinding) -> Result<()> {
      if let EngineBinding::Bot(profile) = &binding {
         self.roster.find(&profile.engine)?;
      }
      info!("{:?} is now played by {}", side, binding.label());
      match side {
         Color::White => self.white = binding,
         Color::Black => self.black = binding,
      }
      Ok(())
   }

   pub fn binding(&self, side: Color) -> &EngineBinding {
      match side {
         Color::White => &self.white,
         Color::Black => &self.black,
      }
   }

   pub fn log(&self) -> &[String] {
      &self.log
   }

   pub fn position(&self) -> &Position {
      &self.position
   }

   pub fn side_to_move(&self) -> Color {
      rules::side_to_move(&self.position)
   }

   pub fn last_analysis(&self) -> Option<&AnalysisResult> {
      self.last_analysis.as_ref()
   }

   /// A result token in the log wins over what the board says.
   pub fn result(&self) -> GameOutcome {
      rules::game_result_from_log(self.log.as_slice()).unwrap_or_else(|| rules::outcome(&self.position))
   }

   pub fn is_over(&self) -> bool {
      self.result() != GameOutcome::Ongoing
   }

   pub fn is_thinking(&self) -> bool {
      self.sessions.values().any(|s| s.is_busy())
   }

   pub fn legal_moves(&self, from: Square) -> Vec<Square> {
      rules::legal_moves(&self.position, from)
   }

   /// Asks the engine bound to the side to move for a move. `None` when a
   /// human is to move or the game is over.
   pub fn request_move(&mut self) -> Result<Option<PendingMove>> {
      if self.is_over() {
         return Ok(None);
      }
      let profile = match self.binding(self.side_to_move()) {
         EngineBinding::Human => return Ok(None),
         EngineBinding::Bot(profile) => profile.clone(),
      };
      let session = match self.sessions.entry(profile) {
         Entry::Occupied(e) => e.into_mut(),
         Entry::Vacant(e) => {
            let engine = self.roster.find(&e.key().engine)?;
            let profile = e.key();
            let session = EngineSession::new(engine, profile.skill, profile.budget, self.launcher.clone());
            e.insert(session)
         }
      };
      session.request_move(&self.position).map(Some)
   }

   fn ensure_ongoing(&self) -> Result<()> {
      match self.result() {
         GameOutcome::Ongoing => Ok(()),
         decided => Err(Error::GameAlreadyDecided(decided)),
      }
   }

   fn append(&mut self, record: MoveRecord) -> MoveRecord {
      info!("{}. {}", self.log.len() + 1, record.san);
      self.log.push(record.san.clone());
      self.position = record.position.clone();
      record
   }

   pub fn accept_move(&mut self, m: Move) -> Result<MoveRecord> {
      self.ensure_ongoing()?;
      let record = rules::apply_move(&self.position, m.origin, m.destination, m.promotion)?;
      Ok(self.append(record))
   }

   pub fn play(&mut self, origin: Square, destination: Square, promotion: Option<PromotionTarget>) -> Result<MoveRecord> {
      self.accept_move(Move {
         origin,
         destination,
         promotion,
      })
   }

   pub fn play_san(&mut self, san: &str) -> Result<MoveRecord> {
      self.ensure_ongoing()?;
      let record = rules::play_san(&self.position, san)?;
      Ok(self.append(record))
   }

   /// Requests, awaits and plays the bound engine's move.
   pub async fn play_engine_move(&mut self) -> Result<Option<MoveRecord>> {
      let pending = match self.request_move()? {
         Some(pending) => pending,
         None => return Ok(None),
      };
      let m = pending.await?;
      debug!("engine chose {}", m);
      self.accept_move(m).map(Some)
   }

   pub fn undo_last_move(&mut self) -> Result<()> {
      self.truncate(self.log.len().saturating_sub(1))
   }

   /// Keeps the first `len` log entries. The log is only touched once the
   /// shorter log has replayed cleanly.
   pub fn truncate(&mut self, len: usize) -> Result<()> {
      let len = len.min(self.log.len());
      let position = rules::replay(&self.log[..len], None)?;
      self.log.truncate(len);
      self.position = position;
      self.last_analysis = None;
      debug!("log truncated to {} entries", len);
      Ok(())
   }

   pub fn record_manual_outcome(&mut self, outcome: GameOutcome) -> Result<()> {
      let marker = outcome.terminal_marker().ok_or(Error::NotAResult)?;
      self.ensure_ongoing()?;
      info!("result recorded: {}", marker);
      self.log.push(marker.to_owned());
      Ok(())
   }

   pub fn analyze(&mut self) -> Result<PendingAnalysis> {
      let helper = match self.helper.take() {
         Some(helper) => helper,
         None => AnalysisSession::helper(&self.roster, self.launcher.clone())?,
      };
      self.helper.insert(helper).request_analysis(&self.position)
   }

   /// Analyses the current position and keeps the answer as `last_analysis`.
   pub async fn run_analysis(&mut self) -> Result<&AnalysisResult> {
      let analysis = self.analyze()?.await?;
      Ok(self.last_analysis.insert(analysis))
   }
}
