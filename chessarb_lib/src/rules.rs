use crate::error::{Error, Result};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Outcome, Position as _, Rank, Role};
use std::fmt;
use std::str::FromStr;

pub use shakmaty::{Color, Square};

pub const NEW_GAME: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

pub const WHITE_WINS: &str = "1-0";
pub const BLACK_WINS: &str = "0-1";
pub const DRAWN: &str = "1/2-1/2";

/// A validated position in the six-field exchange format.
///
/// The text is kept exactly as it was produced or received; the parsed
/// state rides along so queries don't have to reparse.
#[derive(Clone)]
pub struct Position {
   text: String,
   state: Chess,
}

impl Position {
   pub fn new_game() -> Position {
      Position {
         text: NEW_GAME.to_owned(),
         state: Chess::default(),
      }
   }

   fn from_state(state: Chess) -> Position {
      let text = Fen::from_position(state.clone(), EnPassantMode::Legal).to_string();
      Position { text, state }
   }

   pub fn as_str(&self) -> &str {
      &self.text
   }

   pub fn placement(&self) -> &str {
      self.text.split(' ').next().unwrap_or("")
   }
}

impl FromStr for Position {
   type Err = Error;

   fn from_str(s: &str) -> Result<Position> {
      let text = s.trim();
      let fen: Fen = text
         .parse()
         .map_err(|e| Error::MalformedPosition(format!("{} ({})", text, e)))?;
      let state: Chess = fen
         .into_position(CastlingMode::Standard)
         .map_err(|e| Error::MalformedPosition(format!("{} ({})", text, e)))?;
      Ok(Position {
         text: text.to_owned(),
         state,
      })
   }
}

impl PartialEq for Position {
   fn eq(&self, other: &Position) -> bool {
      self.text == other.text
   }
}

impl Eq for Position {}

impl fmt::Display for Position {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      f.write_str(&self.text)
   }
}

impl fmt::Debug for Position {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      write!(f, "Position({})", self.text)
   }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PromotionTarget {
   Knight,
   Bishop,
   Rook,
   #[default]
   Queen,
}

impl PromotionTarget {
   fn role(self) -> Role {
      match self {
         PromotionTarget::Knight => Role::Knight,
         PromotionTarget::Bishop => Role::Bishop,
         PromotionTarget::Rook => Role::Rook,
         PromotionTarget::Queen => Role::Queen,
      }
   }
}

impl fmt::Display for PromotionTarget {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      let display = match self {
         PromotionTarget::Knight => "n",
         PromotionTarget::Bishop => "b",
         PromotionTarget::Rook => "r",
         PromotionTarget::Queen => "q",
      };
      write!(f, "{}", display)
   }
}

impl FromStr for PromotionTarget {
   type Err = Error;

   fn from_str(s: &str) -> Result<PromotionTarget> {
      match s {
         "n" => Ok(PromotionTarget::Knight),
         "b" => Ok(PromotionTarget::Bishop),
         "r" => Ok(PromotionTarget::Rook),
         "q" => Ok(PromotionTarget::Queen),
         _ => Err(Error::MalformedMove(format!("expected one of nbrq for promotion target, got {}", s))),
      }
   }
}

/// A square pair as engines and board widgets speak it, e.g. `e7e8q`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Move {
   pub origin: Square,
   pub destination: Square,
   pub promotion: Option<PromotionTarget>,
}

impl fmt::Display for Move {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      write!(f, "{}{}", self.origin, self.destination)?;
      if let Some(promotion) = self.promotion {
         write!(f, "{}", promotion)?;
      }
      Ok(())
   }
}

impl FromStr for Move {
   type Err = Error;

   fn from_str(s: &str) -> Result<Move> {
      if s.len() < 4 || s.len() > 5 || !s.is_ascii() {
         return Err(Error::MalformedMove(format!(
            "a move has to be 4-5 ASCII bytes long, got {}",
            s
         )));
      }
      let square = |label: &str| {
         label
            .parse::<Square>()
            .map_err(|_| Error::MalformedMove(format!("{} is not a square in {}", label, s)))
      };
      Ok(Move {
         origin: square(&s[..2])?,
         destination: square(&s[2..4])?,
         promotion: s.get(4..5).map(str::parse::<PromotionTarget>).transpose()?,
      })
   }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveRecord {
   pub san: String,
   pub position: Position,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GameOutcome {
   White,
   Black,
   Draw,
   Ongoing,
}

impl GameOutcome {
   pub fn winner(color: Color) -> GameOutcome {
      match color {
         Color::White => GameOutcome::White,
         Color::Black => GameOutcome::Black,
      }
   }

   /// The move log token that records this result, if it is one.
   pub fn terminal_marker(self) -> Option<&'static str> {
      match self {
         GameOutcome::White => Some(WHITE_WINS),
         GameOutcome::Black => Some(BLACK_WINS),
         GameOutcome::Draw => Some(DRAWN),
         GameOutcome::Ongoing => None,
      }
   }
}

impl fmt::Display for GameOutcome {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      let label = match self {
         GameOutcome::White => "White",
         GameOutcome::Black => "Black",
         GameOutcome::Draw => "Draw",
         GameOutcome::Ongoing => "Ongoing",
      };
      f.write_str(label)
   }
}

pub fn is_new_game(pos: &Position) -> bool {
   pos.text == NEW_GAME
}

pub fn side_to_move(pos: &Position) -> Color {
   pos.state.turn()
}

pub fn in_check(pos: &Position) -> bool {
   pos.state.is_check()
}

pub fn is_game_over(pos: &Position) -> bool {
   outcome(pos) != GameOutcome::Ongoing
}

pub fn outcome(pos: &Position) -> GameOutcome {
   match pos.state.outcome() {
      Some(Outcome::Decisive { winner }) => GameOutcome::winner(winner),
      Some(Outcome::Draw) => GameOutcome::Draw,
      None if pos.state.halfmoves() >= 100 => GameOutcome::Draw,
      None => GameOutcome::Ongoing,
   }
}

/// Origin and destination of a library move, with castling reported as the
/// king's two-square step rather than king-takes-rook.
fn endpoints(m: &shakmaty::Move) -> Option<(Square, Square)> {
   match m.to_uci(CastlingMode::Standard) {
      UciMove::Normal { from, to, .. } => Some((from, to)),
      _ => None,
   }
}

pub fn legal_moves(pos: &Position, from: Square) -> Vec<Square> {
   let mut destinations = Vec::new();
   for m in pos.state.legal_moves() {
      if let Some((origin, destination)) = endpoints(&m) {
         if origin == from && !destinations.contains(&destination) {
            destinations.push(destination);
         }
      }
   }
   destinations
}

pub fn is_moveable(pos: &Position, from: Square) -> bool {
   !legal_moves(pos, from).is_empty()
}

pub fn apply_move(
   pos: &Position,
   origin: Square,
   destination: Square,
   promotion: Option<PromotionTarget>,
) -> Result<MoveRecord> {
   let promotes = pos.state.board().piece_at(origin).map_or(false, |p| p.role == Role::Pawn)
      && matches!(destination.rank(), Rank::First | Rank::Eighth);
   let uci = UciMove::Normal {
      from: origin,
      to: destination,
      promotion: if promotes {
         Some(promotion.unwrap_or_default().role())
      } else {
         None
      },
   };
   let m = uci
      .to_move(&pos.state)
      .map_err(|_| Error::MoveRejected { origin, destination })?;
   Ok(play(pos, &m))
}

fn play(pos: &Position, m: &shakmaty::Move) -> MoveRecord {
   let mut state = pos.state.clone();
   let san = SanPlus::from_move_and_play_unchecked(&mut state, m);
   MoveRecord {
      san: san.to_string(),
      position: Position::from_state(state),
   }
}

fn san_to_move(pos: &Position, san: &str) -> Result<shakmaty::Move> {
   let parsed: SanPlus = san.parse().map_err(|_| Error::InvalidSan(san.to_owned()))?;
   parsed
      .san
      .to_move(&pos.state)
      .map_err(|_| Error::InvalidSan(san.to_owned()))
}

/// Like [`apply_san`], but also reports the move as the library renders it.
pub fn play_san(pos: &Position, san: &str) -> Result<MoveRecord> {
   let m = san_to_move(pos, san)?;
   Ok(play(pos, &m))
}

pub fn apply_san(pos: &Position, san: &str) -> Result<Position> {
   play_san(pos, san).map(|record| record.position)
}

pub fn is_terminal_marker(entry: &str) -> bool {
   entry == WHITE_WINS || entry == BLACK_WINS || entry == DRAWN
}

pub fn is_end_move(entry: &str) -> bool {
   is_terminal_marker(entry) || entry.ends_with('#')
}

/// Rebuilds the position after `log[..=upto]` (the whole log by default)
/// starting from the initial position. A result token ends the replay.
///
/// An unplayable entry means the log itself is corrupt; the error is not
/// worth retrying with the same log.
pub fn replay<S: AsRef<str>>(log: &[S], upto: Option<usize>) -> Result<Position> {
   let count = upto.map_or(log.len(), |i| (i + 1).min(log.len()));
   let mut position = Position::new_game();
   for entry in &log[..count] {
      let entry = entry.as_ref();
      if is_terminal_marker(entry) {
         break;
      }
      position = apply_san(&position, entry)?;
   }
   Ok(position)
}

/// Squares touched by each candidate, every candidate tried against `pos`
/// itself. Unplayable candidates are skipped.
pub fn find_touched_squares<S: AsRef<str>>(candidates: &[S], pos: &Position) -> Vec<Square> {
   let mut squares = Vec::new();
   for san in candidates {
      let endpoints = san_to_move(pos, san.as_ref()).ok().and_then(|m| endpoints(&m));
      if let Some((origin, destination)) = endpoints {
         for square in [origin, destination] {
            if !squares.contains(&square) {
               squares.push(square);
            }
         }
      }
   }
   squares
}

/// Reads the result off the last log entry only. A mating SAN belongs to
/// whoever just moved: white plays the odd-numbered entries.
pub fn game_result_from_log<S: AsRef<str>>(log: &[S]) -> Option<GameOutcome> {
   let last = log.last()?.as_ref();
   match last {
      WHITE_WINS => Some(GameOutcome::White),
      BLACK_WINS => Some(GameOutcome::Black),
      DRAWN => Some(GameOutcome::Draw),
      san if san.ends_with('#') => {
         if log.len() % 2 == 0 {
            Some(GameOutcome::Black)
         } else {
            Some(GameOutcome::White)
         }
      }
      _ => None,
   }
}
