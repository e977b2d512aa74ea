use crate::rules::{Color, Move, Square};
use smallvec::SmallVec;
use std::fmt;
use std::time::Duration;

// Engine text protocol

/// Centipawn value standing in for a forced mate when a single number is needed.
pub const MATE_SENTINEL: i32 = 10_000;

// Interface to Engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterfaceMessage {
   Position(String), // Full state update, exchange format
   SkillLevel(u8),
   GoTime(Duration),
   GoDepth(u32), // Calculate until depth and respond with the best move
}

impl fmt::Display for InterfaceMessage {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      match self {
         InterfaceMessage::Position(text) => write!(f, "position fen {}", text),
         InterfaceMessage::SkillLevel(skill) => write!(f, "setoption name Skill Level value {}", skill),
         InterfaceMessage::GoTime(budget) => write!(f, "go movetime {}", budget.as_millis()),
         InterfaceMessage::GoDepth(depth) => write!(f, "go depth {}", depth),
      }
   }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Score {
   Centipawns(i32),
   Mate(i32),
}

impl Score {
   /// Engines report from the mover's point of view; flip it so that
   /// positive always favours white.
   pub fn for_white(self, side_to_move: Color) -> Score {
      match (side_to_move, self) {
         (Color::White, score) => score,
         (Color::Black, Score::Centipawns(cp)) => Score::Centipawns(-cp),
         (Color::Black, Score::Mate(n)) => Score::Mate(-n),
      }
   }

   pub fn centipawns(self) -> i32 {
      match self {
         Score::Centipawns(cp) => cp,
         Score::Mate(n) if n < 0 => -MATE_SENTINEL,
         Score::Mate(_) => MATE_SENTINEL,
      }
   }
}

impl fmt::Display for Score {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      match self {
         Score::Centipawns(cp) => write!(f, "{:+.2}", f64::from(*cp) / 100.0),
         Score::Mate(n) => write!(f, "#{}", n),
      }
   }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchInfo {
   pub score: Score,
   pub pv: (Square, Square),
}

// Engine to Interface
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineMessage {
   BestMove(Option<Move>),
   Info(SearchInfo),
   Other,
}

impl EngineMessage {
   pub fn parse(line: &str) -> EngineMessage {
      let tokens: SmallVec<[&str; 32]> = line.split_whitespace().collect();
      match tokens.first() {
         Some(&"bestmove") => EngineMessage::BestMove(tokens.get(1).and_then(|m| parse_move(m))),
         Some(&"info") => parse_info(&tokens[1..]).map_or(EngineMessage::Other, EngineMessage::Info),
         _ => EngineMessage::Other,
      }
   }
}

/// Engines say `(none)` or `0000` when there is nothing to play.
fn parse_move(token: &str) -> Option<Move> {
   token.parse().ok()
}

fn value_after<'a>(tokens: &[&'a str], key: &str) -> Option<&'a str> {
   let at = tokens.iter().position(|t| *t == key)?;
   tokens.get(at + 1).copied()
}

fn parse_info(tokens: &[&str]) -> Option<SearchInfo> {
   let cp = tokens.iter().position(|t| *t == "cp");
   let mate = tokens.iter().position(|t| *t == "mate");
   let score = match (cp, mate) {
      (Some(c), Some(m)) if m < c => Score::Mate(tokens.get(m + 1)?.parse().ok()?),
      (Some(c), _) => Score::Centipawns(tokens.get(c + 1)?.parse().ok()?),
      (None, Some(m)) => Score::Mate(tokens.get(m + 1)?.parse().ok()?),
      (None, None) => return None,
   };
   let first = value_after(tokens, "pv")?;
   let origin = first.get(..2)?.parse().ok()?;
   let destination = first.get(2..4)?.parse().ok()?;
   Some(SearchInfo {
      score,
      pv: (origin, destination),
   })
}
