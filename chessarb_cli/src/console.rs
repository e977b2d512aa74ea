use anyhow::{anyhow, Context};
use chessarb_lib::config::{EngineBinding, EngineRoster};
use chessarb_lib::game::Game;
use chessarb_lib::rules::{Color, GameOutcome, Move};
use chessarb_lib::Error;
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

pub struct Settings {
   pub white: EngineBinding,
   pub black: EngineBinding,
   pub max_plies: usize,
   pub analyze: bool,
}

#[derive(Debug, Serialize)]
pub struct Summary {
   pub white: String,
   pub black: String,
   pub moves: Vec<String>,
   pub result: String,
   pub final_position: String,
}

enum Command {
   Undo,
   Resign,
   Draw,
   Move(String),
}

impl Command {
   fn parse(line: &str) -> Option<Command> {
      let line = line.trim();
      match line {
         "" => None,
         "undo" => Some(Command::Undo),
         "resign" => Some(Command::Resign),
         "draw" => Some(Command::Draw),
         other => Some(Command::Move(other.to_owned())),
      }
   }
}

fn side_name(side: Color) -> &'static str {
   match side {
      Color::White => "White",
      Color::Black => "Black",
   }
}

pub async fn main_loop(roster: Arc<EngineRoster>, settings: Settings) -> anyhow::Result<Summary> {
   let mut game = Game::new(roster);
   game.set_binding(Color::White, settings.white)?;
   game.set_binding(Color::Black, settings.black)?;
   info!(
      "{} (white) vs {} (black)",
      game.binding(Color::White).label(),
      game.binding(Color::Black).label()
   );

   let mut input = BufReader::new(tokio::io::stdin()).lines();
   while !game.is_over() {
      if game.log().len() >= settings.max_plies {
         info!("Reached {} half-moves, calling it a draw", settings.max_plies);
         game.record_manual_outcome(GameOutcome::Draw)?;
         break;
      }

      if settings.analyze {
         match game.run_analysis().await {
            Ok(analysis) => {
               let squares: Vec<String> = analysis.moves.iter().map(|s| s.to_string()).collect();
               println!("  eval {} [{}]", analysis.score, squares.join(" "));
            }
            Err(e) => warn!("Analysis failed, carrying on without it: {}", e),
         }
      }

      let side = game.side_to_move();
      if game.binding(side).is_human() {
         human_turn(&mut game, &mut input, side).await?;
      } else {
         trace!("{} to move, asking the engine", side_name(side));
         let record = game
            .play_engine_move()
            .await
            .with_context(|| format!("{} engine failed to move", side_name(side)))?
            .ok_or_else(|| anyhow!("{} engine was asked to move in a finished game", side_name(side)))?;
         println!("{}. {}", game.log().len(), record.san);
      }
   }

   let result = game.result();
   debug!("Game over after {} log entries", game.log().len());
   Ok(Summary {
      white: game.binding(Color::White).to_string(),
      black: game.binding(Color::Black).to_string(),
      moves: game.log().to_vec(),
      result: match result.terminal_marker() {
         Some(marker) => format!("{} ({})", result, marker),
         None => result.to_string(),
      },
      final_position: game.position().to_string(),
   })
}

async fn human_turn(game: &mut Game, input: &mut Lines<BufReader<Stdin>>, side: Color) -> anyhow::Result<()> {
   loop {
      println!("{} to move (SAN, e2e4, undo, resign or draw):", side_name(side));
      let line = input
         .next_line()
         .await
         .context("couldn't read from stdin")?
         .ok_or_else(|| anyhow!("stdin closed while waiting for {}'s move", side_name(side)))?;
      let command = match Command::parse(&line) {
         Some(command) => command,
         None => continue,
      };
      match command {
         Command::Undo => {
            // take back until a human is to move again
            game.undo_last_move()?;
            while !game.log().is_empty() && !game.binding(game.side_to_move()).is_human() {
               game.undo_last_move()?;
            }
            println!("Back to move {}", game.log().len() + 1);
            return Ok(());
         }
         Command::Resign => {
            game.record_manual_outcome(GameOutcome::winner(!side))?;
            return Ok(());
         }
         Command::Draw => {
            game.record_manual_outcome(GameOutcome::Draw)?;
            return Ok(());
         }
         Command::Move(text) => {
            let played = match text.parse::<Move>() {
               Ok(m) => game.accept_move(m),
               Err(_) => game.play_san(&text),
            };
            match played {
               Ok(record) => {
                  println!("{}. {}", game.log().len(), record.san);
                  return Ok(());
               }
               Err(e @ Error::MoveRejected { .. }) | Err(e @ Error::InvalidSan(_)) => {
                  println!("{}", e);
               }
               Err(e) => return Err(e.into()),
            }
         }
      }
   }
}
