mod console;

use anyhow::Context;
use chessarb_lib::config::{EngineBinding, EngineRoster};
use log::{info, warn};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

/// Referee games between UCI engines and humans
#[derive(StructOpt, Debug)]
#[structopt(name = "chessarb")]
struct Opt {
   /// JSON list of {"name", "path", "args"} engines. Defaults to $CHESSARB_ENGINES, then Stockfish and Lozza from PATH
   #[structopt(short = "e", long = "engines", parse(from_os_str))]
   engines: Option<PathBuf>,
   /// Who plays white: Human, or Bot:<engine>:<skill>:<seconds>: / Bot:<engine>:<skill>::<depth>
   #[structopt(short = "w", long = "white", default_value = "Human")]
   white: EngineBinding,
   /// Who plays black, in the same form as --white
   #[structopt(short = "b", long = "black", default_value = "Bot:Stockfish:20:1:")]
   black: EngineBinding,
   /// Adjudicate a draw once the log reaches this many half-moves
   #[structopt(long = "max-plies", default_value = "400")]
   max_plies: usize,
   /// Print the helper engine's evaluation before every move
   #[structopt(short = "a", long = "analyze")]
   analyze: bool,
   /// Print a JSON summary of the game when it ends
   #[structopt(long = "json")]
   json: bool,
}

fn load_roster(flag: Option<PathBuf>) -> anyhow::Result<EngineRoster> {
   let env_path = match env::var("CHESSARB_ENGINES") {
      Ok(path) => Some(PathBuf::from(path)),
      Err(env::VarError::NotPresent) => None,
      Err(env::VarError::NotUnicode(_)) => {
         warn!("CHESSARB_ENGINES is set, but with invalid unicode. Ignoring.");
         None
      }
   };

   match flag.or(env_path) {
      Some(path) => {
         info!("Reading engine roster from {}", path.display());
         EngineRoster::load(&path).with_context(|| format!("couldn't load engine roster {}", path.display()))
      }
      None => Ok(EngineRoster::default()),
   }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
   pretty_env_logger::init();
   let opt = Opt::from_args();

   let roster = Arc::new(load_roster(opt.engines)?);
   let summary = console::main_loop(
      roster,
      console::Settings {
         white: opt.white,
         black: opt.black,
         max_plies: opt.max_plies,
         analyze: opt.analyze,
      },
   )
   .await?;

   println!("{}", summary.result);
   if opt.json {
      println!("{}", serde_json::to_string_pretty(&summary)?);
   }
   Ok(())
}
