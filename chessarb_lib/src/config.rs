use crate::error::{Error, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Skill level the analysis helper always plays at.
pub const HELPER_SKILL: u8 = 20;
pub const HELPER_MOVE_TIME: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDescriptor {
   pub name: String,
   pub path: PathBuf,
   #[serde(default)]
   pub args: Vec<String>,
}

/// The engines a game may bind to, fixed at startup.
#[derive(Clone, Debug)]
pub struct EngineRoster {
   engines: Vec<Arc<EngineDescriptor>>,
}

impl EngineRoster {
   pub fn new(engines: Vec<EngineDescriptor>) -> EngineRoster {
      EngineRoster {
         engines: engines.into_iter().map(Arc::new).collect(),
      }
   }

   pub fn from_json(text: &str) -> Result<EngineRoster> {
      let engines: Vec<EngineDescriptor> = serde_json::from_str(text)?;
      if engines.is_empty() {
         return Err(<serde_json::Error as serde::de::Error>::custom("roster lists no engines").into());
      }
      Ok(EngineRoster::new(engines))
   }

   pub fn load(path: &Path) -> Result<EngineRoster> {
      let text = std::fs::read_to_string(path).map_err(|source| Error::RosterFile {
         path: path.to_owned(),
         source,
      })?;
      let roster = EngineRoster::from_json(&text)?;
      info!("loaded {} engines from {}", roster.engines.len(), path.display());
      Ok(roster)
   }

   pub fn find(&self, name: &str) -> Result<Arc<EngineDescriptor>> {
      self
         .engines
         .iter()
         .find(|e| e.name == name)
         .cloned()
         .ok_or_else(|| Error::UnknownEngine(name.to_owned()))
   }

   /// The analysis helper runs on the first engine listed.
   pub fn helper(&self) -> Result<Arc<EngineDescriptor>> {
      self
         .engines
         .first()
         .cloned()
         .ok_or_else(|| Error::UnknownEngine("<analysis helper>".to_owned()))
   }

   pub fn engines(&self) -> impl Iterator<Item = &EngineDescriptor> {
      self.engines.iter().map(|e| e.as_ref())
   }
}

impl Default for EngineRoster {
   fn default() -> EngineRoster {
      debug!("using the built-in engine roster");
      EngineRoster::new(vec![
         EngineDescriptor {
            name: "Stockfish".into(),
            path: "stockfish".into(),
            args: Vec::new(),
         },
         EngineDescriptor {
            name: "Lozza".into(),
            path: "lozza".into(),
            args: Vec::new(),
         },
      ])
   }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchBudget {
   MoveTime(Duration),
   Depth(u32),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BotProfile {
   pub engine: String,
   pub skill: u8,
   pub budget: SearchBudget,
}

impl BotProfile {
   /// Human-facing name, e.g. `Stockfish skill=5 time=3`.
   pub fn label(&self) -> String {
      match self.budget {
         SearchBudget::MoveTime(t) => format!("{} skill={} time={}", self.engine, self.skill, t.as_secs()),
         SearchBudget::Depth(d) => format!("{} skill={} depth={}", self.engine, self.skill, d),
      }
   }
}

impl fmt::Display for BotProfile {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      match self.budget {
         SearchBudget::MoveTime(t) => write!(f, "Bot:{}:{}:{}:", self.engine, self.skill, t.as_secs()),
         SearchBudget::Depth(d) => write!(f, "Bot:{}:{}::{}", self.engine, self.skill, d),
      }
   }
}

impl FromStr for BotProfile {
   type Err = Error;

   fn from_str(s: &str) -> Result<BotProfile> {
      let invalid = || Error::InvalidBinding(s.to_owned());
      let fields: Vec<&str> = s.split(':').collect();
      let (engine, skill, time, depth) = match fields.as_slice() {
         ["Bot", engine, skill, time, depth] => (*engine, *skill, *time, *depth),
         _ => return Err(invalid()),
      };
      if engine.is_empty() {
         return Err(invalid());
      }
      let skill = skill.parse().map_err(|_| invalid())?;
      let budget = match (time, depth) {
         (t, "") if !t.is_empty() => SearchBudget::MoveTime(Duration::from_secs(t.parse().map_err(|_| invalid())?)),
         ("", d) if !d.is_empty() => SearchBudget::Depth(d.parse().map_err(|_| invalid())?),
         _ => return Err(invalid()),
      };
      Ok(BotProfile {
         engine: engine.to_owned(),
         skill,
         budget,
      })
   }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EngineBinding {
   Human,
   Bot(BotProfile),
}

impl EngineBinding {
   pub fn is_human(&self) -> bool {
      matches!(self, EngineBinding::Human)
   }

   pub fn label(&self) -> String {
      match self {
         EngineBinding::Human => "Human".to_owned(),
         EngineBinding::Bot(profile) => profile.label(),
      }
   }
}

impl fmt::Display for EngineBinding {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      match self {
         EngineBinding::Human => f.write_str("Human"),
         EngineBinding::Bot(profile) => write!(f, "{}", profile),
      }
   }
}

impl FromStr for EngineBinding {
   type Err = Error;

   fn from_str(s: &str) -> Result<EngineBinding> {
      if s.eq_ignore_ascii_case("human") {
         Ok(EngineBinding::Human)
      } else {
         s.parse().map(EngineBinding::Bot)
      }
   }
}
