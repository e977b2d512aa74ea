//! Board-grid half of the position exchange format.
//!
//! Cells are indexed rank-major in reading order: 0 is a8, 7 is h8, 63 is h1.
//! Nothing here knows about legality, so grids with no kings (or ten queens)
//! are perfectly acceptable.

use crate::error::{Error, Result};
use shakmaty::Square;
use std::fmt;

const PIECE_LETTERS: &str = "PNBRQKpnbrqk";

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoardGrid {
   pub cells: [Option<char>; 64],
}

impl BoardGrid {
   pub fn empty() -> BoardGrid {
      BoardGrid { cells: [None; 64] }
   }

   pub fn piece_at(&self, square: Square) -> Option<char> {
      self.cells[grid_index(square)]
   }
}

impl fmt::Debug for BoardGrid {
   fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      write!(f, "BoardGrid({})", encode(self))
   }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
   Left,
   Right,
}

impl Direction {
   fn source_index(self, i: usize) -> usize {
      match self {
         Direction::Left => left_index(i),
         Direction::Right => right_index(i),
      }
   }
}

pub fn left_index(i: usize) -> usize {
   (7 - i % 8) * 8 + i / 8
}

pub fn right_index(i: usize) -> usize {
   (i % 8) * 8 + (7 - i / 8)
}

/// Reads the placement field of `text`, which may be a full six-field
/// position or the placement field alone.
pub fn decode(text: &str) -> Result<BoardGrid> {
   let placement = text.split(' ').next().unwrap_or("");
   let malformed = |why: String| Error::MalformedPosition(format!("{} ({})", placement, why));

   let mut grid = BoardGrid::empty();
   let mut ranks = 0;
   for (rank, row) in placement.split('/').enumerate() {
      if rank >= 8 {
         return Err(malformed("more than 8 ranks".into()));
      }
      let mut file = 0;
      for c in row.chars() {
         if let Some(run) = c.to_digit(10) {
            if run == 0 || run > 8 {
               return Err(malformed(format!("blank run of {}", run)));
            }
            file += run as usize;
         } else if PIECE_LETTERS.contains(c) {
            if file < 8 {
               grid.cells[rank * 8 + file] = Some(c);
            }
            file += 1;
         } else {
            return Err(malformed(format!("unknown piece letter '{}'", c)));
         }
         if file > 8 {
            return Err(malformed(format!("rank {} is wider than 8 files", 8 - rank)));
         }
      }
      if file != 8 {
         return Err(malformed(format!("rank {} covers {} files", 8 - rank, file)));
      }
      ranks += 1;
   }
   if ranks != 8 {
      return Err(malformed(format!("found {} ranks", ranks)));
   }
   Ok(grid)
}

pub fn encode(grid: &BoardGrid) -> String {
   let mut placement = String::with_capacity(71);
   let mut blanks = 0;
   for (i, cell) in grid.cells.iter().enumerate() {
      if i % 8 == 0 && i != 0 {
         flush_blanks(&mut placement, &mut blanks);
         placement.push('/');
      }
      match cell {
         Some(piece) => {
            flush_blanks(&mut placement, &mut blanks);
            placement.push(*piece);
         }
         None => blanks += 1,
      }
   }
   flush_blanks(&mut placement, &mut blanks);
   placement
}

fn flush_blanks(placement: &mut String, blanks: &mut u32) {
   if *blanks > 0 {
      placement.push_str(&blanks.to_string());
      *blanks = 0;
   }
}

pub fn mirror_grid(grid: &BoardGrid, direction: Direction) -> BoardGrid {
   let mut turned = BoardGrid::empty();
   for (i, cell) in turned.cells.iter_mut().enumerate() {
      *cell = grid.cells[direction.source_index(i)];
   }
   turned
}

/// Turns the placement field and copies everything from the first space on
/// through untouched, so side to move and castling rights keep their meaning.
pub fn mirror_horizontal(text: &str, direction: Direction) -> Result<String> {
   let grid = decode(text)?;
   let mut mirrored = encode(&mirror_grid(&grid, direction));
   if let Some(metadata_start) = text.find(' ') {
      mirrored.push_str(&text[metadata_start..]);
   }
   Ok(mirrored)
}

pub fn mirror_square(square: Square, direction: Direction) -> Square {
   grid_square(direction.source_index(grid_index(square)))
}

pub fn grid_index(square: Square) -> usize {
   let i = usize::from(square);
   (7 - i / 8) * 8 + i % 8
}

pub fn grid_square(index: usize) -> Square {
   Square::new(((7 - index / 8) * 8 + index % 8) as u32)
}
