use std::env;

use log::warn;

use crate::{align::checked_align, block::MIN_BLOCK_SIZE};

/// Bytes requested from the heap source when it has to grow.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

const CHUNK_SIZE_VAR: &str = "SEGALLOC_CHUNK_SIZE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  chunk_size: usize,
}

impl Config {
  pub const fn new() -> Self {
    Self {
      chunk_size: DEFAULT_CHUNK_SIZE,
    }
  }

  /// Sets the growth chunk, rounded up to the alignment unit and to at least
  /// one minimum-sized block. Sizes that cannot be rounded keep the current
  /// chunk.
  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    match checked_align(chunk_size) {
      Some(size) => self.chunk_size = size.max(MIN_BLOCK_SIZE),
      None => warn!("chunk size {chunk_size} cannot be aligned; keeping {}", self.chunk_size),
    }
    self
  }

  /// Reads `SEGALLOC_CHUNK_SIZE`. Missing or malformed values keep the
  /// default; malformed ones are logged.
  pub fn from_env() -> Self {
    let config = Self::new();

    match env::var(CHUNK_SIZE_VAR) {
      Ok(value) => match parse_size(&value) {
        Some(size) => config.with_chunk_size(size),
        None => {
          warn!("ignoring {CHUNK_SIZE_VAR}={value:?}: not a byte count");
          config
        }
      },
      Err(_) => config,
    }
  }

  pub fn chunk_size(&self) -> usize {
    self.chunk_size
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new()
  }
}

/// Parses a plain byte count, or one with a `k`/`m` (KiB/MiB) suffix.
fn parse_size(value: &str) -> Option<usize> {
  let value = value.trim();
  let (digits, scale) = match value.as_bytes().last()? {
    b'k' | b'K' => (&value[..value.len() - 1], 1 << 10),
    b'm' | b'M' => (&value[..value.len() - 1], 1 << 20),
    _ => (value, 1),
  };

  let size = digits.parse::<usize>().ok()?.checked_mul(scale)?;
  (size > 0).then_some(size)
}
