//! Random session identifiers with widening on collision.

use rand::Rng;

use crate::config::RegistryConfig;
use crate::error::RegistryError;

/// Opaque session identifier.
pub type SessionId = String;

/// Generates identifiers that start short and grow when the current width is
/// crowded, so `create` always terminates.
pub(crate) struct IdGenerator<'a> {
    alphabet: &'a [u8],
    initial_width: usize,
    max_width: usize,
    attempts_per_width: usize,
}

impl<'a> IdGenerator<'a> {
    pub(crate) fn new(config: &'a RegistryConfig) -> Self {
        Self {
            alphabet: config.id_alphabet.as_bytes(),
            initial_width: config.id_initial_width,
            max_width: config.id_max_width,
            attempts_per_width: config.id_attempts_per_width,
        }
    }

    /// Draw identifiers until `taken` rejects none, widening after
    /// `attempts_per_width` collisions at a given width.
    pub(crate) fn generate<R, F>(&self, rng: &mut R, taken: F) -> Result<SessionId, RegistryError>
    where
        R: Rng,
        F: Fn(&str) -> bool,
    {
        for width in self.initial_width..=self.max_width {
            for _ in 0..self.attempts_per_width {
                let candidate: String = (0..width)
                    .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())] as char)
                    .collect();
                if !taken(&candidate) {
                    return Ok(candidate);
                }
            }
            tracing::debug!(width, "session id width crowded, widening");
        }
        Err(RegistryError::IdSpaceExhausted {
            initial: self.initial_width,
            max: self.max_width,
        })
    }
}
