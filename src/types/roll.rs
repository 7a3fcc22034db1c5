// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Die roll type.

use std::fmt;

use rand::Rng;

use crate::error::ValueError;

/// The result of rolling a twenty-sided die (1-20).
///
/// # Examples
///
/// ```
/// use d20_device::types::Roll;
///
/// let roll = Roll::new(20).unwrap();
/// assert_eq!(roll.value(), 20);
///
/// assert!(Roll::new(0).is_err());
/// assert!(Roll::new(21).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Roll(u8);

impl Roll {
    /// Lowest face of the die.
    pub const MIN: u8 = 1;

    /// Highest face of the die.
    pub const MAX: u8 = 20;

    /// Creates a roll from a face value.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` if value is outside [1, 20].
    pub fn new(value: u8) -> Result<Self, ValueError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(ValueError::OutOfRange {
                min: u16::from(Self::MIN),
                max: u16::from(Self::MAX),
                actual: u16::from(value),
            });
        }
        Ok(Self(value))
    }

    /// Rolls the die, each face equally likely.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(Self::MIN..=Self::MAX))
    }

    /// Returns the face value.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Roll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        assert!(Roll::new(1).is_ok());
        assert!(Roll::new(20).is_ok());
        assert_eq!(
            Roll::new(0),
            Err(ValueError::OutOfRange {
                min: 1,
                max: 20,
                actual: 0
            })
        );
    }

    #[test]
    fn random_rolls_stay_on_the_die() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let roll = Roll::random(&mut rng);
            assert!((Roll::MIN..=Roll::MAX).contains(&roll.value()));
        }
    }

    #[test]
    fn random_rolls_cover_every_face() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = [false; 20];
        for _ in 0..10_000 {
            seen[usize::from(Roll::random(&mut rng).value() - 1)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
