//! Fixed-point value and rate types
//!
//! Values are counted in the smallest denomination of the lending unit
//! (`DECIMALS` = 6, so `UNIT` base units make one whole unit). Rates are basis
//! points. Every split rounds down; products are widened to `u128` first.

use crate::{LendingError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places of the lending unit
pub const DECIMALS: u8 = 6;

/// Base units in one whole lending unit
pub const UNIT: u64 = 1_000_000;

/// Basis points in 100%
pub const BPS_DENOMINATOR: u32 = 10_000;

pub const SECONDS_PER_DAY: u64 = 86_400;

pub const DAYS_PER_YEAR: u64 = 365;

/// Amount in base units of the lending unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Whole lending units, e.g. `Amount::units(5)` is 5.000000
    pub const fn units(whole: u64) -> Self {
        Self(whole * UNIT)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(LendingError::AmountOverflow {
                left: self.0,
                right: other.0,
            })
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(LendingError::AmountUnderflow {
                minuend: self.0,
                subtrahend: other.0,
            })
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// `floor(self * numerator / denominator)`; a zero denominator yields zero
    pub fn mul_div_floor(self, numerator: u128, denominator: u128) -> Result<Self> {
        if denominator == 0 {
            return Ok(Self::zero());
        }
        let product = (self.0 as u128)
            .checked_mul(numerator)
            .ok_or(LendingError::AmountOverflow {
                left: self.0,
                right: u64::try_from(numerator).unwrap_or(u64::MAX),
            })?;
        u64::try_from(product / denominator)
            .map(Self)
            .map_err(|_| LendingError::AmountOverflow {
                left: self.0,
                right: u64::try_from(numerator).unwrap_or(u64::MAX),
            })
    }

    /// Portion of this amount at the given rate, rounded down
    pub fn apply_bps(self, bps: BasisPoints) -> Result<Self> {
        self.mul_div_floor(bps.0 as u128, BPS_DENOMINATOR as u128)
    }

    /// Portion of this amount at the given whole percent, rounded down
    pub fn apply_percent(self, percent: u32) -> Result<Self> {
        self.mul_div_floor(percent as u128, 100)
    }

    /// `floor(self * part / whole)`, the pro-rata share of `part` in `whole`
    pub fn pro_rata(self, part: Amount, whole: Amount) -> Result<Self> {
        self.mul_div_floor(part.0 as u128, whole.0 as u128)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / UNIT, self.0 % UNIT)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        Self(iter.map(|a| a.0).fold(0u64, u64::saturating_add))
    }
}

/// A rate in basis points (1 bps = 0.01%)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BasisPoints(pub u32);

impl BasisPoints {
    pub const ZERO: BasisPoints = BasisPoints(0);

    /// 100%
    pub const MAX: BasisPoints = BasisPoints(BPS_DENOMINATOR);

    pub fn new(bps: u32) -> Self {
        Self(bps)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// True when the rate is a fraction of a whole (0% to 100% inclusive)
    pub fn is_fraction(&self) -> bool {
        self.0 <= BPS_DENOMINATOR
    }
}

impl fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bps", self.0)
    }
}
