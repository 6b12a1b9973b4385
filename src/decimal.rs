//! Fixed-precision decimal types used throughout the book and engine.
//!
//! `spec.md` §3 requires exact decimal arithmetic for prices, quantities and
//! fees — no floats. Prices and quantities wrap [`rust_decimal::Decimal`]
//! (the same crate `nautilus_trader` reaches for in this domain) so that
//! `avg_price * filled_qty == sum(match_qty * match_price)` holds as an exact
//! equality rather than an integer-scaling convention callers have to track.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A price, always compared and stored exactly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Price(pub Decimal);

/// A quantity. Negative quantities are never constructed by this crate but
/// the newtype does not itself forbid them; callers validate at the
/// boundary (see [`crate::order::Order::validate`]).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Quantity(pub Decimal);

macro_rules! newtype_decimal {
    ($t:ident) => {
        impl $t {
            pub const ZERO: $t = $t(Decimal::ZERO);

            #[must_use]
            pub fn new(value: Decimal) -> Self {
                Self(value)
            }

            #[must_use]
            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            #[must_use]
            pub fn is_positive(&self) -> bool {
                self.0.is_sign_positive() && !self.0.is_zero()
            }

            #[must_use]
            pub fn is_negative(&self) -> bool {
                self.0.is_sign_negative() && !self.0.is_zero()
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Decimal> for $t {
            fn from(value: Decimal) -> Self {
                Self(value)
            }
        }

        impl Add for $t {
            type Output = $t;
            fn add(self, rhs: $t) -> $t {
                $t(self.0 + rhs.0)
            }
        }

        impl Sub for $t {
            type Output = $t;
            fn sub(self, rhs: $t) -> $t {
                $t(self.0 - rhs.0)
            }
        }

        impl Neg for $t {
            type Output = $t;
            fn neg(self) -> $t {
                $t(-self.0)
            }
        }
    };
}

newtype_decimal!(Price);
newtype_decimal!(Quantity);

impl Mul<Quantity> for Price {
    type Output = Notional;

    /// `price * quantity` — the notional value of a fill.
    fn mul(self, rhs: Quantity) -> Notional {
        Notional(self.0 * rhs.0)
    }
}

/// The monetary value of `price * quantity`, kept as its own type so it is
/// never accidentally compared against a bare `Price` or `Quantity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Notional(pub Decimal);

impl Notional {
    pub const ZERO: Notional = Notional(Decimal::ZERO);

    #[must_use]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }
}

impl fmt::Display for Notional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Notional {
    type Output = Notional;
    fn add(self, rhs: Notional) -> Notional {
        Notional(self.0 + rhs.0)
    }
}

impl Sub for Notional {
    type Output = Notional;
    fn sub(self, rhs: Notional) -> Notional {
        Notional(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Notional {
    type Output = Notional;
    fn mul(self, rhs: Decimal) -> Notional {
        Notional(self.0 * rhs)
    }
}

impl Div<Quantity> for Notional {
    type Output = Price;

    /// Exact division used for `avg_price = total_value / filled_qty`.
    ///
    /// # Panics
    /// Panics if `rhs` is zero; callers (see [`crate::engine::matching`])
    /// only divide after checking `filled_qty > 0`.
    fn div(self, rhs: Quantity) -> Price {
        Price(self.0 / rhs.0)
    }
}

/// A basis-points rate (e.g. taker/maker fee rate), stored as a `Decimal`
/// fraction (`0.0005` == 5 bps) rather than an integer bps count, so fee
/// computation is `notional * rate` with no scaling constant to remember.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Rate(pub Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(Decimal::ZERO);

    #[must_use]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn apply(&self, notional: Notional) -> Notional {
        Notional(notional.0 * self.0)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
