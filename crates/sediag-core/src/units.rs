//! Compile-time unit safety for power system quantities.
//!
//! The diagnosis engine mostly manipulates dimensionless normalized
//! residuals, but bus operating points and measurement values still carry
//! physical units. Newtype wrappers keep per-unit voltages, angles and
//! base voltages from being mixed up silently.
//!
//! All types are `#[repr(transparent)]` over `f64`: zero runtime overhead.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Macro to implement common arithmetic operations for unit types
macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl $type {
            #[inline]
            pub fn new(value: f64) -> Self {
                Self(value)
            }
            #[inline]
            pub fn value(&self) -> f64 {
                self.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{} {}", self.0, $unit_name)
            }
        }
    };
}

/// Dimensionless per-unit quantity (voltage magnitude, impedance)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct PerUnit(pub f64);
impl_unit_ops!(PerUnit, "p.u.");

/// Angle in radians
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Radians(pub f64);
impl_unit_ops!(Radians, "rad");

impl Radians {
    pub fn to_degrees(self) -> f64 {
        self.0.to_degrees()
    }
}

/// Voltage in kilovolts
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Kilovolts(pub f64);
impl_unit_ops!(Kilovolts, "kV");
