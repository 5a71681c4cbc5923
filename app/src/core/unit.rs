use std::fmt::Display;

use derive_more::derive::AsRef;
use serde::{Deserialize, Serialize};

/// A temperature in the daemon's working degree scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, AsRef, Serialize, Deserialize)]
pub struct Degrees(pub f64);

impl Degrees {
    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }
}

impl From<f64> for Degrees {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl From<Degrees> for f64 {
    fn from(value: Degrees) -> Self {
        value.0
    }
}

impl Display for Degrees {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}°", self.0)
    }
}

impl std::ops::Add for Degrees {
    type Output = Degrees;

    fn add(self, rhs: Self) -> Self::Output {
        Degrees(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Degrees {
    type Output = Degrees;

    fn sub(self, rhs: Self) -> Self::Output {
        Degrees(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Degrees {
    type Output = Degrees;

    fn neg(self) -> Self::Output {
        Degrees(-self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegreeScale {
    Celsius,
    Fahrenheit,
}

impl DegreeScale {
    /// Convert `value` from this scale into `to`. A no-op when the scales match.
    pub fn convert(self, value: Degrees, to: DegreeScale) -> Degrees {
        match (self, to) {
            (DegreeScale::Celsius, DegreeScale::Fahrenheit) => Degrees(celsius_to_fahrenheit(value.0)),
            (DegreeScale::Fahrenheit, DegreeScale::Celsius) => Degrees(fahrenheit_to_celsius(value.0)),
            _ => value,
        }
    }
}

impl Display for DegreeScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegreeScale::Celsius => write!(f, "celsius"),
            DegreeScale::Fahrenheit => write!(f, "fahrenheit"),
        }
    }
}

pub fn celsius_to_fahrenheit(value: f64) -> f64 {
    (1.8 * value) + 32.0
}

pub fn fahrenheit_to_celsius(value: f64) -> f64 {
    (value - 32.0) / 1.8
}
