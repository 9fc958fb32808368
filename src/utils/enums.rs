use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::FlowError;

/// The two halves of a symmetric forward detector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The side at negative $`z`$ (negative tile ids).
    East,
    /// The side at positive $`z`$ (positive tile ids).
    West,
}

impl Side {
    /// Decode the side from the sign of a tile id. A zero id belongs to neither side.
    pub fn from_tile_id(tile_id: i32) -> Option<Self> {
        match tile_id.signum() {
            -1 => Some(Side::East),
            1 => Some(Side::West),
            _ => None,
        }
    }
    /// The sign of $`z`$ (and of tile ids) on this side.
    pub fn sign(&self) -> f64 {
        match self {
            Side::East => -1.0,
            Side::West => 1.0,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::East => write!(f, "East"),
            Side::West => write!(f, "West"),
        }
    }
}

impl FromStr for Side {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "east" | "e" | "-" => Ok(Self::East),
            "west" | "w" | "+" => Ok(Self::West),
            _ => Err(FlowError::ParseError {
                name: s.to_string(),
                object: "Side".to_string(),
            }),
        }
    }
}

/// The harmonic order $`n`$ of an event plane.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Harmonic {
    /// Directed flow, $`n = 1`$.
    First,
    /// Elliptic flow, $`n = 2`$.
    Second,
    /// Triangular flow, $`n = 3`$.
    Third,
}

impl Harmonic {
    /// The integer order $`n`$.
    pub fn order(&self) -> usize {
        match self {
            Harmonic::First => 1,
            Harmonic::Second => 2,
            Harmonic::Third => 3,
        }
    }
    /// The integer order $`n`$ as a float.
    pub fn as_f64(&self) -> f64 {
        self.order() as f64
    }
    /// The period $`2\pi/n`$ of an $`n`$-th order event-plane angle.
    pub fn period(&self) -> f64 {
        std::f64::consts::TAU / self.as_f64()
    }
    /// Odd harmonics change sign under $`\eta \to -\eta`$.
    pub fn is_odd(&self) -> bool {
        self.order() % 2 == 1
    }
}

impl TryFrom<u8> for Harmonic {
    type Error = FlowError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Harmonic::First),
            2 => Ok(Harmonic::Second),
            3 => Ok(Harmonic::Third),
            _ => Err(FlowError::ParseError {
                name: value.to_string(),
                object: "Harmonic".to_string(),
            }),
        }
    }
}

impl From<Harmonic> for u8 {
    fn from(value: Harmonic) -> Self {
        value.order() as u8
    }
}

impl Display for Harmonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n={}", self.order())
    }
}

impl FromStr for Harmonic {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "first" | "v1" => Ok(Self::First),
            "2" | "second" | "v2" => Ok(Self::Second),
            "3" | "third" | "v3" => Ok(Self::Third),
            _ => Err(FlowError::ParseError {
                name: s.to_string(),
                object: "Harmonic".to_string(),
            }),
        }
    }
}
