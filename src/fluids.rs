//! Paediatric fluid requirements by body weight

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Maintenance,
    Dehydration,
    Resuscitation,
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "maintenance" => Ok(Scenario::Maintenance),
            "dehydration" => Ok(Scenario::Dehydration),
            "resuscitation" => Ok(Scenario::Resuscitation),
            other => Err(Error::InvalidScenario(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluidPlan {
    pub fluids_ml: f64,
    pub ml_per_hour: f64,
}

impl fmt::Display for FluidPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0} ml/day ({:.1} ml/hour)",
            self.fluids_ml, self.ml_per_hour
        )
    }
}

/// Maintenance follows Holliday-Segar (100/50/20 ml per kg bands).
pub fn calculate(weight_kg: f64, scenario: Scenario) -> FluidPlan {
    let fluids_ml = match scenario {
        Scenario::Maintenance if weight_kg <= 10.0 => weight_kg * 100.0,
        Scenario::Maintenance if weight_kg <= 20.0 => 1000.0 + (weight_kg - 10.0) * 50.0,
        Scenario::Maintenance => 1500.0 + (weight_kg - 20.0) * 20.0,
        Scenario::Dehydration => weight_kg * 75.0,
        Scenario::Resuscitation => weight_kg * 20.0,
    };

    FluidPlan {
        fluids_ml,
        ml_per_hour: fluids_ml / 24.0,
    }
}

/// Parses `<weight_kg> <scenario>`.
pub fn parse_command(args: &str) -> Result<FluidPlan> {
    let mut parts = args.split_whitespace();
    let (Some(weight), Some(scenario), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::InvalidScenario(
            "usage: /fluids <weight_kg> <maintenance|dehydration|resuscitation>".to_string(),
        ));
    };

    let weight_kg: f64 = weight
        .parse()
        .ok()
        .filter(|w: &f64| w.is_finite() && *w > 0.0)
        .ok_or_else(|| Error::InvalidScenario(format!("invalid weight {weight:?}")))?;

    Ok(calculate(weight_kg, scenario.parse()?))
}
