//! Fixed unit-conversion table with exact rational factors

use serde::{Deserialize, Serialize};

use super::Operation;

/// An exact rational number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    pub numerator: i64,
    pub denominator: i64,
}

impl Ratio {
    pub const fn new(numerator: i64, denominator: i64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub const fn whole(n: i64) -> Self {
        Self::new(n, 1)
    }

    pub fn value(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Length,
    Weight,
    Time,
    Temperature,
}

impl Dimension {
    pub fn operation(&self) -> Operation {
        match self {
            Dimension::Length => Operation::LengthConversion,
            Dimension::Weight => Operation::WeightConversion,
            Dimension::Time => Operation::TimeConversion,
            Dimension::Temperature => Operation::TemperatureConversion,
        }
    }
}

/// `to = from * scale + offset`
#[derive(Debug, Clone, Copy)]
pub struct ConversionRule {
    pub from: &'static str,
    pub to: &'static str,
    pub dimension: Dimension,
    pub scale: Ratio,
    pub offset: Ratio,
}

impl ConversionRule {
    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale.numerator as f64 / self.scale.denominator as f64 + self.offset.value()
    }

    /// The conversion applied backwards, used to recognise inverted-factor mistakes
    pub fn apply_inverse(&self, value: f64) -> f64 {
        (value - self.offset.value()) * self.scale.denominator as f64
            / self.scale.numerator as f64
    }

    pub fn has_offset(&self) -> bool {
        self.offset.numerator != 0
    }
}

const ZERO: Ratio = Ratio::whole(0);

pub const CONVERSIONS: &[ConversionRule] = &[
    ConversionRule { from: "km", to: "m", dimension: Dimension::Length, scale: Ratio::whole(1000), offset: ZERO },
    ConversionRule { from: "m", to: "cm", dimension: Dimension::Length, scale: Ratio::whole(100), offset: ZERO },
    ConversionRule { from: "inch", to: "cm", dimension: Dimension::Length, scale: Ratio::new(254, 100), offset: ZERO },
    ConversionRule { from: "mile", to: "km", dimension: Dimension::Length, scale: Ratio::new(1_609_344, 1_000_000), offset: ZERO },
    ConversionRule { from: "kg", to: "g", dimension: Dimension::Weight, scale: Ratio::whole(1000), offset: ZERO },
    ConversionRule { from: "lb", to: "kg", dimension: Dimension::Weight, scale: Ratio::new(45_359_237, 100_000_000), offset: ZERO },
    ConversionRule { from: "hour", to: "minute", dimension: Dimension::Time, scale: Ratio::whole(60), offset: ZERO },
    ConversionRule { from: "day", to: "hour", dimension: Dimension::Time, scale: Ratio::whole(24), offset: ZERO },
    ConversionRule { from: "minute", to: "second", dimension: Dimension::Time, scale: Ratio::whole(60), offset: ZERO },
    ConversionRule { from: "celsius", to: "fahrenheit", dimension: Dimension::Temperature, scale: Ratio::new(9, 5), offset: Ratio::whole(32) },
    ConversionRule { from: "fahrenheit", to: "celsius", dimension: Dimension::Temperature, scale: Ratio::new(5, 9), offset: Ratio::new(-160, 9) },
];

pub fn lookup(from: &str, to: &str) -> Option<&'static ConversionRule> {
    CONVERSIONS.iter().find(|r| r.from == from && r.to == to)
}

/// Display name used in prompts
pub fn unit_name(code: &str) -> &str {
    match code {
        "km" => "公里",
        "m" => "公尺",
        "cm" => "公分",
        "inch" => "英寸",
        "mile" => "英里",
        "kg" => "公斤",
        "g" => "公克",
        "lb" => "磅",
        "hour" => "小時",
        "minute" => "分鐘",
        "second" => "秒",
        "day" => "天",
        "celsius" => "攝氏度",
        "fahrenheit" => "華氏度",
        other => other,
    }
}
