use serde::Serialize;

/// A single sensor reading. The provider reports hundredths of a degree Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    pub raw: i64,
    pub celsius: f64,
    pub fahrenheit: f64,
}

impl SensorReading {
    pub fn from_raw(raw: i64) -> SensorReading {
        let celsius = raw_to_celsius(raw);

        SensorReading {
            raw,
            celsius,
            fahrenheit: celsius_to_fahrenheit(celsius),
        }
    }
}

pub fn raw_to_celsius(raw: i64) -> f64 {
    raw as f64 / 100.0
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// True when the AC should be turned on. The unit is never turned off here.
pub fn should_activate(fahrenheit: f64, threshold: f64, ac_on: bool) -> bool {
    fahrenheit > threshold && !ac_on
}
