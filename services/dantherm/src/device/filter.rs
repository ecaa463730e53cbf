//! Spike filtering for noisy sensors

use std::collections::VecDeque;

const HISTORY_SIZE: usize = 5;

/// Sensors that can be filtered, with their maximum plausible change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilteredSensor {
    Humidity,
    AirQuality,
    ExhaustTemperature,
    ExtractTemperature,
    SupplyTemperature,
    OutdoorTemperature,
    RoomTemperature,
}

impl FilteredSensor {
    pub const ALL: [FilteredSensor; 7] = [
        FilteredSensor::Humidity,
        FilteredSensor::AirQuality,
        FilteredSensor::ExhaustTemperature,
        FilteredSensor::ExtractTemperature,
        FilteredSensor::SupplyTemperature,
        FilteredSensor::OutdoorTemperature,
        FilteredSensor::RoomTemperature,
    ];

    pub const fn max_change(&self) -> f64 {
        match self {
            FilteredSensor::Humidity => 5.0,
            FilteredSensor::AirQuality => 50.0,
            _ => 2.0,
        }
    }
}

/// Rolling-average spike filter
///
/// The first samples only build the history and report its average. Once
/// the history is full, a sample deviating from the average by more than
/// `max_change` is replaced by the average and not recorded.
#[derive(Debug, Clone)]
pub struct SensorFilter {
    history: VecDeque<f64>,
    max_change: f64,
    initialized: bool,
}

impl SensorFilter {
    pub fn new(max_change: f64) -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_SIZE),
            max_change,
            initialized: false,
        }
    }

    pub fn filter(&mut self, value: f64) -> f64 {
        if !self.initialized {
            if self.history.len() < HISTORY_SIZE {
                self.history.push_back(value);
                return round1(self.average());
            }
            self.initialized = true;
        }

        let average = self.average();
        if (value - average).abs() > self.max_change {
            return round1(average);
        }

        if self.history.len() >= HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(value);
        value
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.initialized = false;
    }

    fn average(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f64>() / self.history.len() as f64
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
