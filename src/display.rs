/*
 *  display.rs
 *
 *  wxfresh - weather that keeps up
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display adapter - turns the published weather state into labelled
 *  values for the screen
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::fmt;

use crate::config::{DisplayField, DisplaySettings, TemperatureUnit};
use crate::constants::{LABEL_CITY, LABEL_DESCRIPTION, LABEL_SKY, LABEL_TEMPERATURE, NO_NETWORK_MARKER};
use crate::snapshot::WeatherState;

/// One labelled value on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub field: DisplayField,
    pub label: &'static str,
    pub value: String,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            f.write_str(&self.value)
        } else {
            write!(f, "{} {}", self.label, self.value)
        }
    }
}

fn label_for(field: DisplayField) -> &'static str {
    match field {
        DisplayField::City => LABEL_CITY,
        DisplayField::Temperature => LABEL_TEMPERATURE,
        DisplayField::Sky => LABEL_SKY,
        DisplayField::Description => LABEL_DESCRIPTION,
    }
}

/// Feels-like temperature in the display unit, e.g. `68°F` or `20.37°C`.
pub fn format_temperature(celsius: f64, units: TemperatureUnit, show_decimal: bool) -> String {
    let (value, suffix) = match units {
        TemperatureUnit::Celsius => (celsius, "°C"),
        TemperatureUnit::Fahrenheit => (celsius * 9.0 / 5.0 + 32.0, "°F"),
    };
    if show_decimal {
        format!("{:.2}{}", value, suffix)
    } else {
        // half away from zero, the formatter alone rounds ties to even; +0.0 folds -0
        format!("{:.0}{}", value.round() + 0.0, suffix)
    }
}

/// Labels for the configured fields, in configured order.
pub fn render(state: &WeatherState, settings: &DisplaySettings) -> Vec<Label> {
    settings
        .fields
        .iter()
        .enumerate()
        .map(|(i, &field)| {
            let value = match state {
                WeatherState::Ready(snapshot) => match field {
                    DisplayField::City => snapshot.place_name.clone(),
                    DisplayField::Temperature => {
                        format_temperature(snapshot.feels_like_celsius, settings.units, settings.show_decimal)
                    }
                    DisplayField::Sky => snapshot.sky_condition.clone(),
                    DisplayField::Description => snapshot.sky_description.clone(),
                },
                WeatherState::NoNetwork if i == 0 => NO_NETWORK_MARKER.to_string(),
                WeatherState::NoNetwork | WeatherState::NoData => String::new(),
            };
            Label { field, label: label_for(field), value }
        })
        .collect()
}

/// Weather display component, re-renders only when the state moves.
pub struct WeatherDisplay {
    settings: DisplaySettings,
    labels: Vec<Label>,
}

impl WeatherDisplay {
    pub fn new(settings: DisplaySettings) -> Self {
        let labels = render(&WeatherState::NoData, &settings);
        Self { settings, labels }
    }

    /// Check if the labels for `state` differ from what is shown
    pub fn has_changed(&self, state: &WeatherState) -> bool {
        render(state, &self.settings) != self.labels
    }

    /// Update from a new state, `true` when the labels changed.
    pub fn update(&mut self, state: &WeatherState) -> bool {
        let labels = render(state, &self.settings);
        if labels == self.labels {
            return false;
        }
        self.labels = labels;
        true
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Unload: back to empty values.
    pub fn clear(&mut self) {
        self.labels = render(&WeatherState::NoData, &self.settings);
    }
}
