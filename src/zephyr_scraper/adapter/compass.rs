// zephyr_scraper - Weather station telemetry acquisition and health monitoring
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

/// Convert a 16-point compass direction (e.g. `"NNE"`) to a bearing in degrees.
///
/// Case and surrounding whitespace are ignored. Empty or unrecognized directions map to
/// 0 (north), matching what text-scraping sources usually mean by a missing direction.
pub fn bearing_from_direction(direction: &str) -> f64 {
    const POINTS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW", "NNW",
    ];

    let direction = direction.trim().to_uppercase();
    POINTS
        .iter()
        .position(|p| *p == direction)
        .map(|i| i as f64 * 22.5)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::bearing_from_direction;

    #[test]
    fn test_known_points() {
        assert_eq!(0.0, bearing_from_direction("N"));
        assert_eq!(22.5, bearing_from_direction("NNE"));
        assert_eq!(90.0, bearing_from_direction("E"));
        assert_eq!(202.5, bearing_from_direction("SSW"));
        assert_eq!(337.5, bearing_from_direction("NNW"));
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(315.0, bearing_from_direction("  nw "));
    }

    #[test]
    fn test_unknown_is_north() {
        assert_eq!(0.0, bearing_from_direction(""));
        assert_eq!(0.0, bearing_from_direction("Variable"));
    }
}
