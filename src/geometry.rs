//! Pixel rectangles shared by detections and ignore areas.

use serde::{Deserialize, Deserializer, Serialize};

/// Axis-aligned rectangle in integer pixel coordinates.
///
/// Coordinates are trusted as given (from configuration or from the
/// detection service); `x_min < x_max` and `y_min < y_max` are expected
/// but never checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    #[serde(deserialize_with = "coordinate")]
    pub x_min: i64,
    #[serde(deserialize_with = "coordinate")]
    pub y_min: i64,
    #[serde(deserialize_with = "coordinate")]
    pub x_max: i64,
    #[serde(deserialize_with = "coordinate")]
    pub y_max: i64,
}

impl Rectangle {
    pub const fn new(x_min: i64, y_min: i64, x_max: i64, y_max: i64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> i64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> i64 {
        self.y_max - self.y_min
    }

    /// Open-interval containment on all four edges.
    ///
    /// A rectangle touching any edge of `self` is not contained.
    pub fn strictly_contains(&self, inner: &Rectangle) -> bool {
        self.x_min < inner.x_min
            && inner.x_min < inner.x_max
            && inner.x_max < self.x_max
            && self.y_min < inner.y_min
            && inner.y_min < inner.y_max
            && inner.y_max < self.y_max
    }
}

impl std::fmt::Display for Rectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {})-({}, {})",
            self.x_min, self.y_min, self.x_max, self.y_max
        )
    }
}

/// Accepts integers, floats (truncated) and numeric strings.
///
/// Hand-edited camera files carry coordinates as strings, and some detection
/// servers emit float edges.
fn coordinate<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| D::Error::custom(format!("coordinate out of range: {}", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| D::Error::custom(format!("coordinate is not an integer: {:?}", s))),
        other => Err(D::Error::custom(format!(
            "coordinate must be a number, got {}",
            other
        ))),
    }
}
