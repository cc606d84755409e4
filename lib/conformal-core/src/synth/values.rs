//! Schema-driven value generation.
//!
//! All randomness flows through one seeded [`StdRng`], so the same seed and
//! the same schemas produce the same value sequence.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde_json::json;

use crate::catalog::{Schema, StringSchema};

mod pattern;
use self::pattern::generate_matching;

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Deterministic generator of JSON values for normalized schemas.
#[derive(Debug)]
pub(crate) struct ValueGenerator {
    rng: StdRng,
    counter: u64,
}

impl ValueGenerator {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            counter: 0,
        }
    }

    /// Produces a JSON value satisfying the schema constraints.
    pub(crate) fn value_for(&mut self, schema: &Schema) -> serde_json::Value {
        match schema {
            Schema::String(string) => json!(self.string_value(string)),
            Schema::Integer(integer) => {
                if !integer.enumeration.is_empty() {
                    let index = self.rng.random_range(0..integer.enumeration.len());
                    return json!(integer.enumeration[index]);
                }
                let low = integer.minimum.unwrap_or(1);
                let high = integer.maximum.unwrap_or(1000).max(low);
                json!(self.rng.random_range(low..=high))
            }
            Schema::Number(number) => {
                let low = number.minimum.unwrap_or(0.0);
                let high = number.maximum.unwrap_or(1000.0).max(low);
                json!(self.rng.random_range(low..=high))
            }
            Schema::Boolean => json!(self.rng.random::<bool>()),
            Schema::Array(array) => {
                let length = self.rng.random_range(1..=3);
                let items: Vec<serde_json::Value> = (0..length)
                    .map(|_| match array.items.as_deref() {
                        Some(items) => self.value_for(items),
                        None => json!(self.next_token()),
                    })
                    .collect();
                json!(items)
            }
            Schema::Object(object) => {
                let mut map = serde_json::Map::new();
                for (name, field) in &object.fields {
                    let include =
                        object.required.contains(name) || self.rng.random_bool(0.7);
                    if include {
                        map.insert(name.clone(), self.value_for(field));
                    }
                }
                serde_json::Value::Object(map)
            }
            Schema::Ref(_) => json!({}),
        }
    }

    /// Produces a scalar rendering suitable for a path, query, or header slot.
    pub(crate) fn scalar_for(&mut self, schema: &Schema) -> String {
        scalar_of(&self.value_for(schema))
    }

    fn string_value(&mut self, schema: &StringSchema) -> String {
        if !schema.enumeration.is_empty() {
            let index = self.rng.random_range(0..schema.enumeration.len());
            return schema.enumeration[index].clone();
        }
        if let Some(format) = schema.format.as_deref() {
            if let Some(value) = self.formatted_value(format) {
                return value;
            }
        }
        if let Some(pattern) = schema.pattern.as_deref() {
            if let Some(value) = self.pattern_value(pattern) {
                return value;
            }
        }
        self.alphanumeric(schema.min_length, schema.max_length)
    }

    fn formatted_value(&mut self, format: &str) -> Option<String> {
        let value = match format {
            "email" => format!("user{}@example.com", self.next_counter()),
            "date" => self.random_date().format("%Y-%m-%d").to_string(),
            "date-time" => {
                let date = self.random_date();
                let hour: u32 = self.rng.random_range(0..24);
                let minute: u32 = self.rng.random_range(0..60);
                let second: u32 = self.rng.random_range(0..60);
                format!("{}T{hour:02}:{minute:02}:{second:02}Z", date.format("%Y-%m-%d"))
            }
            "uuid" => {
                let bytes: [u8; 16] = self.rng.random();
                uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
            }
            "uri" => format!("https://example.com/resources/{}", self.next_counter()),
            "password" => self.alphanumeric(Some(12), Some(16)),
            _ => return None,
        };
        Some(value)
    }

    fn pattern_value(&mut self, pattern: &str) -> Option<String> {
        let candidate = generate_matching(&mut self.rng, pattern)?;
        // Only trust the approximation when the real regex agrees.
        let anchored = format!("^(?:{pattern})$");
        let compiled = Regex::new(&anchored).ok()?;
        compiled.is_match(&candidate).then_some(candidate)
    }

    fn alphanumeric(&mut self, min_length: Option<usize>, max_length: Option<usize>) -> String {
        let low = min_length.unwrap_or(1).max(1);
        let high = max_length.unwrap_or(20).min(50).max(low);
        let length = self.rng.random_range(low..=high);
        (0..length)
            .map(|_| {
                let index = self.rng.random_range(0..ALPHANUMERIC.len());
                char::from(ALPHANUMERIC[index])
            })
            .collect()
    }

    fn random_date(&mut self) -> NaiveDate {
        let year: i32 = self.rng.random_range(2000..=2030);
        let month: u32 = self.rng.random_range(1..=12);
        let day: u32 = self.rng.random_range(1..=28);
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default())
    }

    fn next_counter(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn next_token(&mut self) -> String {
        self.alphanumeric(Some(4), Some(8))
    }
}

/// Renders a JSON value as the single string a parameter slot carries.
pub(crate) fn scalar_of(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(scalar_of)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
