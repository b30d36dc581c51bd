use std::io::BufRead;

use crate::error::{Error, Result};

/// A single training instance: an outcome label and the predicates active
/// for it, optionally with a real value per predicate.
///
/// Predicates may repeat; every occurrence counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    outcome: String,
    predicates: Vec<String>,
    values: Option<Vec<f64>>,
}

impl Event {
    /// Create an event with binary predicates
    pub fn new<O, I, S>(outcome: O, predicates: I) -> Self
    where
        O: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outcome: outcome.into(),
            predicates: predicates.into_iter().map(Into::into).collect(),
            values: None,
        }
    }

    /// Create an event with one real value per predicate
    ///
    /// Fails if the number of values differs from the number of predicates,
    /// or if any value is negative or not finite.
    pub fn with_values<O, I, S>(outcome: O, predicates: I, values: Vec<f64>) -> Result<Self>
    where
        O: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let event = Self {
            outcome: outcome.into(),
            predicates: predicates.into_iter().map(Into::into).collect(),
            values: Some(values),
        };
        event.validate()?;
        Ok(event)
    }

    /// Outcome label
    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    /// Predicate names, in the order they were given
    pub fn predicates(&self) -> &[String] {
        &self.predicates
    }

    /// Per-predicate values, `None` for binary events
    pub fn values(&self) -> Option<&[f64]> {
        self.values.as_deref()
    }

    /// Value of the predicate at `index`, 1.0 for binary events
    pub fn value(&self, index: usize) -> f64 {
        self.values.as_ref().map_or(1.0, |v| v[index])
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(values) = &self.values {
            validate_values(&self.predicates, values)?;
        }
        Ok(())
    }
}

/// Check a value array against its predicate array.
pub(crate) fn validate_values<S>(predicates: &[S], values: &[f64]) -> Result<()> {
    if predicates.len() != values.len() {
        return Err(Error::invalid_event(format!(
            "{} predicates but {} values",
            predicates.len(),
            values.len()
        )));
    }
    if let Some(v) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(Error::invalid_event(format!(
            "predicate values must be finite and non-negative, got {}",
            v
        )));
    }
    Ok(())
}

/// Reads events from text, one event per line.
///
/// A line is `outcome pred pred ...` separated by whitespace. In real-valued
/// mode a predicate may carry a value as `pred@0.5`; predicates without a
/// suffix get 1.0. Blank lines and lines starting with `#` are skipped.
#[derive(Debug)]
pub struct EventReader<R> {
    reader: R,
    real_valued: bool,
    line: String,
    line_no: usize,
}

impl<R: BufRead> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            real_valued: false,
            line: String::new(),
            line_no: 0,
        }
    }

    /// Parse `pred@value` suffixes
    pub fn real_valued(mut self, enabled: bool) -> Self {
        self.real_valued = enabled;
        self
    }

    fn parse_line(&self, line: &str) -> Result<Event> {
        let mut tokens = line.split_whitespace();
        // Callers skip blank lines, so there is always an outcome
        let outcome = tokens.next().unwrap_or_default();
        if !self.real_valued {
            return Ok(Event::new(outcome, tokens));
        }

        let mut predicates = Vec::new();
        let mut values = Vec::new();
        for token in tokens {
            match token.rsplit_once('@') {
                Some((name, value)) if !name.is_empty() => {
                    let value: f64 = value.parse().map_err(|_| {
                        Error::invalid_event(format!(
                            "line {}: cannot parse value of `{}`",
                            self.line_no, token
                        ))
                    })?;
                    predicates.push(name);
                    values.push(value);
                }
                _ => {
                    predicates.push(token);
                    values.push(1.0);
                }
            }
        }
        Event::with_values(outcome, predicates, values).map_err(|e| match e {
            Error::InvalidEvent(msg) => {
                Error::invalid_event(format!("line {}: {}", self.line_no, msg))
            }
            other => other,
        })
    }
}

impl<R: BufRead> Iterator for EventReader<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.line_no += 1;
            let line = self.line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return Some(self.parse_line(line));
        }
    }
}
