use std::collections::HashMap;

use crate::error::RuntimeError;

#[derive(Debug, Clone, Default)]
struct Counter {
    value: u32,
    /// Counters reset whenever this one is reset or incremented.
    subcounters: Vec<String>,
}

/// Named counters arranged in a forest, such as page, section and subsection.
#[derive(Debug, Default)]
pub struct Counters {
    counters: HashMap<String, Counter>,
}

impl Counters {
    pub fn new() -> Self {
        Counters::default()
    }

    /// Register `name`, nested under `parent` when one is given.
    /// Registering an existing counter again only resets it.
    pub fn add_counter(&mut self, name: &str, parent: Option<&str>) -> Result<(), RuntimeError> {
        if let Some(parent) = parent {
            let parent = self
                .counters
                .get_mut(parent)
                .ok_or_else(|| RuntimeError::UnknownCounter(parent.to_string()))?;
            if !parent.subcounters.iter().any(|s| s == name) {
                parent.subcounters.push(name.to_string());
            }
        }
        match self.counters.get_mut(name) {
            Some(counter) => counter.value = 0,
            None => {
                self.counters.insert(name.to_string(), Counter::default());
            }
        }
        Ok(())
    }

    /// Increment `name`, reset its subcounters and return the new value.
    pub fn increment(&mut self, name: &str) -> Result<u32, RuntimeError> {
        let counter = self
            .counters
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnknownCounter(name.to_string()))?;
        counter.value += 1;
        let value = counter.value;
        let subcounters = counter.subcounters.clone();
        for sub in &subcounters {
            self.reset(sub)?;
        }
        Ok(value)
    }

    /// Set `name` and everything nested under it back to zero.
    pub fn reset(&mut self, name: &str) -> Result<(), RuntimeError> {
        let counter = self
            .counters
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UnknownCounter(name.to_string()))?;
        counter.value = 0;
        let subcounters = counter.subcounters.clone();
        for sub in &subcounters {
            self.reset(sub)?;
        }
        Ok(())
    }

    pub fn reset_all(&mut self) {
        for counter in self.counters.values_mut() {
            counter.value = 0;
        }
    }

    pub fn value(&self, name: &str) -> Result<u32, RuntimeError> {
        self.counters
            .get(name)
            .map(|counter| counter.value)
            .ok_or_else(|| RuntimeError::UnknownCounter(name.to_string()))
    }

    /// The values of `names` joined with dots, e.g. `2.1`.
    pub fn display(&self, names: &[&str]) -> Result<String, RuntimeError> {
        let values = names
            .iter()
            .map(|name| self.value(name).map(|v| v.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values.join("."))
    }

    /// A document-unique identifier such as `section_1_2`.
    pub fn generate_id(&self, prefix: &str, names: &[&str]) -> Result<String, RuntimeError> {
        let mut parts = vec![prefix.to_string()];
        for name in names {
            parts.push(self.value(name)?.to_string());
        }
        Ok(parts.join("_"))
    }
}
