use std::collections::HashMap;

use crate::error::{Error, Result};

/// A bidirectional dictionary for mapping between strings and dense integer IDs
///
/// IDs are assigned in insertion order starting from zero, so the dictionary
/// is always a bijection between its names and `0..len()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    /// Map from string to ID
    str_to_id: HashMap<String, u32>,
    /// Map from ID to string
    id_to_str: Vec<String>,
}

impl Dictionary {
    /// Create a new empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dictionary from names in ID order, rejecting duplicates
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dict = Self::new();
        for name in names {
            dict.insert_unique(name.as_ref())?;
        }
        Ok(dict)
    }

    /// Get the number of entries in the dictionary
    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    /// Returns `true` if the dictionary contains no entries
    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }

    /// Get or create an ID for a string
    /// Returns the ID for the string, creating a new entry if it doesn't exist
    pub fn get_or_insert(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.str_to_id.get(s) {
            id
        } else {
            self.push(s)
        }
    }

    /// Insert a string that must not be present yet
    pub fn insert_unique(&mut self, s: &str) -> Result<u32> {
        if self.str_to_id.contains_key(s) {
            return Err(Error::DuplicateKey(s.to_string()));
        }
        Ok(self.push(s))
    }

    fn push(&mut self, s: &str) -> u32 {
        let id = self.id_to_str.len() as u32;
        self.str_to_id.insert(s.to_string(), id);
        self.id_to_str.push(s.to_string());
        id
    }

    /// Look up the ID of a string
    pub fn get(&self, s: &str) -> Option<u32> {
        self.str_to_id.get(s).copied()
    }

    /// Look up the string of an ID
    pub fn get_name(&self, id: u32) -> Option<&str> {
        self.id_to_str.get(id as usize).map(String::as_str)
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.str_to_id.clear();
        self.id_to_str.clear();
    }

    /// Iterate over all (string, id) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.id_to_str
            .iter()
            .enumerate()
            .map(|(id, s)| (s.as_str(), id as u32))
    }
}
