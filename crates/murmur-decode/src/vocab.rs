//! Token id ↔ string tables.

use std::collections::{HashMap, HashSet};

use crate::error::DecodeError;

/// Read-only vocabulary shared by every transcription of an engine.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    tokens: HashMap<u32, String>,
    ids: HashMap<String, u32>,
    special: HashSet<u32>,
}

impl Vocabulary {
    /// Build from the standard `token → id` table and the added/special
    /// marker table.
    ///
    /// Added markers take precedence over a standard token with the same id.
    /// Two distinct strings sharing an id within one table is a config error.
    pub fn new<S, A>(standard: S, added: A) -> Result<Self, DecodeError>
    where
        S: IntoIterator<Item = (String, u32)>,
        A: IntoIterator<Item = (String, u32)>,
    {
        let mut tokens = HashMap::new();
        for (token, id) in standard {
            if let Some(prev) = tokens.insert(id, token) {
                return Err(DecodeError::Config(format!(
                    "token id {id} assigned to both {prev:?} and {:?}",
                    tokens[&id]
                )));
            }
        }

        let mut special = HashSet::new();
        let mut added_seen: HashMap<u32, String> = HashMap::new();
        for (marker, id) in added {
            if let Some(prev) = added_seen.insert(id, marker.clone()) {
                return Err(DecodeError::Config(format!(
                    "special token id {id} assigned to both {prev:?} and {marker:?}"
                )));
            }
            let _ = special.insert(id);
            let _ = tokens.insert(id, marker);
        }

        let ids = tokens.iter().map(|(id, s)| (s.clone(), *id)).collect();
        Ok(Self {
            tokens,
            ids,
            special,
        })
    }

    /// Token string for `id`.
    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(&id).map(String::as_str)
    }

    /// Id for a token or marker string.
    pub fn id(&self, token: &str) -> Option<u32> {
        self.ids.get(token).copied()
    }

    /// Whether `id` is known.
    pub fn contains_id(&self, id: u32) -> bool {
        self.tokens.contains_key(&id)
    }

    /// Whether `id` came from the added/special table.
    pub fn is_special(&self, id: u32) -> bool {
        self.special.contains(&id)
    }

    /// Number of distinct ids.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
