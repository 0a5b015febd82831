use crate::cache::TableCache;
use crate::error::{ProcessingError, ValidationError};
use crate::models::SHEET_SEPARATOR;
use crate::table::{Table, TableSet, DEFAULT_SHEET};
use tracing::info;

/// Table sets loaded for one caller, in load order.
#[derive(Debug, Clone, Default)]
pub struct TableSession {
    sets: Vec<TableSet>,
}

impl TableSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups `source#sheet` keys into one set per source, keeping entry
    /// order; bare keys become the set's `default` sheet.
    pub fn from_cache(entries: impl IntoIterator<Item = (String, Table)>) -> Self {
        let mut session = Self::new();
        for (key, table) in entries {
            let (source, sheet) = key
                .split_once(SHEET_SEPARATOR)
                .unwrap_or((key.as_str(), DEFAULT_SHEET));
            match session.sets.iter_mut().find(|set| set.name() == source) {
                Some(set) => set.insert(sheet, table),
                None => {
                    let mut set = TableSet::new(source);
                    set.insert(sheet, table);
                    session.sets.push(set);
                }
            }
        }
        session
    }

    pub async fn load_from_cache(cache: &TableCache) -> Result<Self, ProcessingError> {
        let session = Self::from_cache(cache.load_all().await?);
        info!(sets = session.len(), "loaded cached tables");
        Ok(session)
    }

    /// Adds `set`, replacing a loaded set of the same name.
    pub fn load(&mut self, set: TableSet) {
        match self.sets.iter_mut().find(|loaded| loaded.name() == set.name()) {
            Some(slot) => *slot = set,
            None => self.sets.push(set),
        }
    }

    pub fn unload(&mut self, name: &str) -> Option<TableSet> {
        let position = self.sets.iter().position(|set| set.name() == name)?;
        Some(self.sets.remove(position))
    }

    pub fn get(&self, name: &str) -> Option<&TableSet> {
        self.sets.iter().find(|set| set.name() == name)
    }

    pub fn require(&self, name: &str) -> Result<&TableSet, ValidationError> {
        self.get(name)
            .ok_or_else(|| ValidationError::TableSetNotLoaded(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableSet> {
        self.sets.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.sets.iter().map(|set| set.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
