//! Blocklist policy store
//!
//! Holds the set of blocked process identifiers, mutable at runtime and read
//! by the enforcer on every evaluation. Matching precedence is exact
//! executable path, then executable name, then publisher; the first match
//! wins and its reason is returned.

pub mod pattern_matcher;

use crate::models::ProcessRecord;
use parking_lot::RwLock;
use pattern_matcher::NamePattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a blocklist entry identifies processes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    /// Exact executable path
    Path(PathBuf),
    /// Executable name, exact or glob, case-insensitive
    Name(String),
    /// Code signing publisher, exact or glob, case-insensitive
    Publisher(String),
}

impl Matcher {
    /// Canonical form used as the uniqueness key
    fn normalized(self) -> Self {
        match self {
            Matcher::Path(path) => Matcher::Path(path),
            Matcher::Name(name) => Matcher::Name(name.trim().to_ascii_lowercase()),
            Matcher::Publisher(publisher) => Matcher::Publisher(publisher.trim().to_ascii_lowercase()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Matcher::Path(_) => "path",
            Matcher::Name(_) => "name",
            Matcher::Publisher(_) => "publisher",
        }
    }

    fn validate(&self) -> Result<(), PolicyError> {
        match self {
            Matcher::Path(path) => {
                if path.as_os_str().is_empty() {
                    return Err(PolicyError::EmptyMatcher("path"));
                }
                if !path.is_absolute() {
                    return Err(PolicyError::RelativePath(path.clone()));
                }
            }
            Matcher::Name(value) | Matcher::Publisher(value) => {
                if value.trim().is_empty() {
                    return Err(PolicyError::EmptyMatcher(self.kind()));
                }
                pattern_matcher::validate_pattern(value).map_err(|source| PolicyError::InvalidPattern {
                    pattern: value.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matcher::Path(path) => write!(f, "path {}", path.display()),
            Matcher::Name(name) => write!(f, "name {}", name),
            Matcher::Publisher(publisher) => write!(f, "publisher {}", publisher),
        }
    }
}

/// One blocklist rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistEntry {
    #[serde(flatten)]
    pub matcher: Matcher,
    pub reason: String,
}

impl BlocklistEntry {
    pub fn new(matcher: Matcher, reason: impl Into<String>) -> Self {
        Self {
            matcher,
            reason: reason.into(),
        }
    }
}

/// Result of a positive blocklist match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDecision {
    pub matcher: Matcher,
    pub reason: String,
}

/// Policy validation errors
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("blocklist {0} matcher must not be empty")]
    EmptyMatcher(&'static str),
    #[error("blocklist path must be absolute: {0}")]
    RelativePath(PathBuf),
    #[error("invalid blocklist pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

struct CompiledEntry {
    entry: BlocklistEntry,
    pattern: Option<NamePattern>,
}

impl CompiledEntry {
    fn compile(entry: BlocklistEntry) -> Result<(Matcher, Self), PolicyError> {
        entry.matcher.validate()?;
        let matcher = entry.matcher.clone().normalized();
        let pattern = match &matcher {
            Matcher::Path(_) => None,
            Matcher::Name(value) | Matcher::Publisher(value) => Some(NamePattern::new(value)),
        };
        let entry = BlocklistEntry {
            matcher: matcher.clone(),
            reason: entry.reason,
        };
        Ok((matcher, Self { entry, pattern }))
    }

    fn matches_str(&self, candidate: &str) -> bool {
        self.pattern
            .as_ref()
            .map_or(false, |pattern| pattern.matches(candidate))
    }

    fn decision(&self) -> BlockDecision {
        BlockDecision {
            matcher: self.entry.matcher.clone(),
            reason: self.entry.reason.clone(),
        }
    }
}

#[derive(Default)]
struct Blocklist {
    entries: BTreeMap<Matcher, CompiledEntry>,
}

impl Blocklist {
    fn from_entries(entries: impl IntoIterator<Item = BlocklistEntry>) -> Result<Self, PolicyError> {
        let mut blocklist = Blocklist::default();
        for entry in entries {
            let (key, compiled) = CompiledEntry::compile(entry)?;
            blocklist.entries.insert(key, compiled);
        }
        Ok(blocklist)
    }

    fn evaluate(&self, record: &ProcessRecord) -> Option<BlockDecision> {
        if record.has_executable_path() {
            let key = Matcher::Path(record.executable_path.clone());
            if let Some(compiled) = self.entries.get(&key) {
                return Some(compiled.decision());
            }
        }

        let executable_name = record.executable_name();
        let by_name = self
            .entries
            .iter()
            .filter(|(key, _)| matches!(key, Matcher::Name(_)))
            .find(|(_, compiled)| {
                compiled.matches_str(executable_name) || compiled.matches_str(&record.name)
            });
        if let Some((_, compiled)) = by_name {
            return Some(compiled.decision());
        }

        let publisher = record.publisher.as_deref()?;
        self.entries
            .iter()
            .filter(|(key, _)| matches!(key, Matcher::Publisher(_)))
            .find(|(_, compiled)| compiled.matches_str(publisher))
            .map(|(_, compiled)| compiled.decision())
    }
}

/// Shared, concurrently readable blocklist
#[derive(Default)]
pub struct PolicyStore {
    blocklist: RwLock<Blocklist>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store seeded with entries. Later duplicates replace earlier ones.
    pub fn with_entries(entries: impl IntoIterator<Item = BlocklistEntry>) -> Result<Self, PolicyError> {
        Ok(Self {
            blocklist: RwLock::new(Blocklist::from_entries(entries)?),
        })
    }

    /// Evaluate a process against the blocklist.
    /// Holds one read guard for the whole evaluation, so a concurrent update
    /// is either fully visible or not at all.
    pub fn is_blocked(&self, record: &ProcessRecord) -> Option<BlockDecision> {
        self.blocklist.read().evaluate(record)
    }

    /// Insert an entry, replacing any entry with the same matcher.
    /// Returns the replaced entry.
    pub fn add_entry(&self, entry: BlocklistEntry) -> Result<Option<BlocklistEntry>, PolicyError> {
        let (key, compiled) = CompiledEntry::compile(entry)?;
        let previous = self.blocklist.write().entries.insert(key, compiled);
        Ok(previous.map(|compiled| compiled.entry))
    }

    pub fn remove_entry(&self, matcher: &Matcher) -> Option<BlocklistEntry> {
        let key = matcher.clone().normalized();
        self.blocklist
            .write()
            .entries
            .remove(&key)
            .map(|compiled| compiled.entry)
    }

    /// Current entries, ordered by matcher kind then value
    pub fn list_entries(&self) -> Vec<BlocklistEntry> {
        self.blocklist
            .read()
            .entries
            .values()
            .map(|compiled| compiled.entry.clone())
            .collect()
    }

    /// Atomically swap the whole blocklist. Nothing changes if any entry is invalid.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = BlocklistEntry>) -> Result<usize, PolicyError> {
        let blocklist = Blocklist::from_entries(entries)?;
        let count = blocklist.entries.len();
        *self.blocklist.write() = blocklist;
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.blocklist.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
