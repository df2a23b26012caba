//! Active compatibility set and stored manifest matching.
//!
//! # Responsibility
//! - Track the running core version and every registered component.
//! - Write the manifest rows of a newly created store.
//! - Decide whether a stored manifest matches the running set exactly.
//!
//! # Invariants
//! - A set contains exactly one core row, named `CORE_COMPONENT_NAME`.
//! - `(kind, name)` pairs are unique within a set.

use crate::db::{DbError, DbResult};
use crate::extension::manifest::{
    validate_version, ComponentEntry, ComponentKind, ComponentValidationError,
};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Name stored on the core manifest row.
pub const CORE_COMPONENT_NAME: &str = "core";

/// Components active in the running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilitySet {
    core_version: String,
    components: BTreeMap<(ComponentKind, String), String>,
}

impl CompatibilitySet {
    /// Creates a set holding only the core row.
    pub fn new(core_version: impl Into<String>) -> Result<Self, CompatibilityError> {
        let core_version = core_version.into();
        validate_version(&core_version).map_err(CompatibilityError::InvalidComponent)?;
        Ok(Self {
            core_version: core_version.trim().to_string(),
            components: BTreeMap::new(),
        })
    }

    /// Creates a set for the version of this crate.
    pub fn for_current_core() -> Self {
        Self {
            core_version: crate::core_version().to_string(),
            components: BTreeMap::new(),
        }
    }

    /// Registers one active extension, interface or plugin.
    pub fn register(
        &mut self,
        kind: ComponentKind,
        name: &str,
        version: &str,
    ) -> Result<(), CompatibilityError> {
        let entry = ComponentEntry::new(kind, name.trim(), version.trim());
        entry
            .validate()
            .map_err(CompatibilityError::InvalidComponent)?;

        let key = (entry.kind, entry.name.clone());
        if self.components.contains_key(&key) {
            return Err(CompatibilityError::DuplicateComponent {
                kind: entry.kind,
                name: entry.name,
            });
        }
        self.components.insert(key, entry.version);
        Ok(())
    }

    /// Builder form of `register`.
    pub fn with_component(
        mut self,
        kind: ComponentKind,
        name: &str,
        version: &str,
    ) -> Result<Self, CompatibilityError> {
        self.register(kind, name, version)?;
        Ok(self)
    }

    pub fn core_version(&self) -> &str {
        &self.core_version
    }

    /// Returns every manifest row, core first.
    pub fn entries(&self) -> Vec<ComponentEntry> {
        let mut entries = Vec::with_capacity(self.components.len() + 1);
        entries.push(ComponentEntry::new(
            ComponentKind::Core,
            CORE_COMPONENT_NAME,
            self.core_version.clone(),
        ));
        entries.extend(
            self.components
                .iter()
                .map(|((kind, name), version)| ComponentEntry::new(*kind, name, version)),
        );
        entries
    }

    /// Returns whether `manifest` and this set are equal with matching
    /// versions.
    ///
    /// Every stored row must consume one distinct active entry with the same
    /// kind, name and version, exactly one row must be the core row, and no
    /// active entry may be left unconsumed.
    pub fn matches(&self, manifest: &[ComponentEntry]) -> bool {
        let mut remaining = self.components.clone();
        let mut core_seen = false;

        for row in manifest {
            if row.kind == ComponentKind::Core {
                if core_seen || row.version != self.core_version {
                    return false;
                }
                core_seen = true;
                continue;
            }

            match remaining.remove(&(row.kind, row.name.clone())) {
                Some(version) if version == row.version => {}
                _ => return false,
            }
        }

        core_seen && remaining.is_empty()
    }
}

/// Persists the manifest rows of `set`.
pub fn write_manifest(conn: &Connection, set: &CompatibilitySet) -> DbResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO compatibility (component_type, name, version) VALUES (?1, ?2, ?3);",
    )?;
    for entry in set.entries() {
        stmt.execute(params![entry.kind.as_str(), entry.name, entry.version])?;
    }
    Ok(())
}

/// Reads the manifest rows stored in one store file.
pub fn read_manifest(conn: &Connection) -> DbResult<Vec<ComponentEntry>> {
    let mut stmt = conn.prepare(
        "SELECT component_type, name, version FROM compatibility ORDER BY entry_id ASC;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (kind, name, version) = row?;
        let kind = ComponentKind::parse(&kind)
            .ok_or_else(|| DbError::InvalidData(format!("unknown component type `{kind}`")))?;
        entries.push(ComponentEntry::new(kind, name, version));
    }
    Ok(entries)
}

/// Compatibility set registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompatibilityError {
    InvalidComponent(ComponentValidationError),
    DuplicateComponent { kind: ComponentKind, name: String },
}

impl Display for CompatibilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidComponent(err) => write!(f, "invalid component: {err}"),
            Self::DuplicateComponent { kind, name } => {
                write!(f, "{kind} component already registered: {name}")
            }
        }
    }
}

impl Error for CompatibilityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidComponent(err) => Some(err),
            Self::DuplicateComponent { .. } => None,
        }
    }
}
