//! Component declaration and validation for the compatibility manifest.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Component class recorded in a store's compatibility manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentKind {
    Core,
    Extension,
    Interface,
    Plugin,
}

impl ComponentKind {
    /// Stable value persisted in `compatibility.component_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Extension => "extension",
            Self::Interface => "interface",
            Self::Plugin => "plugin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "core" => Some(Self::Core),
            "extension" => Some(Self::Extension),
            "interface" => Some(Self::Interface),
            "plugin" => Some(Self::Plugin),
            _ => None,
        }
    }
}

impl Display for ComponentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(kind, name, version)` row of a compatibility manifest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ComponentEntry {
    pub kind: ComponentKind,
    /// Stable component identifier, e.g. `organizer_alarms`.
    pub name: String,
    /// Semantic version string (`major.minor.patch`).
    pub version: String,
}

impl ComponentEntry {
    pub fn new(kind: ComponentKind, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            version: version.into(),
        }
    }

    /// Validates declaration-level invariants of a registrable component.
    pub fn validate(&self) -> Result<(), ComponentValidationError> {
        if self.kind == ComponentKind::Core {
            return Err(ComponentValidationError::CoreNotRegistrable);
        }

        let name = self.name.trim();
        if name.is_empty() {
            return Err(ComponentValidationError::EmptyName);
        }
        if !is_valid_component_name(name) {
            return Err(ComponentValidationError::InvalidName(self.name.clone()));
        }

        validate_version(&self.version)
    }
}

/// Validates a `major.minor.patch` version string.
pub fn validate_version(version: &str) -> Result<(), ComponentValidationError> {
    let version = version.trim();
    if version.is_empty() {
        return Err(ComponentValidationError::EmptyVersion);
    }
    if !is_semver_triplet(version) {
        return Err(ComponentValidationError::InvalidVersion(
            version.to_string(),
        ));
    }
    Ok(())
}

fn is_valid_component_name(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if c == '.' || c == '_' || c == '-' {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

fn is_semver_triplet(value: &str) -> bool {
    let mut parts = 0;
    for part in value.split('.') {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        parts += 1;
    }
    parts == 3
}

/// Component declaration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentValidationError {
    /// The core row is implied by the running crate and cannot be registered.
    CoreNotRegistrable,
    EmptyName,
    InvalidName(String),
    EmptyVersion,
    InvalidVersion(String),
}

impl Display for ComponentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CoreNotRegistrable => write!(f, "core component cannot be registered"),
            Self::EmptyName => write!(f, "component name must not be empty"),
            Self::InvalidName(value) => write!(f, "component name is invalid: {value}"),
            Self::EmptyVersion => write!(f, "component version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "component version is invalid: {value} (expected major.minor.patch)"
            ),
        }
    }
}

impl Error for ComponentValidationError {}

#[cfg(test)]
mod tests {
    use super::{validate_version, ComponentEntry, ComponentKind, ComponentValidationError};

    #[test]
    fn validates_baseline_component() {
        let entry = ComponentEntry::new(ComponentKind::Extension, "organizer_alarms", "1.0.0");
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn rejects_core_registration() {
        let entry = ComponentEntry::new(ComponentKind::Core, "core", "1.0.0");
        assert_eq!(
            entry.validate().unwrap_err(),
            ComponentValidationError::CoreNotRegistrable
        );
    }

    #[test]
    fn rejects_invalid_name_format() {
        for name in ["Organizer Alarms", "alarms..timer", "_alarms", "alarms-"] {
            let entry = ComponentEntry::new(ComponentKind::Plugin, name, "1.0.0");
            assert!(
                matches!(
                    entry.validate().unwrap_err(),
                    ComponentValidationError::InvalidName(_)
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_invalid_version_format() {
        assert!(matches!(
            validate_version("v1").unwrap_err(),
            ComponentValidationError::InvalidVersion(_)
        ));
        assert!(matches!(
            validate_version("1.2").unwrap_err(),
            ComponentValidationError::InvalidVersion(_)
        ));
        assert_eq!(
            validate_version("  ").unwrap_err(),
            ComponentValidationError::EmptyVersion
        );
        assert!(validate_version("10.0.3").is_ok());
    }

    #[test]
    fn kind_round_trips_through_persisted_value() {
        for kind in [
            ComponentKind::Core,
            ComponentKind::Extension,
            ComponentKind::Interface,
            ComponentKind::Plugin,
        ] {
            assert_eq!(ComponentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ComponentKind::parse("Extension"), None);
    }
}
