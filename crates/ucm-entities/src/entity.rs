//! Fully-qualified UCM entity names.
//!
//! Three name shapes are recognized, tried in order:
//! - standard: `type:shortname@\pvob` (e.g. `baseline:BL_1@\PVOB`)
//! - version: `path@@partition` (e.g. `c:\view\src\main.c@@\main\3`)
//! - tag: `tag@id@\pvob`
//!
//! The first shape that matches wins. A name matching none of them is
//! [`UcmError::NotRecognized`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::UcmError;
use crate::UcmResult;

/// Closed set of entity variants this crate can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Activity,
    Baseline,
    Component,
    Stream,
    Tag,
    Version,
}

impl EntityKind {
    /// Type word for the standard name shape, matched case-insensitively.
    ///
    /// Only the four standard kinds carry a type word; tags and versions are
    /// recognized by their own name shapes.
    pub fn from_type_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "activity" => Some(EntityKind::Activity),
            "baseline" => Some(EntityKind::Baseline),
            "component" => Some(EntityKind::Component),
            "stream" => Some(EntityKind::Stream),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Activity => "activity",
            EntityKind::Baseline => "baseline",
            EntityKind::Component => "component",
            EntityKind::Stream => "stream",
            EntityKind::Tag => "tag",
            EntityKind::Version => "version",
        }
    }

    /// Whether names of this kind use the `type:shortname@\pvob` shape.
    pub fn is_standard(&self) -> bool {
        !matches!(self, EntityKind::Tag | EntityKind::Version)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static STANDARD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+):([\w.\-]+)@(\\[\w.\-]+)$").expect("standard name regex is valid")
});

static VERSION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w:[\w\\.]+)@@([\\\w]+)$").expect("version name regex is valid")
});

static TAG_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^tag@(\w+)@(\\\w+)$").expect("tag name regex is valid"));

/// Immutable reference to a versioned UCM object.
///
/// Two references with the same kind, short name and partition denote the
/// same entity; equality and hashing follow the fully-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityRef {
    kind: EntityKind,
    short_name: String,
    pvob: String,
    fqname: String,
}

impl EntityRef {
    /// Parse a fully-qualified name.
    pub fn parse(fqname: &str) -> UcmResult<Self> {
        if let Some(caps) = STANDARD_NAME.captures(fqname) {
            // An unknown type word is not a fallthrough: the version and tag
            // shapes cannot match a `word:word@\word` string anyway.
            let kind = EntityKind::from_type_word(&caps[1]).ok_or_else(|| {
                UcmError::NotRecognized {
                    fqname: fqname.to_string(),
                }
            })?;
            return Ok(Self {
                kind,
                short_name: caps[2].to_string(),
                pvob: caps[3].to_string(),
                fqname: fqname.to_string(),
            });
        }

        if let Some(caps) = VERSION_NAME.captures(fqname) {
            return Ok(Self {
                kind: EntityKind::Version,
                short_name: caps[1].to_string(),
                pvob: caps[2].to_string(),
                fqname: fqname.to_string(),
            });
        }

        if let Some(caps) = TAG_NAME.captures(fqname) {
            return Ok(Self {
                kind: EntityKind::Tag,
                short_name: caps[1].to_string(),
                pvob: caps[2].to_string(),
                fqname: fqname.to_string(),
            });
        }

        Err(UcmError::NotRecognized {
            fqname: fqname.to_string(),
        })
    }

    /// Parse a name expected to denote `kind`.
    ///
    /// Standard kinds accept the bare `shortname@\pvob` form, which gets the
    /// kind's type word prepended. A name that parses to a different kind is
    /// rejected.
    pub fn parse_as(kind: EntityKind, name: &str) -> UcmResult<Self> {
        let parsed = match Self::parse(name) {
            Ok(entity) => entity,
            Err(err) if kind.is_standard() && !name.contains(':') => {
                Self::parse(&format!("{}:{}", kind, name)).map_err(|_| err)?
            }
            Err(err) => return Err(err),
        };

        if parsed.kind != kind {
            return Err(UcmError::InvalidOperation {
                operation: "resolve".to_string(),
                fqname: name.to_string(),
                reason: format!("expected a {}, found a {}", kind, parsed.kind),
            });
        }
        Ok(parsed)
    }

    /// Build a reference from its parts, deriving the fully-qualified name.
    pub fn new(kind: EntityKind, short_name: &str, pvob: &str) -> UcmResult<Self> {
        let fqname = match kind {
            EntityKind::Tag => format!("tag@{}@{}", short_name, pvob),
            EntityKind::Version => format!("{}@@{}", short_name, pvob),
            _ => format!("{}:{}@{}", kind, short_name, pvob),
        };
        Self::parse_as(kind, &fqname)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Repository partition (the PVOB for standard kinds and tags).
    pub fn pvob(&self) -> &str {
        &self.pvob
    }

    pub fn fqname(&self) -> &str {
        &self.fqname
    }

    /// Multi-line summary used in debug logs.
    pub fn describe(&self) -> String {
        let mut out = format!("----> {} <----\n", self.fqname);
        out.push_str(&format!("Shortname: {}\n", self.short_name));
        if self.kind != EntityKind::Version {
            out.push_str(&format!("PVOB     : {}\n", self.pvob));
        }
        out.push_str(&format!("Type     : {}\n", self.kind));
        out
    }
}

impl TryFrom<String> for EntityRef {
    type Error = UcmError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        EntityRef::parse(&s)
    }
}

impl From<EntityRef> for String {
    fn from(entity: EntityRef) -> Self {
        entity.fqname
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fqname)
    }
}
