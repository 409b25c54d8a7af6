//! Capabilities and capability sets for per-resource grants.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource::ResourceKind;

/// A single capability a user may hold on a project or dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Share,
    Modify,
    Delete,
    Admin,
    /// Only meaningful on datasets.
    CreateProject,
}

impl Capability {
    /// Every capability, in hierarchy order from weakest to strongest,
    /// followed by `CreateProject`.
    pub const ALL: [Capability; 6] = [
        Self::View,
        Self::Share,
        Self::Modify,
        Self::Delete,
        Self::Admin,
        Self::CreateProject,
    ];

    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "view" => Ok(Self::View),
            "share" => Ok(Self::Share),
            "modify" => Ok(Self::Modify),
            "delete" => Ok(Self::Delete),
            "admin" => Ok(Self::Admin),
            "create_project" => Ok(Self::CreateProject),
            _ => Err(crate::Error::InvalidCapability(format!(
                "unknown capability: {s}"
            ))),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Share => "share",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::Admin => "admin",
            Self::CreateProject => "create_project",
        }
    }

    /// Whether this capability can be granted on the given resource kind.
    pub fn applies_to(&self, kind: ResourceKind) -> bool {
        match self {
            Self::CreateProject => kind == ResourceKind::Dataset,
            _ => true,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::View => 1 << 0,
            Self::Share => 1 << 1,
            Self::Modify => 1 << 2,
            Self::Delete => 1 << 3,
            Self::Admin => 1 << 4,
            Self::CreateProject => 1 << 5,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Effective set of capabilities held on one resource.
///
/// Flags are independent: holding `Admin` says nothing about `Delete`
/// unless both are present. Use [`CapabilitySet::with_hierarchy`] to close
/// a set upward when writing a grant.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<Capability>", from = "Vec<Capability>")]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// The empty set (no access).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every capability that applies to the resource kind.
    pub fn full(kind: ResourceKind) -> Self {
        Capability::ALL
            .into_iter()
            .filter(|cap| cap.applies_to(kind))
            .collect()
    }

    /// Build a set from explicit flags, in the column order of the grant tables.
    pub fn from_flags(
        can_view: bool,
        can_share: bool,
        can_modify: bool,
        can_delete: bool,
        can_admin: bool,
        can_create_project: bool,
    ) -> Self {
        let mut set = Self::empty();
        for (flag, cap) in [
            (can_view, Capability::View),
            (can_share, Capability::Share),
            (can_modify, Capability::Modify),
            (can_delete, Capability::Delete),
            (can_admin, Capability::Admin),
            (can_create_project, Capability::CreateProject),
        ] {
            if flag {
                set.insert(cap);
            }
        }
        set
    }

    /// Parse a comma-separated list such as `"view,share"`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Capability::parse)
            .collect()
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// True if any of the given capabilities is held.
    pub fn contains_any(&self, caps: &[Capability]) -> bool {
        caps.iter().any(|cap| self.contains(*cap))
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    pub fn remove(&mut self, cap: Capability) {
        self.0 &= !cap.bit();
    }

    pub fn with(mut self, cap: Capability) -> Self {
        self.insert(cap);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .into_iter()
            .filter(move |cap| self.contains(*cap))
    }

    /// Close the set under admin ⊇ delete ⊇ modify ⊇ share ⊇ view.
    /// `CreateProject` is outside the hierarchy and is left untouched.
    pub fn with_hierarchy(self) -> Self {
        const ORDER: [Capability; 5] = [
            Capability::View,
            Capability::Share,
            Capability::Modify,
            Capability::Delete,
            Capability::Admin,
        ];
        let mut closed = self;
        if let Some(top) = ORDER.iter().rposition(|cap| self.contains(*cap)) {
            for cap in &ORDER[..=top] {
                closed.insert(*cap);
            }
        }
        closed
    }

    /// Check the set only holds capabilities valid for the resource kind.
    pub fn validate_for(&self, kind: ResourceKind) -> crate::Result<()> {
        match self.iter().find(|cap| !cap.applies_to(kind)) {
            Some(cap) => Err(crate::Error::InvalidCapability(format!(
                "{cap} cannot be granted on a {kind}"
            ))),
            None => Ok(()),
        }
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::empty();
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl From<Vec<Capability>> for CapabilitySet {
    fn from(caps: Vec<Capability>) -> Self {
        caps.into_iter().collect()
    }
}

impl From<CapabilitySet> for Vec<Capability> {
    fn from(set: CapabilitySet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|cap| cap.as_str()).collect();
        write!(f, "{}", names.join(","))
    }
}
