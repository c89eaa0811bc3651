/*!
 * Capability registry.
 *
 * Capability groups and the operations they export are compiled-in
 * constant tables. An adapter kind statically declares which groups it
 * implements; a live session narrows that down to what the device reports.
 */
use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Serializer};

/// Suffix matching every operation of a group in fine-grained capability names
pub const ANY_OPERATION: &str = "Any";

const KEY_CONTROL_OPERATIONS: &[&str] = &[
    "Up",
    "Down",
    "Left",
    "Right",
    "OK",
    "Back",
    "Home",
    "Menu",
    "Info",
    "Exit",
    "Num0",
    "Num1",
    "Num2",
    "Num3",
    "Num4",
    "Num5",
    "Num6",
    "Num7",
    "Num8",
    "Num9",
    "ClosedCaptions",
    "List",
    "Send.KeyCode",
];

const MOUSE_CONTROL_OPERATIONS: &[&str] = &["Move", "Scroll", "Click"];

const VOLUME_CONTROL_OPERATIONS: &[&str] = &["Get", "Set", "Up", "Down", "Mute.Get", "Mute.Set"];

const MEDIA_PLAYER_OPERATIONS: &[&str] = &["Play.Media", "Display.Image", "Close"];

const MEDIA_CONTROL_OPERATIONS: &[&str] = &[
    "Play",
    "Pause",
    "Stop",
    "Seek",
    "Position",
    "Duration",
    "PlayState",
];

const WEB_APP_LAUNCHER_OPERATIONS: &[&str] = &["Launch", "Join", "Close", "Message.Send"];

/// A named group of capability operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CapabilityGroup {
    /// Remote-control keys
    KeyControl,
    /// Pointer movement, scrolling and clicks
    MouseControl,
    /// Volume level and mute
    VolumeControl,
    /// Loading media onto the device
    MediaPlayer,
    /// Transport control of the loaded media
    MediaControl,
    /// Launching and talking to web applications
    WebAppLauncher,
}

impl CapabilityGroup {
    /// Every group, in declaration order
    pub const ALL: [CapabilityGroup; 6] = [
        CapabilityGroup::KeyControl,
        CapabilityGroup::MouseControl,
        CapabilityGroup::VolumeControl,
        CapabilityGroup::MediaPlayer,
        CapabilityGroup::MediaControl,
        CapabilityGroup::WebAppLauncher,
    ];

    /// Group identifier
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityGroup::KeyControl => "KeyControl",
            CapabilityGroup::MouseControl => "MouseControl",
            CapabilityGroup::VolumeControl => "VolumeControl",
            CapabilityGroup::MediaPlayer => "MediaPlayer",
            CapabilityGroup::MediaControl => "MediaControl",
            CapabilityGroup::WebAppLauncher => "WebAppLauncher",
        }
    }

    /// Ordered list of the operations this group exports
    pub fn operations(&self) -> &'static [&'static str] {
        match self {
            CapabilityGroup::KeyControl => KEY_CONTROL_OPERATIONS,
            CapabilityGroup::MouseControl => MOUSE_CONTROL_OPERATIONS,
            CapabilityGroup::VolumeControl => VOLUME_CONTROL_OPERATIONS,
            CapabilityGroup::MediaPlayer => MEDIA_PLAYER_OPERATIONS,
            CapabilityGroup::MediaControl => MEDIA_CONTROL_OPERATIONS,
            CapabilityGroup::WebAppLauncher => WEB_APP_LAUNCHER_OPERATIONS,
        }
    }

    /// Whether `operation` is exported by this group
    pub fn exports(&self, operation: &str) -> bool {
        self.operations().contains(&operation)
    }

    /// Fine-grained capability names, e.g. `KeyControl.Up`
    pub fn capability_names(&self) -> impl Iterator<Item = String> + '_ {
        self.operations()
            .iter()
            .map(move |op| format!("{}.{}", self.name(), op))
    }

    /// Parse a group identifier
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.name() == name)
    }
}

impl fmt::Display for CapabilityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Relative preference of an adapter for a capability group
///
/// When one device exposes several services implementing the same group the
/// one with the highest priority is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
pub enum CapabilityPriority {
    /// Works, but another service is usually better
    Low,
    /// Default priority
    #[default]
    Normal,
    /// Preferred implementation
    High,
}

/// An ordered set of capability groups
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CapabilitySet(BTreeSet<CapabilityGroup>);

impl CapabilitySet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set from a slice of groups
    pub fn from_groups(groups: &[CapabilityGroup]) -> Self {
        groups.iter().copied().collect()
    }

    /// Add a group
    pub fn insert(&mut self, group: CapabilityGroup) -> bool {
        self.0.insert(group)
    }

    /// Remove a group
    pub fn remove(&mut self, group: CapabilityGroup) -> bool {
        self.0.remove(&group)
    }

    /// Whether the set contains `group`
    pub fn contains(&self, group: CapabilityGroup) -> bool {
        self.0.contains(&group)
    }

    /// Groups present in both sets
    pub fn intersection(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0.intersection(&other.0).copied().collect())
    }

    /// Whether a fine-grained capability name is covered by this set
    ///
    /// Accepts `Group`, `Group.Any` and `Group.Operation`.
    pub fn covers_name(&self, name: &str) -> bool {
        let (group, operation) = match name.split_once('.') {
            Some((group, operation)) => (group, Some(operation)),
            None => (name, None),
        };
        let Some(group) = CapabilityGroup::parse(group) else {
            return false;
        };
        if !self.contains(group) {
            return false;
        }
        match operation {
            None | Some(ANY_OPERATION) => true,
            Some(operation) => group.exports(operation),
        }
    }

    /// Iterate over the groups in order
    pub fn iter(&self) -> impl Iterator<Item = CapabilityGroup> + '_ {
        self.0.iter().copied()
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<CapabilityGroup> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = CapabilityGroup>>(iter: I) -> Self {
        CapabilitySet(iter.into_iter().collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|g| g.name()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Device families an adapter can implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Cast receivers driven through a managed remote-session API
    Cast,
    /// webOS TVs driven through the pointer input socket
    WebOsPointer,
    /// Application-supplied adapter with its own static declaration
    Custom {
        /// Adapter name
        name: &'static str,
        /// Groups the adapter declares
        groups: &'static [CapabilityGroup],
    },
}

const CAST_GROUPS: &[CapabilityGroup] = &[
    CapabilityGroup::MediaPlayer,
    CapabilityGroup::MediaControl,
    CapabilityGroup::VolumeControl,
    CapabilityGroup::WebAppLauncher,
];

const WEBOS_POINTER_GROUPS: &[CapabilityGroup] =
    &[CapabilityGroup::KeyControl, CapabilityGroup::MouseControl];

impl AdapterKind {
    /// Adapter name
    pub fn name(&self) -> &'static str {
        match self {
            AdapterKind::Cast => "cast",
            AdapterKind::WebOsPointer => "webos-pointer",
            AdapterKind::Custom { name, .. } => name,
        }
    }

    fn declared_groups(&self) -> &'static [CapabilityGroup] {
        match self {
            AdapterKind::Cast => CAST_GROUPS,
            AdapterKind::WebOsPointer => WEBOS_POINTER_GROUPS,
            AdapterKind::Custom { groups, .. } => groups,
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for AdapterKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Capability groups statically declared for an adapter kind
pub fn capabilities_of(kind: AdapterKind) -> CapabilitySet {
    CapabilitySet::from_groups(kind.declared_groups())
}
