use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Authority levels, ascending. `Owner` is implicit (the room's owner) and
/// never appears in the explicit role sets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    UnregisteredUser,
    RegisteredUser,
    TrustedUser,
    Moderator,
    Administrator,
    Owner,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnregisteredUser => "unregistered-user",
            Self::RegisteredUser => "registered-user",
            Self::TrustedUser => "trusted-user",
            Self::Moderator => "moderator",
            Self::Administrator => "administrator",
            Self::Owner => "owner",
        }
    }
}

/// Named capabilities gated by role. The discriminant is the bit position
/// in a role's permission mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Permission {
    PlayPause = 0,
    Skip = 1,
    Seek = 2,
    AddToQueue = 3,
    RemoveFromQueue = 4,
    OrderQueue = 5,
    Vote = 6,
    Chat = 7,
    SetTitle = 8,
    SetDescription = 9,
    SetVisibility = 10,
    SetQueueMode = 11,
    PromoteAdmin = 12,
    DemoteAdmin = 13,
    PromoteModerator = 14,
    DemoteModerator = 15,
    PromoteTrustedUser = 16,
    DemoteTrustedUser = 17,
}

impl Permission {
    /// Number of defined permission bits
    pub const COUNT: u32 = 18;

    #[must_use]
    pub const fn bit(self) -> u64 {
        1u64 << (self as u64)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PlayPause => "playback.play-pause",
            Self::Skip => "playback.skip",
            Self::Seek => "playback.seek",
            Self::AddToQueue => "manage-queue.add",
            Self::RemoveFromQueue => "manage-queue.remove",
            Self::OrderQueue => "manage-queue.order",
            Self::Vote => "manage-queue.vote",
            Self::Chat => "chat",
            Self::SetTitle => "configure-room.set-title",
            Self::SetDescription => "configure-room.set-description",
            Self::SetVisibility => "configure-room.set-visibility",
            Self::SetQueueMode => "configure-room.set-queue-mode",
            Self::PromoteAdmin => "manage-users.promote-admin",
            Self::DemoteAdmin => "manage-users.demote-admin",
            Self::PromoteModerator => "manage-users.promote-moderator",
            Self::DemoteModerator => "manage-users.demote-moderator",
            Self::PromoteTrustedUser => "manage-users.promote-trusted-user",
            Self::DemoteTrustedUser => "manage-users.demote-trusted-user",
        }
    }

    /// The permission required to promote a user *to* the given role.
    /// Only roles held in explicit role sets are promotion targets.
    #[must_use]
    pub const fn promote_to(role: Role) -> Option<Self> {
        match role {
            Role::Administrator => Some(Self::PromoteAdmin),
            Role::Moderator => Some(Self::PromoteModerator),
            Role::TrustedUser => Some(Self::PromoteTrustedUser),
            _ => None,
        }
    }

    /// The permission required to demote a user *from* the given role.
    #[must_use]
    pub const fn demote_from(role: Role) -> Option<Self> {
        match role {
            Role::Administrator => Some(Self::DemoteAdmin),
            Role::Moderator => Some(Self::DemoteModerator),
            Role::TrustedUser => Some(Self::DemoteTrustedUser),
            _ => None,
        }
    }
}

/// Permission bitmask for one role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionBits(pub u64);

impl PermissionBits {
    pub const NONE: u64 = 0;
    /// All defined permission bits set
    pub const ALL: u64 = (1u64 << Permission::COUNT) - 1;

    #[must_use]
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self(Self::NONE)
    }

    #[must_use]
    pub const fn has(&self, permission: Permission) -> bool {
        (self.0 & permission.bit()) == permission.bit()
    }

    pub fn grant(&mut self, permission: Permission) {
        self.0 |= permission.bit();
    }

    pub fn revoke(&mut self, permission: Permission) {
        self.0 &= !permission.bit();
    }
}

impl Default for PermissionBits {
    fn default() -> Self {
        Self::empty()
    }
}

fn mask_of(permissions: &[Permission]) -> PermissionBits {
    let mut bits = PermissionBits::empty();
    for p in permissions {
        bits.grant(*p);
    }
    bits
}

static DEFAULT_GRANTS: Lazy<Grants> = Lazy::new(|| {
    use Permission::{
        AddToQueue, Chat, DemoteAdmin, DemoteModerator, DemoteTrustedUser, OrderQueue,
        PlayPause, PromoteAdmin, PromoteModerator, PromoteTrustedUser, RemoveFromQueue, Seek,
        SetDescription, SetQueueMode, SetTitle, SetVisibility, Skip, Vote,
    };

    let base = mask_of(&[PlayPause, Skip, Seek, AddToQueue, Vote, Chat]);
    // Demotion lands the target *in* a role, and the check is against the
    // mask of that landing role; each mask therefore carries the demote
    // bit for the role directly above it.
    let mut trusted = base;
    trusted.grant(RemoveFromQueue);
    trusted.grant(OrderQueue);
    trusted.grant(DemoteModerator);
    let mut moderator = trusted;
    for p in [
        SetTitle,
        SetDescription,
        SetVisibility,
        SetQueueMode,
        PromoteTrustedUser,
        DemoteTrustedUser,
        DemoteAdmin,
    ] {
        moderator.grant(p);
    }
    let mut admin = moderator;
    for p in [PromoteModerator, PromoteAdmin] {
        admin.grant(p);
    }

    let mut masks = BTreeMap::new();
    masks.insert(Role::UnregisteredUser, base);
    masks.insert(Role::RegisteredUser, base);
    masks.insert(Role::TrustedUser, trusted);
    masks.insert(Role::Moderator, moderator);
    masks.insert(Role::Administrator, admin);
    Grants { masks }
});

/// Per-role permission masks. `Owner` is not stored: it always holds every
/// bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grants {
    masks: BTreeMap<Role, PermissionBits>,
}

impl Default for Grants {
    fn default() -> Self {
        DEFAULT_GRANTS.clone()
    }
}

impl Grants {
    #[must_use]
    pub fn granted(&self, role: Role, permission: Permission) -> bool {
        if role == Role::Owner {
            return true;
        }
        self.masks
            .get(&role)
            .is_some_and(|mask| mask.has(permission))
    }

    /// Check a permission for a role, failing the request on a missing bit.
    pub fn check(&self, role: Role, permission: Permission) -> Result<()> {
        if self.granted(role, permission) {
            Ok(())
        } else {
            Err(Error::PermissionDenied(permission.name()))
        }
    }

    /// Serializable mask for outgoing sync. `Owner` reports all bits.
    #[must_use]
    pub fn get_mask(&self, role: Role) -> u64 {
        if role == Role::Owner {
            return PermissionBits::ALL;
        }
        self.masks.get(&role).map_or(PermissionBits::NONE, |m| m.0)
    }

    /// Replace every role's mask with the other grant set's.
    pub fn set_all_grants(&mut self, other: &Self) {
        self.masks = other.masks.clone();
    }

    /// Overwrite a single role's mask. Setting `Owner` is ignored — the
    /// owner's authority is not configurable.
    pub fn set_mask(&mut self, role: Role, mask: PermissionBits) {
        if role != Role::Owner {
            self.masks.insert(role, mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::UnregisteredUser < Role::RegisteredUser);
        assert!(Role::RegisteredUser < Role::TrustedUser);
        assert!(Role::TrustedUser < Role::Moderator);
        assert!(Role::Moderator < Role::Administrator);
        assert!(Role::Administrator < Role::Owner);
    }

    #[test]
    fn test_permission_bits() {
        let mut bits = PermissionBits::empty();
        assert!(!bits.has(Permission::Chat));
        bits.grant(Permission::Chat);
        assert!(bits.has(Permission::Chat));
        bits.revoke(Permission::Chat);
        assert!(!bits.has(Permission::Chat));
    }

    #[test]
    fn test_default_grants_are_cumulative() {
        let grants = Grants::default();
        for role in [
            Role::UnregisteredUser,
            Role::RegisteredUser,
            Role::TrustedUser,
            Role::Moderator,
            Role::Administrator,
        ] {
            assert!(grants.granted(role, Permission::Chat));
            assert!(grants.granted(role, Permission::PlayPause));
        }

        assert!(!grants.granted(Role::RegisteredUser, Permission::RemoveFromQueue));
        assert!(grants.granted(Role::TrustedUser, Permission::RemoveFromQueue));

        assert!(!grants.granted(Role::TrustedUser, Permission::SetTitle));
        assert!(grants.granted(Role::Moderator, Permission::SetTitle));

        assert!(!grants.granted(Role::Moderator, Permission::PromoteModerator));
        assert!(grants.granted(Role::Administrator, Permission::PromoteModerator));
    }

    #[test]
    fn test_owner_always_granted() {
        let mut grants = Grants::default();
        grants.set_mask(Role::Administrator, PermissionBits::empty());
        assert!(grants.granted(Role::Owner, Permission::PromoteAdmin));
        assert!(!grants.granted(Role::Administrator, Permission::PromoteAdmin));
        assert_eq!(grants.get_mask(Role::Owner), PermissionBits::ALL);
    }

    #[test]
    fn test_check_denies_with_permission_name() {
        let grants = Grants::default();
        let err = grants
            .check(Role::RegisteredUser, Permission::PromoteAdmin)
            .unwrap_err();
        match err {
            Error::PermissionDenied(name) => {
                assert_eq!(name, "manage-users.promote-admin");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_set_all_grants() {
        let mut restrictive = Grants::default();
        restrictive.set_mask(Role::UnregisteredUser, PermissionBits::empty());

        let mut grants = Grants::default();
        grants.set_all_grants(&restrictive);
        assert!(!grants.granted(Role::UnregisteredUser, Permission::Chat));
    }
}
