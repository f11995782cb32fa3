//! Bitmask authorization model.
//!
//! A mask packs seven capabilities for three tiers into disjoint bits:
//!
//! | bits   | tier  |
//! |--------|-------|
//! | 0      | none marker |
//! | 1..=7  | guest |
//! | 8..=14 | owner |
//! | 15..=21| group |
//!
//! Raw bit tests stay inside this module. Everything else goes through the
//! `can_*` predicates on [`PermissionInstance`].

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::reference_id::ReferenceId;

/// What a caller wants to do with a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Peek,
    Read,
    Create,
    Update,
    Delete,
    Execute,
    Refer,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Peek,
        Capability::Read,
        Capability::Create,
        Capability::Update,
        Capability::Delete,
        Capability::Execute,
        Capability::Refer,
    ];

    const fn offset(self) -> u32 {
        match self {
            Capability::Peek => 0,
            Capability::Read => 1,
            Capability::Create => 2,
            Capability::Update => 3,
            Capability::Delete => 4,
            Capability::Execute => 5,
            Capability::Refer => 6,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Peek => "peek",
            Capability::Read => "read",
            Capability::Create => "create",
            Capability::Update => "update",
            Capability::Delete => "delete",
            Capability::Execute => "execute",
            Capability::Refer => "refer",
        };
        f.write_str(s)
    }
}

/// The principal level a bit is granted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Guest,
    Owner,
    Group,
}

impl Tier {
    const fn base(self) -> u32 {
        match self {
            Tier::Guest => 1,
            Tier::Owner => 8,
            Tier::Group => 15,
        }
    }
}

const fn bit(tier: Tier, cap: Capability) -> u64 {
    1 << (tier.base() + cap.offset())
}

const fn crud(tier: Tier) -> u64 {
    bit(tier, Capability::Peek)
        | bit(tier, Capability::Read)
        | bit(tier, Capability::Create)
        | bit(tier, Capability::Update)
        | bit(tier, Capability::Delete)
        | bit(tier, Capability::Refer)
}

/// 64-bit permission mask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthPermission(u64);

impl AuthPermission {
    pub const EMPTY: Self = Self(0);
    pub const NONE: Self = Self(1);

    pub const GUEST_PEEK: Self = Self(bit(Tier::Guest, Capability::Peek));
    pub const GUEST_READ: Self = Self(bit(Tier::Guest, Capability::Read));
    pub const GUEST_CREATE: Self = Self(bit(Tier::Guest, Capability::Create));
    pub const GUEST_UPDATE: Self = Self(bit(Tier::Guest, Capability::Update));
    pub const GUEST_DELETE: Self = Self(bit(Tier::Guest, Capability::Delete));
    pub const GUEST_EXECUTE: Self = Self(bit(Tier::Guest, Capability::Execute));
    pub const GUEST_REFER: Self = Self(bit(Tier::Guest, Capability::Refer));

    pub const USER_PEEK: Self = Self(bit(Tier::Owner, Capability::Peek));
    pub const USER_READ: Self = Self(bit(Tier::Owner, Capability::Read));
    pub const USER_CREATE: Self = Self(bit(Tier::Owner, Capability::Create));
    pub const USER_UPDATE: Self = Self(bit(Tier::Owner, Capability::Update));
    pub const USER_DELETE: Self = Self(bit(Tier::Owner, Capability::Delete));
    pub const USER_EXECUTE: Self = Self(bit(Tier::Owner, Capability::Execute));
    pub const USER_REFER: Self = Self(bit(Tier::Owner, Capability::Refer));

    pub const GROUP_PEEK: Self = Self(bit(Tier::Group, Capability::Peek));
    pub const GROUP_READ: Self = Self(bit(Tier::Group, Capability::Read));
    pub const GROUP_CREATE: Self = Self(bit(Tier::Group, Capability::Create));
    pub const GROUP_UPDATE: Self = Self(bit(Tier::Group, Capability::Update));
    pub const GROUP_DELETE: Self = Self(bit(Tier::Group, Capability::Delete));
    pub const GROUP_EXECUTE: Self = Self(bit(Tier::Group, Capability::Execute));
    pub const GROUP_REFER: Self = Self(bit(Tier::Group, Capability::Refer));

    pub const GUEST_CRUD: Self = Self(crud(Tier::Guest));
    pub const USER_CRUD: Self = Self(crud(Tier::Owner));
    pub const GROUP_CRUD: Self = Self(crud(Tier::Group));

    /// Mask given to rows and tables that do not declare one.
    pub const DEFAULT: Self = Self(
        bit(Tier::Guest, Capability::Peek)
            | bit(Tier::Guest, Capability::Execute)
            | crud(Tier::Owner)
            | bit(Tier::Owner, Capability::Execute)
            | crud(Tier::Group)
            | bit(Tier::Group, Capability::Execute),
    );

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Single-bit mask for a tier and capability.
    #[must_use]
    pub const fn of(tier: Tier, cap: Capability) -> Self {
        Self(bit(tier, cap))
    }

    /// Add one tier/capability bit.
    #[must_use]
    pub const fn with(self, tier: Tier, cap: Capability) -> Self {
        Self(self.0 | bit(tier, cap))
    }

    /// Remove one tier/capability bit.
    #[must_use]
    pub const fn without(self, tier: Tier, cap: Capability) -> Self {
        Self(self.0 & !bit(tier, cap))
    }

    pub(crate) const fn allows(self, tier: Tier, cap: Capability) -> bool {
        let b = bit(tier, cap);
        self.0 & b == b
    }
}

impl BitOr for AuthPermission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AuthPermission {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for AuthPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthPermission({:#x})", self.0)
    }
}

impl From<i64> for AuthPermission {
    #[allow(clippy::cast_sign_loss)]
    fn from(v: i64) -> Self {
        Self(v as u64)
    }
}

impl From<AuthPermission> for i64 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(p: AuthPermission) -> Self {
        p.0 as i64
    }
}

/// A group grant, either held by a caller (membership) or attached to a row.
///
/// For a caller, `relation_reference_id` is the membership row that links the
/// caller to the group. For a row, it is the join row carrying the grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupPermission {
    pub group_reference_id: ReferenceId,
    pub object_reference_id: ReferenceId,
    pub relation_reference_id: ReferenceId,
    pub permission: AuthPermission,
}

impl GroupPermission {
    /// Bare membership in `group` with no relation context.
    #[must_use]
    pub fn member_of(group: ReferenceId) -> Self {
        Self {
            group_reference_id: group,
            object_reference_id: ReferenceId::NULL,
            relation_reference_id: ReferenceId::NULL,
            permission: AuthPermission::EMPTY,
        }
    }
}

/// Effective authorization data for one row or table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionInstance {
    pub owner_id: ReferenceId,
    pub group_permissions: Vec<GroupPermission>,
    pub permission: AuthPermission,
}

impl PermissionInstance {
    #[must_use]
    pub fn new(owner_id: ReferenceId, permission: AuthPermission) -> Self {
        Self {
            owner_id,
            group_permissions: Vec::new(),
            permission,
        }
    }

    #[must_use]
    pub fn with_groups(mut self, groups: Vec<GroupPermission>) -> Self {
        self.group_permissions = groups;
        self
    }

    /// Evaluate one capability.
    ///
    /// Order: owner bit, guest bit, then per caller group the admin bypass
    /// followed by matching grants carrying the group bit. Null ids never
    /// match an owner, a grant or the admin group.
    #[must_use]
    pub fn can(
        &self,
        cap: Capability,
        caller_id: ReferenceId,
        caller_groups: &[GroupPermission],
        admin_group_id: ReferenceId,
    ) -> bool {
        if !caller_id.is_null()
            && caller_id == self.owner_id
            && self.permission.allows(Tier::Owner, cap)
        {
            return true;
        }

        if self.permission.allows(Tier::Guest, cap) {
            return true;
        }

        for caller_group in caller_groups {
            let gid = caller_group.group_reference_id;
            if !admin_group_id.is_null() && gid == admin_group_id {
                return true;
            }
            for grant in &self.group_permissions {
                let granted = grant.group_reference_id;
                if granted.is_null() || !grant.permission.allows(Tier::Group, cap) {
                    continue;
                }
                if gid == granted
                    || (cap == Capability::Read && caller_group.relation_reference_id == granted)
                {
                    return true;
                }
            }
        }

        false
    }

    #[must_use]
    pub fn can_peek(&self, caller: ReferenceId, groups: &[GroupPermission], admin: ReferenceId) -> bool {
        self.can(Capability::Peek, caller, groups, admin)
    }

    #[must_use]
    pub fn can_read(&self, caller: ReferenceId, groups: &[GroupPermission], admin: ReferenceId) -> bool {
        self.can(Capability::Read, caller, groups, admin)
    }

    #[must_use]
    pub fn can_create(&self, caller: ReferenceId, groups: &[GroupPermission], admin: ReferenceId) -> bool {
        self.can(Capability::Create, caller, groups, admin)
    }

    #[must_use]
    pub fn can_update(&self, caller: ReferenceId, groups: &[GroupPermission], admin: ReferenceId) -> bool {
        self.can(Capability::Update, caller, groups, admin)
    }

    #[must_use]
    pub fn can_delete(&self, caller: ReferenceId, groups: &[GroupPermission], admin: ReferenceId) -> bool {
        self.can(Capability::Delete, caller, groups, admin)
    }

    #[must_use]
    pub fn can_execute(&self, caller: ReferenceId, groups: &[GroupPermission], admin: ReferenceId) -> bool {
        self.can(Capability::Execute, caller, groups, admin)
    }

    #[must_use]
    pub fn can_refer(&self, caller: ReferenceId, groups: &[GroupPermission], admin: ReferenceId) -> bool {
        self.can(Capability::Refer, caller, groups, admin)
    }
}
