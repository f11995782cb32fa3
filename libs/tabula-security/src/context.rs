use crate::permission::{Capability, GroupPermission, PermissionInstance};
use crate::reference_id::ReferenceId;

/// `CallerContext` identifies who is calling the engine.
///
/// Carries the caller's reference id and the groups it belongs to. Built by
/// whatever authenticates the request and passed unchanged into every
/// engine call.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CallerContext {
    /// The calling user. Null for anonymous callers.
    user_id: ReferenceId,
    /// Group memberships, in the order they were resolved.
    #[serde(default)]
    groups: Vec<GroupPermission>,
}

impl CallerContext {
    /// Create a new `CallerContext` builder
    #[must_use]
    pub fn builder() -> CallerContextBuilder {
        CallerContextBuilder::default()
    }

    /// Anonymous caller: null id, no groups. Only guest bits apply.
    #[must_use]
    pub fn anonymous() -> Self {
        CallerContextBuilder::default().build()
    }

    #[must_use]
    pub fn user_id(&self) -> ReferenceId {
        self.user_id
    }

    #[must_use]
    pub fn groups(&self) -> &[GroupPermission] {
        &self.groups
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_null()
    }

    #[must_use]
    pub fn is_member_of(&self, group: ReferenceId) -> bool {
        !group.is_null() && self.groups.iter().any(|g| g.group_reference_id == group)
    }

    /// Evaluate `cap` for this caller against `instance`.
    #[must_use]
    pub fn can(&self, instance: &PermissionInstance, cap: Capability, admin_group: ReferenceId) -> bool {
        instance.can(cap, self.user_id, &self.groups, admin_group)
    }
}

#[derive(Default)]
pub struct CallerContextBuilder {
    user_id: Option<ReferenceId>,
    groups: Vec<GroupPermission>,
}

impl CallerContextBuilder {
    #[must_use]
    pub fn user_id(mut self, user_id: ReferenceId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Add plain membership in `group`.
    #[must_use]
    pub fn member_of(mut self, group: ReferenceId) -> Self {
        self.groups.push(GroupPermission::member_of(group));
        self
    }

    /// Add a membership that also carries its relation row.
    #[must_use]
    pub fn group(mut self, group: GroupPermission) -> Self {
        self.groups.push(group);
        self
    }

    #[must_use]
    pub fn groups(mut self, groups: Vec<GroupPermission>) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub fn build(self) -> CallerContext {
        CallerContext {
            user_id: self.user_id.unwrap_or_default(),
            groups: self.groups,
        }
    }
}
