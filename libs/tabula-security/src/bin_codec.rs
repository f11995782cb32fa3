//! Opaque binary form of a [`PermissionInstance`], used as a cache value.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! owner reference id   16 bytes
//! permission mask       8 bytes
//! group grants          n * 56 bytes
//!   group reference id     16
//!   object reference id    16
//!   relation reference id  16
//!   permission mask         8
//! ```

use crate::permission::{AuthPermission, GroupPermission, PermissionInstance};
use crate::reference_id::{REFERENCE_ID_LEN, ReferenceId};

/// Owner id plus mask.
pub const PERMISSION_BIN_HEADER_LEN: usize = REFERENCE_ID_LEN + 8;

/// One encoded group grant.
pub const GROUP_BIN_LEN: usize = REFERENCE_ID_LEN * 3 + 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionDecodeError {
    #[error("permission payload too short: {actual} bytes, need at least {PERMISSION_BIN_HEADER_LEN}")]
    TooShort { actual: usize },

    #[error("invalid user group data length: {len} is not a multiple of {GROUP_BIN_LEN}")]
    GroupLength { len: usize },
}

/// Encode `instance` into its binary form.
#[must_use]
pub fn encode_bin(instance: &PermissionInstance) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(PERMISSION_BIN_HEADER_LEN + instance.group_permissions.len() * GROUP_BIN_LEN);
    out.extend_from_slice(instance.owner_id.as_bytes());
    out.extend_from_slice(&instance.permission.bits().to_le_bytes());
    for g in &instance.group_permissions {
        out.extend_from_slice(g.group_reference_id.as_bytes());
        out.extend_from_slice(g.object_reference_id.as_bytes());
        out.extend_from_slice(g.relation_reference_id.as_bytes());
        out.extend_from_slice(&g.permission.bits().to_le_bytes());
    }
    out
}

/// Decode a payload produced by [`encode_bin`].
///
/// # Errors
/// Returns [`PermissionDecodeError`] if the header is truncated or the group
/// section is not a whole number of grants.
pub fn decode_bin(data: &[u8]) -> Result<PermissionInstance, PermissionDecodeError> {
    if data.len() < PERMISSION_BIN_HEADER_LEN {
        return Err(PermissionDecodeError::TooShort { actual: data.len() });
    }
    let (header, groups) = data.split_at(PERMISSION_BIN_HEADER_LEN);
    if groups.len() % GROUP_BIN_LEN != 0 {
        return Err(PermissionDecodeError::GroupLength { len: groups.len() });
    }

    let owner_id = id_at(header, 0);
    let permission = mask_at(header, REFERENCE_ID_LEN);

    let group_permissions = groups
        .chunks_exact(GROUP_BIN_LEN)
        .map(|chunk| GroupPermission {
            group_reference_id: id_at(chunk, 0),
            object_reference_id: id_at(chunk, REFERENCE_ID_LEN),
            relation_reference_id: id_at(chunk, REFERENCE_ID_LEN * 2),
            permission: mask_at(chunk, REFERENCE_ID_LEN * 3),
        })
        .collect();

    Ok(PermissionInstance {
        owner_id,
        group_permissions,
        permission,
    })
}

// Callers have already checked the slice length.
fn id_at(buf: &[u8], at: usize) -> ReferenceId {
    let mut bytes = [0_u8; REFERENCE_ID_LEN];
    bytes.copy_from_slice(&buf[at..at + REFERENCE_ID_LEN]);
    ReferenceId::from_array(bytes)
}

fn mask_at(buf: &[u8], at: usize) -> AuthPermission {
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    AuthPermission::from_bits(u64::from_le_bytes(bytes))
}
