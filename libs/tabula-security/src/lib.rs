#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
pub mod bin_codec;
pub mod context;
pub mod permission;
pub mod reference_id;

pub use bin_codec::{
    GROUP_BIN_LEN, PERMISSION_BIN_HEADER_LEN, PermissionDecodeError, decode_bin, encode_bin,
};
pub use context::{CallerContext, CallerContextBuilder};
pub use permission::{AuthPermission, Capability, GroupPermission, PermissionInstance, Tier};
pub use reference_id::{IntoReferenceId, NULL_REFERENCE_ID, ReferenceId, ReferenceIdError};
