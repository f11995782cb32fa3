//! Assembles the [`PermissionInstance`] guarding a row.

use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{Alias, Expr, JoinType, Order, Query};
use tabula_security::{AuthPermission, GroupPermission, PermissionInstance, ReferenceId};

use crate::error::EngineError;
use crate::row::Row;
use crate::schema::column::{DELETED_AT, ID, PERMISSION, REFERENCE_ID};
use crate::schema::{RelationDescriptor, USERGROUP_TABLE};

const GROUP_REF: &str = "group_ref";
const JOIN_REF: &str = "join_ref";
const JOIN_PERMISSION: &str = "join_permission";

/// Owner and mask come from the row itself. Group grants come from the
/// table's join table to `usergroup`, if it has one; a usergroup row also
/// grants itself.
pub(super) async fn row_permission<C: ConnectionTrait>(
    conn: &C,
    row: &Row,
) -> Result<PermissionInstance, EngineError> {
    let table = row.table();
    let mut grants = Vec::new();

    if table.name == USERGROUP_TABLE {
        let me = row.reference_id();
        grants.push(GroupPermission {
            group_reference_id: me,
            object_reference_id: me,
            relation_reference_id: me,
            permission: table.default_permission,
        });
    }
    if let Some(rel) = table.group_relation() {
        grants.extend(group_grants(conn, rel, row).await?);
    }

    Ok(PermissionInstance::new(row.owner_id(), row.permission()).with_groups(grants))
}

async fn group_grants<C: ConnectionTrait>(
    conn: &C,
    rel: &RelationDescriptor,
    row: &Row,
) -> Result<Vec<GroupPermission>, EngineError> {
    let j = Alias::new("j");
    let ug = Alias::new("ug");
    let stmt = Query::select()
        .expr_as(Expr::col((ug.clone(), Alias::new(REFERENCE_ID))), Alias::new(GROUP_REF))
        .expr_as(Expr::col((j.clone(), Alias::new(REFERENCE_ID))), Alias::new(JOIN_REF))
        .expr_as(Expr::col((j.clone(), Alias::new(PERMISSION))), Alias::new(JOIN_PERMISSION))
        .from_as(Alias::new(rel.join_table_name()), j.clone())
        .join_as(
            JoinType::InnerJoin,
            Alias::new(USERGROUP_TABLE),
            ug.clone(),
            Expr::col((j.clone(), Alias::new(rel.object_name.as_str())))
                .equals((ug.clone(), Alias::new(ID))),
        )
        .and_where(Expr::col((j.clone(), Alias::new(rel.subject_name.as_str()))).eq(row.internal_id()))
        .and_where(Expr::col((j.clone(), Alias::new(DELETED_AT))).is_null())
        .and_where(Expr::col((ug, Alias::new(DELETED_AT))).is_null())
        .order_by((j, Alias::new(ID)), Order::Asc)
        .to_owned();

    let backend = conn.get_database_backend();
    let object = row.reference_id();
    conn.query_all(backend.build(&stmt))
        .await?
        .iter()
        .map(|r| -> Result<GroupPermission, EngineError> {
            let group: Vec<u8> = r.try_get("", GROUP_REF)?;
            let join: Vec<u8> = r.try_get("", JOIN_REF)?;
            let mask: i64 = r.try_get("", JOIN_PERMISSION)?;
            Ok(GroupPermission {
                group_reference_id: ReferenceId::lenient(&group),
                object_reference_id: object,
                relation_reference_id: ReferenceId::lenient(&join),
                permission: AuthPermission::from(mask),
            })
        })
        .collect()
}
