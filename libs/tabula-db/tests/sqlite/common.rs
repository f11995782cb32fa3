#![allow(dead_code)]

use std::sync::Arc;

use tabula_db::{
    Attributes, ColumnInfo, ColumnType, ConnectOpts, Db, EngineConfig, RelationDescriptor,
    RelationKind, ResourceEngine, SchemaMutator, SchemaRegistry, Value, connect_db,
};
use tabula_security::{AuthPermission, CallerContext, ReferenceId};
use uuid::Uuid;

/// Isolated in-memory database with a loaded registry, a mutator and an
/// engine whose admin group is `admin_group`.
pub struct TestDb {
    pub db: Db,
    pub registry: Arc<SchemaRegistry>,
    pub mutator: SchemaMutator,
    pub engine: ResourceEngine,
    pub admin_group: ReferenceId,
}

impl TestDb {
    pub async fn new(name: &str) -> Self {
        Self::with_config(name, EngineConfig::default()).await
    }

    pub async fn with_config(name: &str, mut config: EngineConfig) -> Self {
        let dsn = format!(
            "sqlite:file:memdb_{name}_{}?mode=memory&cache=shared",
            Uuid::new_v4()
        );
        let opts = ConnectOpts {
            max_conns: Some(1),
            min_conns: Some(1),
            ..Default::default()
        };
        let db = connect_db(&dsn, opts).await.expect("connect");

        let admin_group = ReferenceId::new_v4();
        config.admin_group_id = Some(admin_group);

        let registry = Arc::new(
            SchemaRegistry::load(db.connection())
                .await
                .expect("load registry"),
        );
        let mutator = SchemaMutator::new(db.clone(), Arc::clone(&registry))
            .with_default_permission(config.default_permission);
        let engine = ResourceEngine::new(Arc::clone(&registry), &config);

        Self {
            db,
            registry,
            mutator,
            engine,
            admin_group,
        }
    }

    pub fn admin(&self) -> CallerContext {
        CallerContext::builder()
            .user_id(ReferenceId::new_v4())
            .member_of(self.admin_group)
            .build()
    }

    /// `post(title, body?)` and `comment(content)`, with `post has_many
    /// comment` and `comment belongs_to post`. Plain users may create rows.
    pub async fn blog(&self) {
        let open = AuthPermission::DEFAULT | AuthPermission::GUEST_CREATE;
        self.mutator
            .create_table(
                self.mutator
                    .new_table("post")
                    .with_permission(open)
                    .with_column(ColumnInfo::new("title", ColumnType::Text))
                    .with_column(ColumnInfo::new("body", ColumnType::Text).nullable()),
            )
            .await
            .expect("create post");
        self.mutator
            .create_table(
                self.mutator
                    .new_table("comment")
                    .with_permission(open)
                    .with_column(ColumnInfo::new("content", ColumnType::Text)),
            )
            .await
            .expect("create comment");
        self.mutator
            .add_relation(RelationDescriptor::new("post", RelationKind::HasMany, "comment"))
            .await
            .expect("post has_many comment");
        self.mutator
            .add_relation(RelationDescriptor::new("comment", RelationKind::BelongsTo, "post"))
            .await
            .expect("comment belongs_to post");
    }
}

pub fn user() -> CallerContext {
    CallerContext::builder()
        .user_id(ReferenceId::new_v4())
        .build()
}

pub fn attrs<const N: usize>(pairs: [(&str, Value); N]) -> Attributes {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
}
