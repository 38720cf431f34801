use sea_orm::entity::prelude::*;

/// Ledger counters of one grant. Only ever written with a higher `revision`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tunnel_usage")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub grant_id: i64,
    pub upload_bytes: i64,
    pub download_bytes: i64,
    pub billed_bytes: i64,
    pub flow_limit: i64,
    pub active_forwards: i64,
    pub next_reset_at: Option<i64>,
    pub last_reset_at: Option<i64>,
    pub last_sequence: Option<i64>,
    pub revision: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user_tunnel::Entity",
        from = "Column::GrantId",
        to = "super::user_tunnel::Column::Id"
    )]
    UserTunnel,
}

impl Related<super::user_tunnel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserTunnel.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
