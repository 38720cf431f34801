use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_tunnel")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub user_id: i64,
    pub tunnel_id: i64,
    pub flow: i64,
    pub num: i64,
    pub flow_reset_time: Option<i64>,
    pub exp_time: i64,
    pub status: i32,
    pub speed_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tunnel::Entity",
        from = "Column::TunnelId",
        to = "super::tunnel::Column::Id"
    )]
    Tunnel,
    #[sea_orm(has_one = "super::tunnel_usage::Entity")]
    TunnelUsage,
}

impl Related<super::tunnel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tunnel.def()
    }
}

impl Related<super::tunnel_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TunnelUsage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
