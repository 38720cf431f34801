use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tunnel")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub name: String,
    pub in_node_id: i64,
    pub in_ip: Option<String>,
    pub out_node_id: Option<i64>,
    pub out_ip: Option<String>,
    pub tunnel_type: i32,
    pub flow_mode: i32,
    pub protocol: String,
    /// Decimal rendered as text to keep the exact ratio.
    pub traffic_ratio: String,
    pub tcp_listen_addr: Option<String>,
    pub udp_listen_addr: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_tunnel::Entity")]
    UserTunnels,
}

impl Related<super::user_tunnel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserTunnels.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
