use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_account")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub name: String,
    pub flow: i64,
    pub num: i64,
    pub flow_reset_day: i64,
    pub exp_time: i64,
    pub status: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::account_usage::Entity")]
    AccountUsage,
}

impl Related<super::account_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccountUsage.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
