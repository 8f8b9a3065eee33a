use sea_orm::entity::prelude::*;

/// One expected per-service slice of an export job. The composite primary key
/// makes duplicate part delivery a no-op overwrite rather than a second row.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "export_job_parts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub service: String,
    pub received: bool,
    pub received_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::export_jobs::Entity",
        from = "Column::JobId",
        to = "super::export_jobs::Column::Id"
    )]
    Job,
}

impl Related<super::export_jobs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
