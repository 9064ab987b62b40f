use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One stock lineage: everything received under the same
/// (project_no, part_no, description, unit_price) key.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub project_no: Option<String>,
    pub part_no: String,
    pub description: Option<String>,
    pub material_no: Option<String>,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub sold_quantity: Decimal,
    pub balance: Decimal,
    pub balance_amount: Decimal,
    pub last_invoice_no: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
