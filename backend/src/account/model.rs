use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::schema::accounts;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize, ToSchema)]
#[diesel(table_name = accounts)]
pub struct Account {
    pub id: uuid::Uuid,
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(skip)]
    pub api_token_digest: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
