use crate::crypto;
use crate::error::ApiError;
use crate::schema::{credentials, installations};
use diesel::deserialize::{FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::serialize::ToSql;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use std::io::Write;
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::Zeroizing;

#[derive(
    Debug, Serialize, Deserialize, AsExpression, FromSqlRow, Display, EnumString, ToSchema, Clone,
    PartialEq,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
pub enum AccountType {
    #[strum(serialize = "User")]
    User,
    #[strum(serialize = "Organization")]
    Organization,
}

impl ToSql<diesel::sql_types::Text, diesel::pg::Pg> for AccountType {
    fn to_sql(
        &self,
        out: &mut diesel::serialize::Output<diesel::pg::Pg>,
    ) -> diesel::serialize::Result {
        out.write_all(self.to_string().as_bytes())?;
        Ok(diesel::serialize::IsNull::No)
    }
}

impl FromSql<diesel::sql_types::Text, diesel::pg::Pg> for AccountType {
    fn from_sql(bytes: diesel::pg::PgValue<'_>) -> diesel::deserialize::Result<Self> {
        let string = <String as FromSql<diesel::sql_types::Text, diesel::pg::Pg>>::from_sql(bytes)?;
        string.parse().map_err(|_| "Unrecognized account type".into())
    }
}

/// One GitHub App installation. The primary key is the external installation
/// id. `account_id` is null until an authenticated caller first interacts
/// with the installation, at which point it is claimed lazily.
#[derive(
    Queryable, Selectable, Identifiable, Insertable, Debug, Clone, Serialize, ToSchema,
)]
#[diesel(table_name = installations)]
pub struct Installation {
    pub id: i64,
    pub account_login: String,
    pub account_type: AccountType,
    pub account_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Installation {
    pub async fn get(
        conn: &mut AsyncPgConnection,
        id: i64,
    ) -> diesel::result::QueryResult<Self> {
        installations::table
            .filter(installations::id.eq(id))
            .select(Installation::as_select())
            .first(conn)
            .await
    }

    pub async fn find(
        conn: &mut AsyncPgConnection,
        id: i64,
    ) -> diesel::result::QueryResult<Option<Self>> {
        installations::table
            .filter(installations::id.eq(id))
            .select(Installation::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// Insert or refresh an installation. The update path never touches
    /// `account_id`; ownership survives reinstalls.
    pub async fn upsert(
        conn: &mut AsyncPgConnection,
        id: i64,
        account_login: &str,
        account_type: AccountType,
    ) -> diesel::result::QueryResult<Self> {
        diesel::insert_into(installations::table)
            .values((
                installations::id.eq(id),
                installations::account_login.eq(account_login),
                installations::account_type.eq(&account_type),
            ))
            .on_conflict(installations::id)
            .do_update()
            .set((
                installations::account_login.eq(account_login),
                installations::account_type.eq(&account_type),
            ))
            .returning(Installation::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn delete(conn: &mut AsyncPgConnection, id: i64) -> diesel::result::QueryResult<()> {
        diesel::delete(installations::table.filter(installations::id.eq(id)))
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn list_for_account(
        conn: &mut AsyncPgConnection,
        account_id: Uuid,
    ) -> diesel::result::QueryResult<Vec<Self>> {
        installations::table
            .filter(installations::account_id.eq(account_id))
            .order_by(installations::id)
            .select(Installation::as_select())
            .load(conn)
            .await
    }

    /// Verify that `account_id` owns the installation, claiming it when it is
    /// still unowned. The claim is a guarded update so two concurrent callers
    /// cannot both become the owner.
    pub async fn claim_or_verify(
        conn: &mut AsyncPgConnection,
        id: i64,
        account_id: Uuid,
    ) -> Result<Self, ApiError> {
        let installation = Self::find(conn, id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or(ApiError::NotFound("installation"))?;

        match installation.account_id {
            Some(owner) if owner == account_id => Ok(installation),
            Some(_) => Err(ApiError::Forbidden(
                "installation belongs to another account".to_string(),
            )),
            None => {
                diesel::update(installations::table)
                    .filter(installations::id.eq(id))
                    .filter(installations::account_id.is_null())
                    .set(installations::account_id.eq(account_id))
                    .execute(conn)
                    .await
                    .map_err(|e| ApiError::Internal(e.to_string()))?;

                // Reload and re-check: a concurrent claim may have won.
                let claimed = Self::get(conn, id)
                    .await
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                if claimed.account_id == Some(account_id) {
                    Ok(claimed)
                } else {
                    Err(ApiError::Forbidden(
                        "installation belongs to another account".to_string(),
                    ))
                }
            }
        }
    }
}

#[derive(
    Debug, Serialize, Deserialize, AsExpression, FromSqlRow, Display, EnumString, ToSchema, Clone,
    PartialEq,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
pub enum CredentialKind {
    #[strum(serialize = "api_key")]
    #[serde(rename = "api_key")]
    ApiKey,
    #[strum(serialize = "oauth_token")]
    #[serde(rename = "oauth_token")]
    OauthToken,
}

impl ToSql<diesel::sql_types::Text, diesel::pg::Pg> for CredentialKind {
    fn to_sql(
        &self,
        out: &mut diesel::serialize::Output<diesel::pg::Pg>,
    ) -> diesel::serialize::Result {
        out.write_all(self.to_string().as_bytes())?;
        Ok(diesel::serialize::IsNull::No)
    }
}

impl FromSql<diesel::sql_types::Text, diesel::pg::Pg> for CredentialKind {
    fn from_sql(bytes: diesel::pg::PgValue<'_>) -> diesel::deserialize::Result<Self> {
        let string = <String as FromSql<diesel::sql_types::Text, diesel::pg::Pg>>::from_sql(bytes)?;
        string.parse().map_err(|_| "Unrecognized credential kind".into())
    }
}

#[derive(
    Debug, Serialize, Deserialize, AsExpression, FromSqlRow, Display, EnumString, ToSchema, Clone,
    PartialEq,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    #[strum(serialize = "active")]
    Active,
    #[strum(serialize = "invalid")]
    Invalid,
}

impl ToSql<diesel::sql_types::Text, diesel::pg::Pg> for CredentialStatus {
    fn to_sql(
        &self,
        out: &mut diesel::serialize::Output<diesel::pg::Pg>,
    ) -> diesel::serialize::Result {
        out.write_all(self.to_string().as_bytes())?;
        Ok(diesel::serialize::IsNull::No)
    }
}

impl FromSql<diesel::sql_types::Text, diesel::pg::Pg> for CredentialStatus {
    fn from_sql(bytes: diesel::pg::PgValue<'_>) -> diesel::deserialize::Result<Self> {
        let string = <String as FromSql<diesel::sql_types::Text, diesel::pg::Pg>>::from_sql(bytes)?;
        string.parse().map_err(|_| "Unrecognized credential status".into())
    }
}

/// Validation failures tolerated before a credential is flipped to invalid.
const MAX_FAILED_ATTEMPTS: i32 = 3;

/// Number of leading characters kept as the informational display prefix.
const DISPLAY_PREFIX_LEN: usize = 8;

/// One encrypted secret per installation; uniqueness on `installation_id` is
/// enforced by the storage layer and saving is an insert-or-replace upsert.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = credentials)]
pub struct Credential {
    pub id: Uuid,
    pub installation_id: i64,
    pub ciphertext: String,
    pub nonce: String,
    pub auth_tag: String,
    pub display_prefix: String,
    pub kind: CredentialKind,
    pub status: CredentialStatus,
    pub failed_attempts: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Credential {
    /// Encrypt and store a secret, replacing any previous credential for the
    /// installation. Saving resets the status to active and the failure
    /// counter to zero.
    pub async fn save(
        conn: &mut AsyncPgConnection,
        installation_id: i64,
        kind: CredentialKind,
        plaintext: &str,
        master_key: &str,
    ) -> crate::error::Result<Self> {
        let encrypted = crypto::encrypt(plaintext.as_bytes(), master_key)?;
        let display_prefix: String = plaintext.chars().take(DISPLAY_PREFIX_LEN).collect();

        let credential = diesel::insert_into(credentials::table)
            .values((
                credentials::id.eq(Uuid::now_v7()),
                credentials::installation_id.eq(installation_id),
                credentials::ciphertext.eq(hex::encode(&encrypted.ciphertext)),
                credentials::nonce.eq(hex::encode(encrypted.nonce)),
                credentials::auth_tag.eq(hex::encode(encrypted.tag)),
                credentials::display_prefix.eq(&display_prefix),
                credentials::kind.eq(&kind),
                credentials::status.eq(CredentialStatus::Active),
                credentials::failed_attempts.eq(0),
            ))
            .on_conflict(credentials::installation_id)
            .do_update()
            .set((
                credentials::ciphertext.eq(hex::encode(&encrypted.ciphertext)),
                credentials::nonce.eq(hex::encode(encrypted.nonce)),
                credentials::auth_tag.eq(hex::encode(encrypted.tag)),
                credentials::display_prefix.eq(&display_prefix),
                credentials::kind.eq(&kind),
                credentials::status.eq(CredentialStatus::Active),
                credentials::failed_attempts.eq(0),
                credentials::updated_at.eq(diesel::dsl::now),
            ))
            .returning(Credential::as_returning())
            .get_result(conn)
            .await?;

        Ok(credential)
    }

    pub async fn get_for_installation(
        conn: &mut AsyncPgConnection,
        installation_id: i64,
    ) -> diesel::result::QueryResult<Option<Self>> {
        credentials::table
            .filter(credentials::installation_id.eq(installation_id))
            .select(Credential::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }

    /// Record one validation failure. The third failure flips the status to
    /// invalid, after which the credential must be saved again to be used.
    pub async fn record_failure(
        conn: &mut AsyncPgConnection,
        installation_id: i64,
    ) -> diesel::result::QueryResult<()> {
        let updated: Option<Credential> = diesel::update(credentials::table)
            .filter(credentials::installation_id.eq(installation_id))
            .set((
                credentials::failed_attempts.eq(credentials::failed_attempts + 1),
                credentials::updated_at.eq(diesel::dsl::now),
            ))
            .returning(Credential::as_returning())
            .get_result(conn)
            .await
            .optional()?;

        if let Some(credential) = updated {
            if credential.failed_attempts >= MAX_FAILED_ATTEMPTS {
                diesel::update(credentials::table)
                    .filter(credentials::installation_id.eq(installation_id))
                    .set(credentials::status.eq(CredentialStatus::Invalid))
                    .execute(conn)
                    .await?;
            }
        }
        Ok(())
    }

    /// Decrypt the stored secret. Tamper and corruption surface as hard
    /// errors; the plaintext never leaves a zeroizing buffer.
    pub fn decrypt_token(&self, master_key: &str) -> crate::error::Result<Zeroizing<String>> {
        let secret = crypto::EncryptedSecret {
            ciphertext: hex::decode(&self.ciphertext)?,
            nonce: hex::decode(&self.nonce)?
                .try_into()
                .map_err(|_| eyre::eyre!("stored nonce has the wrong length"))?,
            tag: hex::decode(&self.auth_tag)?
                .try_into()
                .map_err(|_| eyre::eyre!("stored auth tag has the wrong length"))?,
        };
        let plaintext = crypto::decrypt(&secret, master_key)?;
        let token = String::from_utf8(plaintext.to_vec())
            .map_err(|_| eyre::eyre!("decrypted credential is not valid UTF-8"))?;
        Ok(Zeroizing::new(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_type_roundtrip() {
        assert_eq!("User".parse::<AccountType>().unwrap(), AccountType::User);
        assert_eq!(
            "Organization".parse::<AccountType>().unwrap(),
            AccountType::Organization
        );
        assert_eq!(AccountType::Organization.to_string(), "Organization");
        assert!("Bot".parse::<AccountType>().is_err());
    }

    #[test]
    fn test_credential_enums_roundtrip() {
        assert_eq!(
            "api_key".parse::<CredentialKind>().unwrap(),
            CredentialKind::ApiKey
        );
        assert_eq!(CredentialKind::OauthToken.to_string(), "oauth_token");
        assert_eq!(
            "active".parse::<CredentialStatus>().unwrap(),
            CredentialStatus::Active
        );
        assert_eq!(CredentialStatus::Invalid.to_string(), "invalid");
    }
}
