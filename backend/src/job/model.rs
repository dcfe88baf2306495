use crate::classifier::Classification;
use crate::error::ApiError;
use crate::schema::jobs;
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

pub const MIN_PROBLEM_STATEMENT_CHARS: usize = 10;
pub const MAX_PROBLEM_STATEMENT_CHARS: usize = 5000;

/// Job lifecycle states. `pending` is set at creation, `running` only after
/// the workflow dispatch succeeds, and the two terminal states are set by the
/// completion callback, the dispatch failure path, or the expiry watchdog.
#[derive(
    Debug, Serialize, Deserialize, AsExpression, FromSqlRow, Display, EnumString, ToSchema, Clone,
    Copy, PartialEq, Eq,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[strum(serialize = "pending")]
    Pending,
    #[strum(serialize = "running")]
    Running,
    #[strum(serialize = "completed")]
    Completed,
    #[strum(serialize = "failed")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl ToSql<diesel::sql_types::Text, diesel::pg::Pg> for JobStatus {
    fn to_sql(
        &self,
        out: &mut diesel::serialize::Output<diesel::pg::Pg>,
    ) -> diesel::serialize::Result {
        out.write_all(self.to_string().as_bytes())?;
        Ok(diesel::serialize::IsNull::No)
    }
}

impl FromSql<diesel::sql_types::Text, diesel::pg::Pg> for JobStatus {
    fn from_sql(bytes: diesel::pg::PgValue<'_>) -> diesel::deserialize::Result<Self> {
        let string = <String as FromSql<diesel::sql_types::Text, diesel::pg::Pg>>::from_sql(bytes)?;
        string.parse().map_err(|_| "Unrecognized status".into())
    }
}

/// Terminal outcome applied by the completion callback, the dispatch failure
/// path, and the watchdog. One function applies all of them so the failure
/// handling cannot drift apart.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed {
        branch_name: Option<String>,
        pr_number: Option<i64>,
        pr_url: Option<String>,
    },
    Failed {
        error_message: String,
    },
}

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema, Clone)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub account_id: Option<Uuid>,
    pub installation_id: i64,
    pub repo_id: i64,
    pub repo_full_name: String,
    pub problem_statement: String,
    pub status: JobStatus,
    pub complexity: Option<String>,
    pub bug_type: Option<String>,
    pub priority: Option<String>,
    pub confidence: Option<i32>,
    pub branch_name: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub error_message: Option<String>,
    pub edited: bool,
    pub edited_statement: Option<String>,
    pub regeneration_count: i32,
    pub previous_job_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct NewJob<'a> {
    pub account_id: Option<Uuid>,
    pub installation_id: i64,
    pub repo_id: i64,
    pub repo_full_name: &'a str,
    pub problem_statement: &'a str,
}

pub fn validate_problem_statement(statement: &str) -> Result<(), ApiError> {
    let chars = statement.chars().count();
    if chars < MIN_PROBLEM_STATEMENT_CHARS {
        return Err(ApiError::Validation(format!(
            "problem statement must be at least {MIN_PROBLEM_STATEMENT_CHARS} characters"
        )));
    }
    if chars > MAX_PROBLEM_STATEMENT_CHARS {
        return Err(ApiError::Validation(format!(
            "problem statement must be at most {MAX_PROBLEM_STATEMENT_CHARS} characters"
        )));
    }
    Ok(())
}

impl Job {
    pub async fn create(
        conn: &mut AsyncPgConnection,
        new: NewJob<'_>,
        classification: &Classification,
    ) -> Result<Self, diesel::result::Error> {
        diesel::insert_into(jobs::table)
            .values((
                jobs::id.eq(Uuid::now_v7()),
                jobs::account_id.eq(new.account_id),
                jobs::installation_id.eq(new.installation_id),
                jobs::repo_id.eq(new.repo_id),
                jobs::repo_full_name.eq(new.repo_full_name),
                jobs::problem_statement.eq(new.problem_statement),
                jobs::status.eq(JobStatus::Pending),
                jobs::complexity.eq(classification.complexity.to_string()),
                jobs::bug_type.eq(classification.bug_type),
                jobs::priority.eq(classification.priority.to_string()),
                jobs::confidence.eq(classification.confidence),
            ))
            .returning(Job::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn get(conn: &mut AsyncPgConnection, id: Uuid) -> diesel::result::QueryResult<Self> {
        jobs::table
            .filter(jobs::id.eq(id))
            .select(Job::as_select())
            .first(conn)
            .await
    }

    pub async fn find(
        conn: &mut AsyncPgConnection,
        id: Uuid,
    ) -> diesel::result::QueryResult<Option<Self>> {
        jobs::table
            .filter(jobs::id.eq(id))
            .select(Job::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn list_for_account(
        conn: &mut AsyncPgConnection,
        account_id: Uuid,
    ) -> diesel::result::QueryResult<Vec<Self>> {
        jobs::table
            .filter(jobs::account_id.eq(account_id))
            .order_by(jobs::id.desc()) // UUIDv7 is time ordered
            .select(Job::as_select())
            .load(conn)
            .await
    }

    /// Move a pending job to running. Guarded on the current status so a job
    /// that already reached a terminal state stays there.
    pub async fn mark_running(
        conn: &mut AsyncPgConnection,
        id: Uuid,
    ) -> diesel::result::QueryResult<Option<Self>> {
        let now = chrono::Utc::now();
        diesel::update(jobs::table)
            .filter(jobs::id.eq(id))
            .filter(jobs::status.eq(JobStatus::Pending))
            .set((
                jobs::status.eq(JobStatus::Running),
                jobs::started_at.eq(now),
            ))
            .returning(Job::as_returning())
            .get_result(conn)
            .await
            .optional()
    }

    /// Apply a terminal outcome. The status filter makes the update a no-op
    /// for jobs that are already terminal, so a replayed or contradictory
    /// second callback cannot overwrite the first; `None` means not applied.
    pub async fn apply_outcome(
        conn: &mut AsyncPgConnection,
        id: Uuid,
        outcome: &JobOutcome,
    ) -> diesel::result::QueryResult<Option<Self>> {
        let open = vec![JobStatus::Pending, JobStatus::Running];
        let now = chrono::Utc::now();
        match outcome {
            JobOutcome::Completed {
                branch_name,
                pr_number,
                pr_url,
            } => {
                diesel::update(jobs::table)
                    .filter(jobs::id.eq(id))
                    .filter(jobs::status.eq_any(open))
                    .set((
                        jobs::status.eq(JobStatus::Completed),
                        jobs::branch_name.eq(branch_name),
                        jobs::pr_number.eq(pr_number),
                        jobs::pr_url.eq(pr_url),
                        jobs::completed_at.eq(now),
                    ))
                    .returning(Job::as_returning())
                    .get_result(conn)
                    .await
                    .optional()
            }
            JobOutcome::Failed { error_message } => {
                diesel::update(jobs::table)
                    .filter(jobs::id.eq(id))
                    .filter(jobs::status.eq_any(open))
                    .set((
                        jobs::status.eq(JobStatus::Failed),
                        jobs::error_message.eq(error_message),
                        jobs::completed_at.eq(now),
                    ))
                    .returning(Job::as_returning())
                    .get_result(conn)
                    .await
                    .optional()
            }
        }
    }

    /// Find running jobs whose dispatch happened more than `timeout_seconds`
    /// ago and that never received a callback.
    pub async fn find_expired(
        conn: &mut AsyncPgConnection,
        timeout_seconds: u64,
    ) -> diesel::result::QueryResult<Vec<Self>> {
        let timeout_duration = chrono::Duration::seconds(timeout_seconds as i64);
        let cutoff_time = chrono::Utc::now() - timeout_duration;

        jobs::table
            .filter(jobs::status.eq(JobStatus::Running))
            .filter(jobs::started_at.lt(cutoff_time))
            .select(Job::as_select())
            .load(conn)
            .await
    }

    /// The statement the worker should act on: the edited text when the user
    /// revised it, the original otherwise.
    pub fn effective_statement(&self) -> &str {
        self.edited_statement.as_deref().unwrap_or(&self.problem_statement)
    }

    /// Regeneration never mutates a terminal row; it creates a fresh cycle
    /// that reuses the original branch name and links back to this job.
    pub async fn regenerate(
        &self,
        conn: &mut AsyncPgConnection,
        edited_statement: Option<&str>,
        classification: &Classification,
    ) -> diesel::result::QueryResult<Self> {
        diesel::insert_into(jobs::table)
            .values((
                jobs::id.eq(Uuid::now_v7()),
                jobs::account_id.eq(self.account_id),
                jobs::installation_id.eq(self.installation_id),
                jobs::repo_id.eq(self.repo_id),
                jobs::repo_full_name.eq(&self.repo_full_name),
                jobs::problem_statement.eq(&self.problem_statement),
                jobs::status.eq(JobStatus::Pending),
                jobs::complexity.eq(classification.complexity.to_string()),
                jobs::bug_type.eq(classification.bug_type),
                jobs::priority.eq(classification.priority.to_string()),
                jobs::confidence.eq(classification.confidence),
                jobs::branch_name.eq(&self.branch_name),
                jobs::edited.eq(edited_statement.is_some() || self.edited),
                jobs::edited_statement
                    .eq(edited_statement.or(self.edited_statement.as_deref())),
                jobs::regeneration_count.eq(self.regeneration_count + 1),
                jobs::previous_job_id.eq(self.id),
            ))
            .returning(Job::as_returning())
            .get_result(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for (status, text) in [
            (JobStatus::Pending, "pending"),
            (JobStatus::Running, "running"),
            (JobStatus::Completed, "completed"),
            (JobStatus::Failed, "failed"),
        ] {
            assert_eq!(status.to_string(), text);
            assert_eq!(text.parse::<JobStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_problem_statement_bounds() {
        assert!(validate_problem_statement("too short").is_err());
        assert!(validate_problem_statement("Fix null pointer in UserService").is_ok());
        // Exactly at the boundaries.
        assert!(validate_problem_statement(&"x".repeat(MIN_PROBLEM_STATEMENT_CHARS)).is_ok());
        assert!(validate_problem_statement(&"x".repeat(MIN_PROBLEM_STATEMENT_CHARS - 1)).is_err());
        assert!(validate_problem_statement(&"x".repeat(MAX_PROBLEM_STATEMENT_CHARS)).is_ok());
        assert!(validate_problem_statement(&"x".repeat(MAX_PROBLEM_STATEMENT_CHARS + 1)).is_err());
    }
}
