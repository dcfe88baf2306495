use crate::config::AppState;
use crate::error::Result;
use crate::github::model::{WebhookProcessor, extract_instruction};
use crate::installation::model::{AccountType, Installation};
use crate::job::dispatch::dispatch_job;
use axum::body::Bytes;
use axum::extract::State;
use eyre::{OptionExt, eyre};
use octocrab::Octocrab;
use octocrab::models::reactions::ReactionContent;
use octocrab::models::webhook_events::payload::{
    InstallationWebhookEventAction, IssueCommentWebhookEventAction, IssuesWebhookEventAction,
};
use octocrab::models::webhook_events::{EventInstallation, WebhookEvent, WebhookEventPayload};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Where a trigger came from and where to report back to.
struct TriggerSource {
    installation_id: i64,
    repo_id: i64,
    repo_full_name: String,
    owner: String,
    owner_type: AccountType,
    repo: String,
    issue_number: u64,
    /// Present for comment triggers; reactions land on the comment then,
    /// on the issue otherwise.
    comment_id: Option<u64>,
}

#[utoipa::path(post, path = "/webhook", responses((status = OK, body = ())))]
#[tracing::instrument(skip_all)]
async fn webhook(
    State(app_state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<()> {
    let event_name = headers
        .get("X-GitHub-Event")
        .map(|h| h.to_str().unwrap_or_default())
        .unwrap_or_default();
    let signature = headers
        .get("X-Hub-Signature-256")
        .map(|h| h.to_str().unwrap_or_default())
        .unwrap_or_default();

    // Verify the signature against the raw body before any parsing.
    let webhook_secret = app_state
        .secrets
        .github_webhook_secret
        .as_ref()
        .ok_or_else(|| eyre!("GitHub webhook secret not configured"))?;

    WebhookProcessor::verify_webhook_signature(&body, signature, webhook_secret)?;

    let event: WebhookEvent = WebhookEvent::try_from_header_and_body(event_name, &body)?;

    let installation = event
        .installation
        .ok_or_eyre("could not get installation")?;

    let installation_id = match &installation {
        EventInstallation::Full(installation) => installation.id,
        EventInstallation::Minimal(id) => id.id,
    };

    match event.specific {
        WebhookEventPayload::Installation(installation_payload) => {
            match installation_payload.action {
                InstallationWebhookEventAction::Created => {
                    let account = match installation {
                        EventInstallation::Full(installation) => installation.account,
                        EventInstallation::Minimal(_) => {
                            return Err(
                                eyre!("installation created event without full payload").into()
                            );
                        }
                    };
                    let account_type = account.r#type.parse().unwrap_or(AccountType::User);

                    let conn = &mut app_state.pool.get().await?;
                    Installation::upsert(
                        conn,
                        installation_id.0 as i64,
                        &account.login,
                        account_type,
                    )
                    .await?;
                    tracing::info!(
                        installation_id = installation_id.0,
                        account = %account.login,
                        "Installation created"
                    );
                }
                InstallationWebhookEventAction::Deleted => {
                    let conn = &mut app_state.pool.get().await?;
                    Installation::delete(conn, installation_id.0 as i64).await?;
                    tracing::info!(installation_id = installation_id.0, "Installation deleted");
                }
                InstallationWebhookEventAction::Suspend
                | InstallationWebhookEventAction::Unsuspend => {
                    tracing::debug!(
                        installation_id = installation_id.0,
                        "Ignoring installation suspend state change"
                    );
                }
                _ => {}
            }
        }
        WebhookEventPayload::IssueComment(comment_payload) => {
            if !matches!(
                comment_payload.action,
                IssueCommentWebhookEventAction::Created
            ) {
                return Ok(());
            }
            // The dispatch-outcome comment would re-trigger us otherwise.
            if comment_payload.comment.user.r#type == "Bot" {
                tracing::trace!("Ignoring bot comment");
                return Ok(());
            }

            let comment_body = comment_payload.comment.body.clone().unwrap_or_default();
            let Some(instruction) =
                extract_instruction(&comment_body, &app_state.config.github.trigger_phrase)
            else {
                return Ok(());
            };

            let repository = event.repository.ok_or_eyre("comment event without repository")?;
            let owner = repository
                .owner
                .as_ref()
                .ok_or_eyre("repository without owner")?;
            let source = TriggerSource {
                installation_id: installation_id.0 as i64,
                repo_id: repository.id.into_inner() as i64,
                repo_full_name: repository
                    .full_name
                    .clone()
                    .unwrap_or_else(|| format!("{}/{}", owner.login, repository.name)),
                owner: owner.login.clone(),
                owner_type: owner.r#type.parse().unwrap_or(AccountType::User),
                repo: repository.name.clone(),
                issue_number: comment_payload.issue.number,
                comment_id: Some(comment_payload.comment.id.into_inner()),
            };

            // A bare mention means "fix what this issue describes".
            let statement = if instruction.is_empty() {
                issue_statement(
                    &comment_payload.issue.title,
                    comment_payload.issue.body.as_deref(),
                )
            } else {
                instruction
            };

            run_trigger(app_state, source, statement).await?;
        }
        WebhookEventPayload::Issues(issues_payload) => {
            if !matches!(issues_payload.action, IssuesWebhookEventAction::Labeled) {
                return Ok(());
            }
            let label_matches = issues_payload
                .label
                .as_ref()
                .is_some_and(|label| label.name == app_state.config.github.trigger_label);
            if !label_matches {
                return Ok(());
            }

            let repository = event.repository.ok_or_eyre("issues event without repository")?;
            let owner = repository
                .owner
                .as_ref()
                .ok_or_eyre("repository without owner")?;
            let source = TriggerSource {
                installation_id: installation_id.0 as i64,
                repo_id: repository.id.into_inner() as i64,
                repo_full_name: repository
                    .full_name
                    .clone()
                    .unwrap_or_else(|| format!("{}/{}", owner.login, repository.name)),
                owner: owner.login.clone(),
                owner_type: owner.r#type.parse().unwrap_or(AccountType::User),
                repo: repository.name.clone(),
                issue_number: issues_payload.issue.number,
                comment_id: None,
            };

            let statement = issue_statement(
                &issues_payload.issue.title,
                issues_payload.issue.body.as_deref(),
            );

            run_trigger(app_state, source, statement).await?;
        }
        _ => {}
    }
    Ok(())
}

fn issue_statement(title: &str, body: Option<&str>) -> String {
    format!("{}\n\n{}", title, body.unwrap_or_default())
        .trim()
        .to_string()
}

/// Create a job for an inbound trigger and dispatch it in the background.
///
/// The webhook response never depends on the dispatch outcome; success gets
/// a rocket reaction and failures are reported as a comment on the
/// originating thread.
async fn run_trigger(app_state: AppState, source: TriggerSource, statement: String) -> Result<()> {
    let client = app_state
        .github
        .installation(octocrab::models::InstallationId(
            source.installation_id as u64,
        ))?;

    // Acknowledge receipt before doing any work.
    react(&client, &source, ReactionContent::Eyes).await;

    let installation = {
        let conn = &mut app_state.pool.get().await?;
        match Installation::find(conn, source.installation_id).await? {
            Some(installation) => installation,
            // The installation webhook can arrive after the first trigger.
            None => {
                Installation::upsert(
                    conn,
                    source.installation_id,
                    &source.owner,
                    source.owner_type.clone(),
                )
                .await?
            }
        }
    };

    let job = match crate::job::serve::create_job(
        &app_state,
        installation.account_id,
        source.installation_id,
        source.repo_id,
        &source.repo_full_name,
        &statement,
    )
    .await
    {
        Ok(job) => job,
        Err(err) => {
            post_failure_comment(&client, &app_state, &source, &err.to_string(), err.remediation())
                .await;
            return Ok(());
        }
    };

    tokio::spawn(async move {
        match dispatch_job(app_state.clone(), job).await {
            Ok(()) => react(&client, &source, ReactionContent::Rocket).await,
            Err(err) => {
                post_failure_comment(
                    &client,
                    &app_state,
                    &source,
                    &err.user_message(),
                    err.remediation(),
                )
                .await;
            }
        }
    });

    Ok(())
}

async fn react(client: &Octocrab, source: &TriggerSource, content: ReactionContent) {
    let issues = client.issues(&source.owner, &source.repo);
    let result = match source.comment_id {
        Some(comment_id) => issues.create_comment_reaction(comment_id, content).await,
        None => issues.create_reaction(source.issue_number, content).await,
    };
    if let Err(e) = result {
        tracing::warn!(
            repo = %source.repo_full_name,
            issue = source.issue_number,
            "Failed to add reaction: {e}"
        );
    }
}

async fn post_failure_comment(
    client: &Octocrab,
    app_state: &AppState,
    source: &TriggerSource,
    message: &str,
    remediation: Option<&str>,
) {
    let base_url = app_state.config.base_url.to_string();
    let base_url = base_url.trim_end_matches('/');
    let hint = match remediation {
        Some("configure_token") => format!(
            " Configure a valid API token at {base_url}/installations/{} and try again.",
            source.installation_id
        ),
        Some("check_worker_repo") => {
            " Check that the worker repository and its dispatch workflow exist.".to_string()
        }
        _ => String::new(),
    };
    let body = format!("⚠️ Could not start a fix job: {message}.{hint}");

    if let Err(e) = client
        .issues(&source.owner, &source.repo)
        .create_comment(source.issue_number, body)
        .await
    {
        tracing::warn!(
            repo = %source.repo_full_name,
            issue = source.issue_number,
            "Failed to post failure comment: {e}"
        );
    }
}

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(webhook))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_statement_joins_title_and_body() {
        assert_eq!(
            issue_statement("Login broken", Some("Users cannot sign in since Tuesday")),
            "Login broken\n\nUsers cannot sign in since Tuesday"
        );
        assert_eq!(issue_statement("Login broken", None), "Login broken");
    }
}
