//! The step sequence.
//!
//! Steps run strictly in order against one elevated client and, once
//! permissions are granted, a restricted client derived from them. Only the
//! first step can abort the run; every later result is judged by its policy
//! and recorded.

use std::fmt::Display;
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, info};

use docdb_client::{
    ClientError, Document, DocumentStore, FeedOptions, HashPartitionResolver, PartitionKey,
    Permission, PermissionMode, QuerySpec, StoredProcedure, User,
};

use crate::config::ScenarioConfig;
use crate::error::ScenarioError;
use crate::policy::{FailureReason, StepId, StepPolicy};
use crate::report::ScenarioReport;

const SELECT_ALL: &str = "SELECT * FROM root";

/// Body the procedure answers with when its partition is empty.
pub const NO_DOCS: &str = "no docs found";

/// Handles created along the way, each written once.
///
/// Every path sent is built from ids. Self-links returned by the service are
/// rid-based and never get id segments appended to them.
struct ScenarioContext<'a> {
    config: &'a ScenarioConfig,
    elevated: Arc<dyn DocumentStore>,
    procedure: Option<StoredProcedure>,
    user: Option<User>,
    restricted: Option<Arc<dyn DocumentStore>>,
}

impl ScenarioContext<'_> {
    fn database_link(&self) -> String {
        self.config.database_link()
    }

    fn collection_link(&self) -> String {
        self.config.collection_link()
    }

    fn procedure_link(&self) -> String {
        self.config.procedure_link()
    }

    /// Link of the test user once it has been created.
    fn user_link(&self) -> Option<String> {
        self.user.as_ref().map(|_| self.config.user_link())
    }
}

/// Number of documents in a procedure response. The body is either the
/// [`NO_DOCS`] marker or `{"partitionKey": .., "docs": [..]}`, possibly
/// serialized into a JSON string.
pub fn procedure_document_count(body: &Value) -> Result<usize, ScenarioError> {
    let parsed;
    let object = match body {
        Value::String(text) if text == NO_DOCS => return Ok(0),
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).map_err(|e| {
                ScenarioError::Verification(format!("procedure body is not JSON: {}", e))
            })?;
            &parsed
        }
        other => other,
    };
    object
        .get("docs")
        .and_then(Value::as_array)
        .map(Vec::len)
        .ok_or_else(|| {
            ScenarioError::Verification("procedure body has no 'docs' array".to_string())
        })
}

fn test_document(config: &ScenarioConfig, partition: &str) -> Document {
    Document::new()
        .with_field(config.partition_key.clone(), partition)
        .with_field("data", "a")
        .with_field("info", "b")
}

/// Records `result` under `policy` and hands the value back on success.
fn check<T, E: Display>(
    report: &mut ScenarioReport,
    step: StepId,
    label: &str,
    policy: StepPolicy,
    result: Result<T, E>,
    describe: impl FnOnce(&T) -> String,
) -> Option<T> {
    match result {
        Ok(value) => {
            report.record(step, label, policy, Ok(describe(&value)));
            Some(value)
        }
        Err(err) => {
            report.record(step, label, policy, Err(err.to_string()));
            None
        }
    }
}

/// Runs every step, recording into `report`. Returns an error only when the
/// database or collection cannot be resolved.
pub async fn run(
    config: &ScenarioConfig,
    elevated: Arc<dyn DocumentStore>,
    report: &mut ScenarioReport,
) -> Result<(), ScenarioError> {
    info!(
        database = %config.database_id,
        collection = %config.collection_id,
        user = %config.test_user,
        "starting scenario"
    );

    let mut ctx = resolve_handles(config, elevated, report).await?;
    reset_procedure(&ctx, report).await;
    create_procedure(&mut ctx, report).await;
    seed_documents(&ctx, report).await;
    bulk_create(&ctx, report).await;
    run_elevated_procedure(&ctx, report, StepId::ElevatedProcedure).await;
    reset_user(&ctx, report).await;
    create_user(&mut ctx, report).await;
    grant_permissions(&ctx, report).await;
    derive_restricted_client(&mut ctx, report).await;
    register_resolver(&ctx, report);
    settle(&ctx, report).await;
    refresh_permission(&ctx, report).await;
    restricted_creates(&ctx, report).await;
    run_elevated_procedure(&ctx, report, StepId::ElevatedProcedureRerun).await;
    elevated_queries(&ctx, report).await;
    restricted_checks(&ctx, report).await;
    cleanup(&ctx, report).await;

    info!("scenario finished");
    Ok(())
}

async fn resolve_handles<'a>(
    config: &'a ScenarioConfig,
    elevated: Arc<dyn DocumentStore>,
    report: &mut ScenarioReport,
) -> Result<ScenarioContext<'a>, ScenarioError> {
    let step = StepId::ResolveHandles;

    match elevated.read_database(&config.database_id).await {
        Ok(database) => {
            report.record(
                step,
                "read database",
                StepPolicy::Fatal,
                Ok(format!("id={}", database.id)),
            );
        }
        Err(source) => {
            report.record(step, "read database", StepPolicy::Fatal, Err(source.to_string()));
            return Err(ScenarioError::Setup {
                what: "database",
                source,
            });
        }
    };

    match elevated
        .read_collection(&config.database_link(), &config.collection_id)
        .await
    {
        Ok(collection) => {
            let partitioned_on = collection
                .partition_key
                .as_ref()
                .and_then(|definition| definition.field())
                .unwrap_or("none");
            report.record(
                step,
                "read collection",
                StepPolicy::Fatal,
                Ok(format!("id={} partition={}", collection.id, partitioned_on)),
            );
        }
        Err(source) => {
            report.record(
                step,
                "read collection",
                StepPolicy::Fatal,
                Err(source.to_string()),
            );
            return Err(ScenarioError::Setup {
                what: "collection",
                source,
            });
        }
    };

    Ok(ScenarioContext {
        config,
        elevated,
        procedure: None,
        user: None,
        restricted: None,
    })
}

async fn reset_procedure(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let result = match ctx.elevated.delete_stored_procedure(&ctx.procedure_link()).await {
        Ok(()) => Ok("deleted".to_string()),
        Err(err) if err.is_not_found() => Ok("absent".to_string()),
        Err(err) => Err(err.to_string()),
    };
    report.record(
        StepId::ResetProcedure,
        "delete procedure",
        StepPolicy::BestEffort,
        result,
    );
}

async fn create_procedure(ctx: &mut ScenarioContext<'_>, report: &mut ScenarioReport) {
    let step = StepId::CreateProcedure;
    let collection_link = ctx.collection_link();

    let created = ctx
        .elevated
        .create_stored_procedure(&collection_link, &ctx.config.procedure())
        .await;
    let procedure = match check(
        report,
        step,
        "create procedure",
        StepPolicy::ExpectSuccess,
        created,
        |p| format!("id={}", p.id),
    ) {
        Some(procedure) => Some(procedure),
        None => {
            let existing = ctx
                .elevated
                .read_stored_procedure(&collection_link, &ctx.config.test_sproc_id)
                .await;
            check(
                report,
                step,
                "look up existing procedure",
                StepPolicy::BestEffort,
                existing,
                |p| format!("id={}", p.id),
            )
        }
    };
    ctx.procedure = procedure;
}

async fn seed_documents(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let config = ctx.config;
    let collection_link = ctx.collection_link();
    for partition in [&config.partition_a, &config.partition_b] {
        let result = ctx
            .elevated
            .create_document(
                &collection_link,
                test_document(config, partition),
                &PartitionKey::from(partition.as_str()),
            )
            .await;
        check(
            report,
            StepId::SeedDocuments,
            &format!("create in {}", partition),
            StepPolicy::ExpectSuccess,
            result,
            |doc| format!("id={}", doc.id),
        );
    }
}

async fn bulk_create(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let config = ctx.config;
    let collection_link = ctx.collection_link();
    let partition = PartitionKey::from(config.partition_b.as_str());

    let creates = (0..config.bulk_documents).map(|seq| {
        let document = test_document(config, &config.partition_b).with_field("seq", seq);
        ctx.elevated
            .create_document(&collection_link, document, &partition)
    });
    let result = try_join_all(creates).await;

    let label = format!("create {} in {}", config.bulk_documents, config.partition_b);
    if let Some(created) = check(
        report,
        StepId::BulkCreate,
        &label,
        StepPolicy::ExpectSuccess,
        result,
        |docs| format!("created={}", docs.len()),
    ) {
        report.observations.bulk_created = created.len();
    }
}

async fn run_elevated_procedure(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport, step: StepId) {
    let partition_a = &ctx.config.partition_a;
    let result = match ctx
        .elevated
        .execute_stored_procedure(
            &ctx.procedure_link(),
            &[Value::String(partition_a.clone())],
            &PartitionKey::from(partition_a.as_str()),
        )
        .await
    {
        Ok(body) => procedure_document_count(&body).map_err(|e| e.to_string()),
        Err(err) => Err(err.to_string()),
    };

    let label = format!("execute procedure in {}", partition_a);
    if let Some(count) = check(
        report,
        step,
        &label,
        StepPolicy::ExpectSuccess,
        result,
        |count| format!("documents={}", count),
    ) {
        match step {
            StepId::ElevatedProcedure => report.observations.elevated_procedure_documents = Some(count),
            _ => report.observations.elevated_rerun_documents = Some(count),
        }
    }
}

/// Deletes the user's permissions and then the user; absence is not an error.
async fn delete_user_and_permissions(ctx: &ScenarioContext<'_>) -> Result<String, ClientError> {
    let config = ctx.config;
    match ctx
        .elevated
        .read_user(&ctx.database_link(), &config.test_user)
        .await
    {
        Ok(_) => {}
        Err(err) if err.is_not_found() => return Ok("absent".to_string()),
        Err(err) => return Err(err),
    }

    let user_link = config.user_link();
    let permissions = ctx.elevated.list_permissions(&user_link).await?;
    for permission in &permissions {
        let link = config.permission_link(&permission.id);
        debug!(permission = %link, "deleting permission");
        ctx.elevated.delete_permission(&link).await?;
    }
    ctx.elevated.delete_user(&user_link).await?;
    Ok(format!("deleted user and {} permissions", permissions.len()))
}

async fn reset_user(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let result = delete_user_and_permissions(ctx).await;
    check(
        report,
        StepId::ResetUser,
        "delete user",
        StepPolicy::BestEffort,
        result,
        String::clone,
    );
}

async fn create_user(ctx: &mut ScenarioContext<'_>, report: &mut ScenarioReport) {
    let result = ctx
        .elevated
        .create_user(&ctx.database_link(), &ctx.config.test_user)
        .await;
    ctx.user = check(
        report,
        StepId::CreateUser,
        "create user",
        StepPolicy::ExpectSuccess,
        result,
        |user| format!("id={}", user.id),
    );
}

async fn grant_permissions(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let step = StepId::GrantPermissions;
    let config = ctx.config;
    let Some(user_link) = ctx.user_link() else {
        report.skip(step, "grant partition permission", StepPolicy::ExpectSuccess, "no user");
        report.skip(step, "grant procedure permission", StepPolicy::ExpectSuccess, "no user");
        return;
    };
    let partition_b = PartitionKey::from(config.partition_b.as_str());

    let definition = Permission::new(
        config.partition_permission_id(),
        PermissionMode::All,
        ctx.collection_link(),
    )
    .with_partition(&partition_b);
    let result = ctx
        .elevated
        .create_permission(&user_link, &definition, Some(&partition_b))
        .await;
    check(
        report,
        step,
        "grant partition permission",
        StepPolicy::ExpectSuccess,
        result,
        |p| format!("id={} partition={}", p.id, partition_b),
    );

    if ctx.procedure.is_none() {
        report.skip(
            step,
            "grant procedure permission",
            StepPolicy::ExpectSuccess,
            "no procedure",
        );
        return;
    }
    let definition = Permission::new(
        config.sproc_permission_id(),
        PermissionMode::All,
        ctx.procedure_link(),
    );
    let result = ctx
        .elevated
        .create_permission(&user_link, &definition, Some(&partition_b))
        .await;
    check(
        report,
        step,
        "grant procedure permission",
        StepPolicy::ExpectSuccess,
        result,
        |p| format!("id={} partition={}", p.id, partition_b),
    );
}

async fn derive_restricted_client(ctx: &mut ScenarioContext<'_>, report: &mut ScenarioReport) {
    let step = StepId::DeriveRestrictedClient;
    let Some(user_link) = ctx.user_link() else {
        report.skip(step, "derive restricted client", StepPolicy::ExpectSuccess, "no user");
        return;
    };

    let result = match ctx.elevated.list_permissions(&user_link).await {
        Ok(feed) => ctx
            .elevated
            .with_permission_feed(&feed)
            .map(|client| (client, feed.len())),
        Err(err) => Err(err),
    };
    ctx.restricted = check(
        report,
        step,
        "derive restricted client",
        StepPolicy::ExpectSuccess,
        result,
        |(_, tokens)| format!("tokens={}", tokens),
    )
    .map(|(client, _)| client);
}

fn register_resolver(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let step = StepId::RegisterResolver;
    let Some(restricted) = &ctx.restricted else {
        report.skip(
            step,
            "register hash resolver",
            StepPolicy::ExpectSuccess,
            "no restricted client",
        );
        return;
    };

    let database_link = ctx.database_link();
    let result = HashPartitionResolver::new(
        ctx.config.partition_key.clone(),
        vec![ctx.collection_link()],
    )
    .map(|resolver| restricted.register_partition_resolver(&database_link, Arc::new(resolver)));
    check(
        report,
        step,
        "register hash resolver",
        StepPolicy::ExpectSuccess,
        result,
        |_| format!("database={}", database_link),
    );
}

async fn settle(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let delay = ctx.config.settle_delay;
    tokio::time::sleep(delay).await;
    report.record(
        StepId::Settle,
        "wait for permission propagation",
        StepPolicy::ExpectSuccess,
        Ok(format!("waited={}ms", delay.as_millis())),
    );
}

async fn find_permission(
    ctx: &ScenarioContext<'_>,
    user_link: &str,
    id: &str,
) -> Result<Permission, String> {
    let permissions = ctx
        .elevated
        .list_permissions(user_link)
        .await
        .map_err(|e| e.to_string())?;
    permissions
        .into_iter()
        .find(|p| p.id == id)
        .ok_or_else(|| format!("permission '{}' is not listed", id))
}

async fn refresh_permission(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let step = StepId::RefreshPermission;
    let config = ctx.config;
    let labels = [
        "read partition permission",
        "replace partition permission",
        "permission timestamp advanced",
    ];
    let Some(user_link) = ctx.user_link() else {
        for label in labels {
            report.skip(step, label, StepPolicy::ExpectSuccess, "no user");
        }
        return;
    };
    let id = config.partition_permission_id();
    let partition_b = PartitionKey::from(config.partition_b.as_str());

    let before = find_permission(ctx, &user_link, &id).await;
    let Some(before) = check(report, step, labels[0], StepPolicy::ExpectSuccess, before, |p| {
        format!("ts={}", p.system.ts)
    }) else {
        for label in &labels[1..] {
            report.skip(step, label, StepPolicy::ExpectSuccess, "permission not found");
        }
        return;
    };
    report.observations.permission_ts_before = Some(before.system.ts);

    let link = config.permission_link(&id);
    let definition = Permission::new(id.clone(), PermissionMode::All, ctx.collection_link())
        .with_partition(&partition_b);
    let replaced = ctx
        .elevated
        .replace_permission(&link, &definition, Some(&partition_b))
        .await;
    if check(report, step, labels[1], StepPolicy::ExpectSuccess, replaced, |p| {
        format!("ts={}", p.system.ts)
    })
    .is_none()
    {
        report.skip(step, labels[2], StepPolicy::ExpectSuccess, "replace failed");
        return;
    }

    let after = find_permission(ctx, &user_link, &id).await;
    if let Ok(after) = &after {
        report.observations.permission_ts_after = Some(after.system.ts);
    }
    let verdict = after.and_then(|after| {
        if after.system.ts > before.system.ts {
            Ok(format!("before={} after={}", before.system.ts, after.system.ts))
        } else {
            Err(ScenarioError::Verification(format!(
                "timestamp did not advance: before={} after={}",
                before.system.ts, after.system.ts
            ))
            .to_string())
        }
    });
    report.record(step, labels[2], StepPolicy::ExpectSuccess, verdict);
}

async fn restricted_creates(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let step = StepId::RestrictedCreates;
    let config = ctx.config;
    let attempts = [
        (&config.partition_b, StepPolicy::ExpectSuccess),
        (
            &config.partition_a,
            StepPolicy::ExpectFailure(FailureReason::SecurityBoundary),
        ),
    ];

    let Some(restricted) = &ctx.restricted else {
        for (partition, policy) in attempts {
            report.skip(
                step,
                &format!("create in {}", partition),
                policy,
                "no restricted client",
            );
        }
        return;
    };

    let collection_link = ctx.collection_link();
    for (partition, policy) in attempts {
        let result = restricted
            .create_document(
                &collection_link,
                test_document(config, partition),
                &PartitionKey::from(partition.as_str()),
            )
            .await;
        check(
            report,
            step,
            &format!("create in {}", partition),
            policy,
            result,
            |doc| format!("id={}", doc.id),
        );
    }
}

async fn elevated_queries(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let step = StepId::ElevatedQueries;
    let collection_link = ctx.collection_link();
    let query = QuerySpec::new(SELECT_ALL);

    let all = ctx
        .elevated
        .query_documents(&collection_link, &query, &FeedOptions::cross_partition())
        .await;
    if let Some(docs) = check(
        report,
        step,
        "cross-partition query",
        StepPolicy::ExpectSuccess,
        all,
        |docs| format!("documents={}", docs.len()),
    ) {
        report.observations.cross_partition_documents = Some(docs.len());
    }

    let partition_b = &ctx.config.partition_b;
    let scoped = ctx
        .elevated
        .query_documents(
            &collection_link,
            &query,
            &FeedOptions::partition(partition_b.as_str()),
        )
        .await;
    if let Some(docs) = check(
        report,
        step,
        &format!("query {}", partition_b),
        StepPolicy::ExpectSuccess,
        scoped,
        |docs| format!("documents={}", docs.len()),
    ) {
        report.observations.partition_b_documents = Some(docs.len());
    }
}

async fn restricted_checks(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let step = StepId::RestrictedChecks;
    let config = ctx.config;
    let partition_b = PartitionKey::from(config.partition_b.as_str());
    let query_label = format!("query {}", config.partition_b);
    let execute_label = format!("execute procedure in {}", config.partition_b);
    let quirk = StepPolicy::ExpectFailure(FailureReason::KnownQuirk);
    let boundary = StepPolicy::ExpectFailure(FailureReason::SecurityBoundary);

    let Some(restricted) = &ctx.restricted else {
        let reason = "no restricted client";
        report.skip(step, &query_label, StepPolicy::ExpectSuccess, reason);
        report.skip(step, &execute_label, quirk, reason);
        report.skip(step, "cross-partition query", boundary, reason);
        return;
    };

    let collection_link = ctx.collection_link();
    let query = QuerySpec::new(SELECT_ALL);

    let scoped = restricted
        .query_documents(
            &collection_link,
            &query,
            &FeedOptions::partition(partition_b.clone()),
        )
        .await;
    if let Some(docs) = check(
        report,
        step,
        &query_label,
        StepPolicy::ExpectSuccess,
        scoped,
        |docs| format!("documents={}", docs.len()),
    ) {
        report.observations.restricted_partition_documents = Some(docs.len());
    }

    // Observed service behaviour: refused even with a permission on the procedure
    let executed = restricted
        .execute_stored_procedure(
            &ctx.procedure_link(),
            &[Value::String(config.partition_b.clone())],
            &partition_b,
        )
        .await;
    check(report, step, &execute_label, quirk, executed, |body| {
        format!("body={}", body)
    });

    let cross = restricted
        .query_documents(&collection_link, &query, &FeedOptions::cross_partition())
        .await;
    check(report, step, "cross-partition query", boundary, cross, |docs| {
        format!("documents={}", docs.len())
    });
}

async fn cleanup(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport) {
    let step = StepId::Cleanup;
    let config = ctx.config;
    if !config.cleanup_documents {
        report.skip(step, "delete documents", StepPolicy::ExpectSuccess, "cleanup disabled");
        return;
    }

    let collection_link = ctx.collection_link();
    let listed = ctx
        .elevated
        .query_documents(
            &collection_link,
            &QuerySpec::new(SELECT_ALL),
            &FeedOptions::cross_partition(),
        )
        .await;
    let Some(documents) = check(
        report,
        step,
        "list documents",
        StepPolicy::ExpectSuccess,
        listed,
        |docs| format!("documents={}", docs.len()),
    ) else {
        report.skip(step, "delete documents", StepPolicy::ExpectSuccess, "listing failed");
        return;
    };

    let deletes = documents.iter().map(|doc| {
        let partition = PartitionKey::from(
            doc.get(&config.partition_key)
                .cloned()
                .unwrap_or(Value::Null),
        );
        let link = config.document_link(&doc.id);
        async move { ctx.elevated.delete_document(&link, &partition).await }
    });
    let result = try_join_all(deletes).await;
    if let Some(deleted) = check(
        report,
        step,
        "delete documents",
        StepPolicy::ExpectSuccess,
        result,
        |deleted| format!("deleted={}", deleted.len()),
    ) {
        report.observations.cleaned_up = Some(deleted.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_documents_in_string_bodies() {
        let body = json!({"partitionKey": "partA", "docs": [{"id": "a"}]}).to_string();
        assert_eq!(procedure_document_count(&Value::String(body)).unwrap(), 1);
    }

    #[test]
    fn empty_marker_counts_as_zero() {
        assert_eq!(
            procedure_document_count(&Value::String(NO_DOCS.to_string())).unwrap(),
            0
        );
    }

    #[test]
    fn accepts_object_bodies_and_rejects_others() {
        assert_eq!(
            procedure_document_count(&json!({"docs": [1, 2, 3]})).unwrap(),
            3
        );
        assert!(procedure_document_count(&json!("not json")).is_err());
        assert!(procedure_document_count(&json!({"items": []})).is_err());
    }
}
