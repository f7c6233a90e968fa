use std::sync::Arc;

use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use replication_lambda::adapters::aws::{
    LeasedClients, S3CheckpointStore, S3Destination, S3Source, StsLeaseProvider,
};
use replication_lambda::config::{InvocationOverrides, ReplicatorConfig};
use replication_lambda::handlers::replicate::{run_replication, ReplicationDeps};
use replication_lambda::logging;
use replication_lambda::runtime::budget::DeadlineBudget;
use replication_lambda::runtime::contract::RunSummary;
use replication_lambda::runtime::error::ReplicationError;
use serde_json::Value;

fn rejected(error: ReplicationError) -> Error {
    tracing::error!(
        component = "replicator",
        event = "invocation_rejected",
        error_code = error.kind(),
        error = %error,
    );
    Error::from(error.to_string())
}

async fn handle_request(event: LambdaEvent<Value>) -> Result<RunSummary, Error> {
    let budget = DeadlineBudget::from_epoch_millis(event.context.deadline, Utc::now());
    let overrides = InvocationOverrides::from_payload(&event.payload).map_err(rejected)?;
    let config = ReplicatorConfig::from_env(&overrides).map_err(rejected)?;

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let s3_client = aws_sdk_s3::Client::new(&sdk_config);
    let leases = StsLeaseProvider::new(
        &sdk_config,
        config.source_role_arn(),
        config.session_duration_secs,
    );
    let source_clients = Arc::new(LeasedClients::new(sdk_config));

    let source = S3Source::new(
        config.target.source.bucket.clone(),
        config.target.source.list_prefix(),
        Arc::clone(&source_clients),
    );
    let destination = S3Destination::new(
        s3_client.clone(),
        config.target.destination_bucket.clone(),
        config.transfer_mode,
        source_clients,
    );
    let checkpoints = S3CheckpointStore::new(
        s3_client,
        config.checkpoint_bucket.clone(),
        config.checkpoint_prefix.clone(),
    );

    let deps = ReplicationDeps {
        source: &source,
        destination: &destination,
        checkpoints: &checkpoints,
        leases: &leases,
        budget: &budget,
    };
    run_replication(&config.target, &config.settings, deps)
        .await
        .map_err(|aborted| Error::from(aborted.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logging::init();
    lambda_runtime::run(service_fn(handle_request)).await
}
