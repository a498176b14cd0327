use std::{future::Future, sync::Arc};

use anyhow::{Context, Result, anyhow};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{
        actions::{ActionTracker, BrokerPublisher, TracingActionObserver},
        adapters::RumqttTransport,
        error::SessionError,
        ports::{BrokerTransport, TransportChannels},
        session::BrokerSession,
    },
    config::Config,
    dispatch::{dispatcher::TopicDispatcher, error::HandlerError, table::SubscriptionTable},
    pipeline::{analyzer::CommandAnalyzer, recognition::RecognitionPipeline},
    record::open_record_sink,
    shutdown::{ShutdownTrigger, wait_for_shutdown},
    types::InboundMessage,
};

type SessionTask = JoinHandle<Result<(), SessionError>>;
type DispatcherTask = JoinHandle<Result<(), HandlerError>>;

/// Builds the agent from configuration and runs it until shutdown or a fatal error.
pub async fn run(config: Config) -> Result<()> {
    let (session_tx, session_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(config.broker.inbound_queue_capacity.max(1));
    let transport: Arc<dyn BrokerTransport> = Arc::new(RumqttTransport::new(
        TransportChannels {
            session: session_tx,
            inbound: inbound_tx,
        },
        config.broker.request_capacity,
    ));
    let tracker = Arc::new(ActionTracker::new(Arc::new(TracingActionObserver)));

    let sink = open_record_sink(
        &config.record_store.uri,
        &config.record_store.collection,
        &config.base_dir,
    )
    .context("failed to open record store")?;
    let analyzer = Arc::new(CommandAnalyzer::new(
        config.pipeline.analyzer.program.clone(),
        config.pipeline.analyzer.args.clone(),
        config.pipeline.analyzer.corpus_dir.clone(),
    ));
    let pipeline = RecognitionPipeline::new(
        config.pipeline_settings(),
        analyzer,
        BrokerPublisher::new(Arc::clone(&transport), Arc::clone(&tracker)),
        sink,
    );

    let mut table = SubscriptionTable::new();
    table
        .register(
            config.topics.image.name.clone(),
            config.topics.image.qos,
            Arc::new(pipeline),
        )
        .context("failed to register image topic handler")?;
    let table = Arc::new(table);

    let session = BrokerSession::new(
        config.broker.session_config(),
        Arc::clone(&transport),
        tracker,
        Arc::clone(&table),
        session_rx,
    )
    .context("invalid broker session configuration")?;
    let dispatcher = TopicDispatcher::new(table, transport);

    tracing::info!(
        target: "agent",
        address = %config.broker.address,
        image_topic = %config.topics.image.name,
        result_topic = %config.topics.result.name,
        "agent_started"
    );
    supervise(session, dispatcher, inbound_rx, wait_for_shutdown()).await
}

/// Runs the session and dispatcher tasks until `shutdown_signal` resolves or
/// either task ends.
///
/// Shutdown stops the dispatcher first and waits for the handler run in
/// progress, then terminates the session. A fatal error from either task
/// still tears the other one down before it is returned.
pub async fn supervise<F>(
    session: BrokerSession,
    dispatcher: TopicDispatcher,
    inbound: mpsc::Receiver<InboundMessage>,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = Result<ShutdownTrigger>>,
{
    let session_token = CancellationToken::new();
    let dispatch_token = CancellationToken::new();
    let mut session_task: SessionTask = tokio::spawn(session.run(session_token.clone()));
    let mut dispatch_task: DispatcherTask =
        tokio::spawn(dispatcher.run(inbound, dispatch_token.clone()));

    tokio::pin!(shutdown_signal);
    tokio::select! {
        trigger = &mut shutdown_signal => {
            match &trigger {
                Ok(trigger) => tracing::info!(
                    target: "agent",
                    trigger = %trigger,
                    "shutdown_requested"
                ),
                Err(err) => tracing::error!(
                    target: "agent",
                    error = %err,
                    "shutdown_watch_failed"
                ),
            }
            dispatch_token.cancel();
            let dispatched = join_dispatcher(dispatch_task).await;
            session_token.cancel();
            let session = join_session(session_task).await;
            trigger?;
            dispatched?;
            session?;
        }
        joined = &mut session_task => {
            let err = match flatten_session(joined) {
                Ok(()) => anyhow!("broker session ended unexpectedly"),
                Err(err) => err,
            };
            tracing::error!(target: "agent", error = %format!("{err:#}"), "session_failed");
            dispatch_token.cancel();
            if let Err(dispatch_err) = join_dispatcher(dispatch_task).await {
                tracing::error!(
                    target: "agent",
                    error = %format!("{dispatch_err:#}"),
                    "dispatcher_failed"
                );
            }
            return Err(err);
        }
        joined = &mut dispatch_task => {
            let err = match flatten_dispatcher(joined) {
                Ok(()) => anyhow!("inbound message queue closed"),
                Err(err) => err,
            };
            tracing::error!(target: "agent", error = %format!("{err:#}"), "dispatcher_failed");
            session_token.cancel();
            if let Err(session_err) = join_session(session_task).await {
                tracing::error!(
                    target: "agent",
                    error = %format!("{session_err:#}"),
                    "session_failed"
                );
            }
            return Err(err);
        }
    }

    tracing::info!(target: "agent", "agent_stopped");
    Ok(())
}

async fn join_session(task: SessionTask) -> Result<()> {
    flatten_session(task.await)
}

async fn join_dispatcher(task: DispatcherTask) -> Result<()> {
    flatten_dispatcher(task.await)
}

fn flatten_session(
    joined: Result<Result<(), SessionError>, tokio::task::JoinError>,
) -> Result<()> {
    joined
        .context("broker session task join failed")?
        .context("broker session failed")
}

fn flatten_dispatcher(
    joined: Result<Result<(), HandlerError>, tokio::task::JoinError>,
) -> Result<()> {
    joined
        .context("dispatcher task join failed")?
        .context("message handling failed")
}
