use std::{path::PathBuf, process, sync::Arc, time::Instant};

use docprint::{
    application::{
        error::AppError,
        print::{PrintPipeline, RenderEngine},
    },
    cache::{DiskCacheStore, SystemClock},
    config,
    domain::document::{RenderRequest, Variant, safe_file_stem},
    infra::{
        error::InfraError,
        http::{self, PrintState},
        renderer::CliDocumentRenderer,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

fn build_pipeline(settings: &config::Settings) -> PrintPipeline {
    let store = DiskCacheStore::new(
        settings.cache.directory.clone(),
        settings.cache.ttl,
        Arc::new(SystemClock),
    );
    let renderer = CliDocumentRenderer::new(settings.render.cli_path.clone(), settings.render.timeout);
    let engine = RenderEngine::new(Arc::new(renderer), settings.render.base_url.clone());
    PrintPipeline::new(
        Arc::new(store),
        engine,
        settings.render.fallback_document_id.clone(),
    )
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    tokio::fs::create_dir_all(&settings.cache.directory)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let pipeline = Arc::new(build_pipeline(&settings));
    let router = http::build_router(PrintState::new(pipeline.clone()));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "docprint::serve",
        addr = %settings.server.addr,
        cache_dir = %settings.cache.directory.display(),
        ttl_secs = settings.cache.ttl.as_secs(),
        base_url = %settings.render.base_url,
        "Print service listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = shutdown_rx.await;
        },
    );
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        _ = shutdown_signal() => {}
    }

    info!(
        target = "docprint::serve",
        renders_in_flight = pipeline.renders_in_flight(),
        grace_secs = settings.server.graceful_shutdown.as_secs(),
        "Shutting down"
    );
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(_) => {
            warn!(
                target = "docprint::serve",
                renders_in_flight = pipeline.renders_in_flight(),
                "Graceful shutdown window elapsed; dropping open connections"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let started_at = Instant::now();
    let pipeline = build_pipeline(&settings);
    let request = RenderRequest::new(
        args.document_id,
        Variant::new(args.dark, args.omit_final_page),
    );

    let artifact = pipeline.serve(&request).await?;

    let output = args.output.unwrap_or_else(|| {
        PathBuf::from(format!("{}.pdf", safe_file_stem(&artifact.display_name)))
    });
    tokio::fs::write(&output, &artifact.bytes)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "docprint::render",
        path = %output.display(),
        display_name = %artifact.display_name,
        pdf_bytes = artifact.bytes.len(),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Document printed"
    );
    Ok(())
}
