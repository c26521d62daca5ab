use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the docprint binary.
#[derive(Debug, Parser)]
#[command(
    name = "docprint",
    version,
    about = "Render hosted documents to PDF behind a disk cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DOCPRINT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the print HTTP service.
    Serve(Box<ServeArgs>),
    /// Print a single document to a file through the cache.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Document to print; `help`, `h` or an empty value select the fallback document.
    #[arg(value_name = "DOCUMENT_ID", default_value = "")]
    pub document_id: String,

    /// Produce the dark variant.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub dark: bool,

    /// Drop the document's final page.
    #[arg(long = "omit-final-page", action = clap::ArgAction::SetTrue)]
    pub omit_final_page: bool,

    /// Where to write the PDF; defaults to `<display name>.pdf` in the working directory.
    #[arg(long, short = 'o', value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: SharedOverrides,
}

/// Overrides accepted by every command.
#[derive(Debug, Args, Default, Clone)]
pub struct SharedOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the directory holding cached PDFs.
    #[arg(long = "cache-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_directory: Option<PathBuf>,

    /// Override how long cached PDFs stay fresh.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    #[command(flatten)]
    pub render: RenderOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the headless renderer executable.
    #[arg(long = "render-cli-path", value_name = "PATH", value_hint = ValueHint::CommandName)]
    pub cli_path: Option<PathBuf>,

    /// Override the URL document ids are resolved against.
    #[arg(long = "render-base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// Override the upper bound on a single render.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Override the document printed when a request names none.
    #[arg(long = "render-fallback-document-id", value_name = "ID")]
    pub fallback_document_id: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub shared: SharedOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,
}
