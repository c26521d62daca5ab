//! Headless-browser renderer driven through an external CLI.
//!
//! The CLI is invoked once per render:
//!
//! ```text
//! <cli> --url <locator> --output <pdf> --title-output <txt>
//!       --format Letter --scale 0.85 --margin 0 --settle-ms 750
//!       --inject-css <css> --stylesheet <url> [--dark-mode]
//! ```
//!
//! Exit status zero with a PDF at `--output` is success; the title file is
//! optional.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
};
use tracing::{info, warn};

use crate::application::print::{DocumentRenderer, RenderTarget, RenderedDocument, RendererError};

const FONT_STYLESHEET_URL: &str =
    "https://fonts.googleapis.com/css2?family=Inter:wght@400;500;600;700&display=swap";
const FONT_OVERRIDE_CSS: &str = r#"body, div, article, header, p, h1, h2, h3, h4, h5, h6, a { font-family: "Inter", sans-serif !important; }"#;
const PDF_MAGIC: &[u8] = b"%PDF-";
const MAX_STDERR_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct CliDocumentRenderer {
    cli_path: PathBuf,
    timeout: Duration,
}

impl CliDocumentRenderer {
    pub fn new(cli_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            cli_path: cli_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DocumentRenderer for CliDocumentRenderer {
    async fn render(&self, target: &RenderTarget) -> Result<RenderedDocument, RendererError> {
        let started_at = Instant::now();
        let mut session = RendererSession::spawn(&self.cli_path, target)?;

        let outcome = match tokio::time::timeout(self.timeout, session.finish()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RendererError::Timeout(self.timeout)),
        };
        session.close().await;

        match &outcome {
            Ok(rendered) => info!(
                target = "infra::renderer",
                op = "renderer::render",
                result = "ok",
                locator = %target.locator,
                dark_mode = target.dark_mode,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                pdf_bytes = rendered.pdf.len(),
                has_title = rendered.title.is_some(),
                "Renderer CLI produced PDF"
            ),
            Err(err) => warn!(
                target = "infra::renderer",
                op = "renderer::render",
                result = "error",
                locator = %target.locator,
                dark_mode = target.dark_mode,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "Renderer CLI invocation failed"
            ),
        }
        outcome
    }
}

/// A running renderer process and its scratch directory.
///
/// The CLI leads its own process group so anything it starts (a headless
/// browser, typically) is killed with it. Dropping the session kills the
/// group and removes the scratch directory.
struct RendererSession {
    child: Child,
    scratch: TempDir,
    exited: bool,
    process_group: Option<u32>,
}

impl RendererSession {
    fn spawn(cli_path: &Path, target: &RenderTarget) -> Result<Self, RendererError> {
        let scratch = tempfile::Builder::new()
            .prefix("docprint-render-")
            .tempdir()
            .map_err(RendererError::io)?;
        let output_path = scratch.path().join("document.pdf");
        let title_path = scratch.path().join("title.txt");
        let layout = target.layout;

        let mut command = Command::new(cli_path);
        command
            .arg("--url")
            .arg(target.locator.as_str())
            .arg("--output")
            .arg(&output_path)
            .arg("--title-output")
            .arg(&title_path)
            .arg("--format")
            .arg(layout.paper_format)
            .arg("--scale")
            .arg(layout.scale.to_string())
            .arg("--margin")
            .arg(layout.margin_in.to_string())
            .arg("--settle-ms")
            .arg(layout.settle.as_millis().to_string())
            .arg("--inject-css")
            .arg(FONT_OVERRIDE_CSS)
            .arg("--stylesheet")
            .arg(FONT_STYLESHEET_URL);
        if target.dark_mode {
            command.arg("--dark-mode");
        }
        command
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                RendererError::Unavailable(format!("{}: {err}", cli_path.display()))
            } else {
                RendererError::io(err)
            }
        })?;
        let process_group = child.id();

        Ok(Self {
            child,
            scratch,
            exited: false,
            process_group,
        })
    }

    fn output_path(&self) -> PathBuf {
        self.scratch.path().join("document.pdf")
    }

    fn title_path(&self) -> PathBuf {
        self.scratch.path().join("title.txt")
    }

    /// Wait for the process and collect its output files.
    async fn finish(&mut self) -> Result<RenderedDocument, RendererError> {
        let mut stderr_pipe = self.child.stderr.take();
        let read_stderr = async {
            let mut buffer = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buffer).await;
            }
            buffer
        };
        let (status, stderr) = tokio::join!(self.child.wait(), read_stderr);
        let status: ExitStatus = status.map_err(RendererError::io)?;
        self.exited = true;

        if !status.success() {
            return Err(RendererError::Failed {
                exit_code: status.code(),
                stderr: truncate_stderr(&stderr),
            });
        }

        let pdf = match tokio::fs::read(self.output_path()).await {
            Ok(pdf) => pdf,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RendererError::EmptyOutput);
            }
            Err(err) => return Err(RendererError::io(err)),
        };
        if pdf.is_empty() {
            return Err(RendererError::EmptyOutput);
        }
        if !pdf.starts_with(PDF_MAGIC) {
            return Err(RendererError::InvalidOutput);
        }

        let title = tokio::fs::read_to_string(self.title_path())
            .await
            .ok()
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());

        Ok(RenderedDocument {
            pdf: Bytes::from(pdf),
            title,
        })
    }

    /// Kill the process group, then reap the CLI if it is still running.
    async fn close(mut self) {
        self.kill_group();
        if !self.exited {
            if let Err(err) = self.child.kill().await {
                warn!(
                    target = "infra::renderer",
                    op = "renderer::close",
                    result = "kill_failed",
                    error = %err,
                    "Failed to stop renderer process"
                );
            }
            self.exited = true;
        }
    }

    /// Signal every process left in the CLI's group. Runs at most once.
    fn kill_group(&mut self) {
        let Some(group) = self.process_group.take() else {
            return;
        };
        if let Err(err) = kill_process_group(group) {
            warn!(
                target = "infra::renderer",
                op = "renderer::kill_group",
                result = "kill_failed",
                process_group = group,
                error = %err,
                "Failed to stop renderer process group"
            );
        }
    }
}

impl Drop for RendererSession {
    fn drop(&mut self) {
        self.kill_group();
        if !self.exited {
            let _ = self.child.start_kill();
        }
    }
}

#[cfg(unix)]
fn kill_process_group(group: u32) -> std::io::Result<()> {
    let Ok(group) = i32::try_from(group) else {
        return Ok(());
    };
    if group <= 0 {
        return Ok(());
    }
    // SAFETY: killpg only sends a signal; `group` was created for this session.
    if unsafe { libc::killpg(group, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::ESRCH => Ok(()),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: u32) -> std::io::Result<()> {
    Ok(())
}

fn truncate_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= MAX_STDERR_BYTES {
        return trimmed.to_string();
    }
    let mut end = MAX_STDERR_BYTES;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::application::print::CAPTURE_LAYOUT;
    use std::{fs, os::unix::fs::PermissionsExt};
    use url::Url;

    fn make_executable(path: &Path) {
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let script_path = dir.join("fake-renderer");
        fs::write(&script_path, format!("#!/bin/sh\n{body}")).expect("write script");
        make_executable(&script_path);
        script_path
    }

    fn target(dark_mode: bool) -> RenderTarget {
        RenderTarget {
            locator: Url::parse("https://notion.so/abc123").expect("url"),
            dark_mode,
            layout: CAPTURE_LAYOUT,
        }
    }

    #[tokio::test]
    async fn renders_pdf_and_title_with_valid_cli() {
        let dir = TempDir::new().expect("temp dir");
        let args_path = dir.path().join("args.log");
        let script = format!(
            r#"set -eu
echo "$@" > "{args_file}"
out=""
title=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output)
      shift
      out="$1"
      ;;
    --title-output)
      shift
      title="$1"
      ;;
  esac
  shift
done
if [ -z "$out" ]; then
  echo "missing --output" >&2
  exit 2
fi
printf '%%PDF-1.5\n%%fake\n' > "$out"
printf '  Quarterly Plan \n' > "$title"
"#,
            args_file = args_path.display()
        );
        let script_path = write_script(dir.path(), &script);

        let renderer = CliDocumentRenderer::new(script_path, Duration::from_secs(10));
        let rendered = renderer.render(&target(true)).await.expect("rendered");

        assert!(rendered.pdf.starts_with(b"%PDF-1.5"));
        assert_eq!(rendered.title.as_deref(), Some("Quarterly Plan"));

        let args = fs::read_to_string(&args_path).expect("read args");
        for expected in [
            "--url https://notion.so/abc123",
            "--format Letter",
            "--scale 0.85",
            "--margin 0",
            "--settle-ms 750",
            "--inject-css",
            "--dark-mode",
        ] {
            assert!(args.contains(expected), "CLI args missing {expected}: {args}");
        }
    }

    #[tokio::test]
    async fn light_mode_omits_dark_flag_and_title_is_optional() {
        let dir = TempDir::new().expect("temp dir");
        let args_path = dir.path().join("args.log");
        let script = format!(
            r#"echo "$@" > "{args_file}"
while [ "$#" -gt 0 ]; do
  if [ "$1" = "--output" ]; then shift; printf '%%PDF-1.4\n' > "$1"; fi
  shift
done
"#,
            args_file = args_path.display()
        );
        let script_path = write_script(dir.path(), &script);

        let renderer = CliDocumentRenderer::new(script_path, Duration::from_secs(10));
        let rendered = renderer.render(&target(false)).await.expect("rendered");

        assert_eq!(rendered.title, None);
        let args = fs::read_to_string(&args_path).expect("read args");
        assert!(!args.contains("--dark-mode"), "unexpected dark flag: {args}");
    }

    #[tokio::test]
    async fn surfaces_cli_errors() {
        let dir = TempDir::new().expect("temp dir");
        let script_path = write_script(dir.path(), "echo \"boom\" >&2\nexit 42\n");

        let renderer = CliDocumentRenderer::new(script_path, Duration::from_secs(10));
        let err = renderer
            .render(&target(false))
            .await
            .expect_err("expected cli failure");
        match err {
            RendererError::Failed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(42));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_output_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let script_path = write_script(dir.path(), "exit 0\n");

        let renderer = CliDocumentRenderer::new(script_path, Duration::from_secs(10));
        let err = renderer
            .render(&target(false))
            .await
            .expect_err("expected missing output");
        assert!(matches!(err, RendererError::EmptyOutput), "unexpected: {err:?}");
    }

    #[tokio::test]
    async fn non_pdf_output_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let script = r#"while [ "$#" -gt 0 ]; do
  if [ "$1" = "--output" ]; then shift; echo "<html></html>" > "$1"; fi
  shift
done
"#;
        let script_path = write_script(dir.path(), script);

        let renderer = CliDocumentRenderer::new(script_path, Duration::from_secs(10));
        let err = renderer
            .render(&target(false))
            .await
            .expect_err("expected invalid output");
        assert!(matches!(err, RendererError::InvalidOutput), "unexpected: {err:?}");
    }

    #[tokio::test]
    async fn slow_cli_times_out() {
        let dir = TempDir::new().expect("temp dir");
        let script_path = write_script(dir.path(), "exec sleep 30\n");

        let renderer = CliDocumentRenderer::new(script_path, Duration::from_millis(200));
        let started = Instant::now();
        let err = renderer
            .render(&target(false))
            .await
            .expect_err("expected timeout");

        assert!(matches!(err, RendererError::Timeout(_)), "unexpected: {err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    fn process_alive(pid: i32) -> bool {
        // Zombies waiting on a non-reaping init count as gone.
        if let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) {
            let state = stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next());
            if let Some(state) = state {
                return state != 'Z';
            }
        }
        // SAFETY: signal 0 only checks that the process exists.
        unsafe { libc::kill(pid, 0) == 0 }
    }

    #[tokio::test]
    async fn timeout_kills_processes_started_by_the_cli() {
        let dir = TempDir::new().expect("temp dir");
        let pid_path = dir.path().join("browser.pid");
        let script = format!(
            "sleep 30 &\necho $! > \"{pid_file}\"\nwait\n",
            pid_file = pid_path.display()
        );
        let script_path = write_script(dir.path(), &script);

        let renderer = CliDocumentRenderer::new(script_path, Duration::from_millis(300));
        let err = renderer
            .render(&target(false))
            .await
            .expect_err("expected timeout");
        assert!(matches!(err, RendererError::Timeout(_)), "unexpected: {err:?}");

        let pid: i32 = fs::read_to_string(&pid_path)
            .expect("browser pid recorded")
            .trim()
            .parse()
            .expect("numeric pid");
        let deadline = Instant::now() + Duration::from_secs(5);
        while process_alive(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!process_alive(pid), "process {pid} outlived the render");
    }

    #[tokio::test]
    async fn missing_cli_is_unavailable() {
        let dir = TempDir::new().expect("temp dir");
        let renderer =
            CliDocumentRenderer::new(dir.path().join("does-not-exist"), Duration::from_secs(1));
        let err = renderer
            .render(&target(false))
            .await
            .expect_err("expected spawn failure");
        assert!(matches!(err, RendererError::Unavailable(_)), "unexpected: {err:?}");
    }

    #[test]
    fn long_stderr_is_truncated_on_char_boundary() {
        let noisy = "é".repeat(MAX_STDERR_BYTES);
        let truncated = truncate_stderr(noisy.as_bytes());
        assert!(truncated.ends_with('…'));
        assert!(truncated.len() <= MAX_STDERR_BYTES + '…'.len_utf8());
    }
}
