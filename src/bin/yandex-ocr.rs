//! CLI binary for yandex-ocr.
//!
//! A thin shim over the library crate: resolves credentials, maps flags to
//! `OcrConfig`, wires Ctrl-C to cancellation and turns the run summary into
//! terminal output and an exit code.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use yandex_ocr::auth::{mask_secret, ENV_API_KEY, ENV_FOLDER_ID, ENV_IAM_TOKEN, ENV_OAUTH_TOKEN};
use yandex_ocr::{
    resolve_credentials, CredentialSources, EnhanceSettings, IamTokenExchange, OcrConfig,
    OcrError, OcrProgressCallback, PageOutcome, ProgressCallback, RetryPolicy, RunSummary,
    TextFeature, TokenExchange,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over the files of the run, with a log line per page above it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Looking for input files…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl OcrProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_files: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} files  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_files as u64);
        self.bar.set_prefix("Recognising");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_files} file(s)"))
        ));
    }

    fn on_file_start(&self, file: &str, file_index: usize, total_pages: usize) {
        self.bar.set_message(format!("{file} ({total_pages} pages)"));
        self.bar.println(format!(
            "{} {} {}",
            cyan("▸"),
            bold(file),
            dim(&format!("#{file_index}, {total_pages} page(s)"))
        ));
    }

    fn on_page_complete(&self, _file: &str, page_num: usize, total_pages: usize, outcome: &PageOutcome) {
        let line = match outcome {
            PageOutcome::Text(t) => format!(
                "  {} Page {:>3}/{:<3}  {}",
                green("✓"),
                page_num,
                total_pages,
                dim(&format!("{:>5} chars", t.chars().count()))
            ),
            PageOutcome::NoText => format!(
                "  {} Page {:>3}/{:<3}  {}",
                cyan("○"),
                page_num,
                total_pages,
                dim("no text")
            ),
            PageOutcome::Failed(e) => format!(
                "  {} Page {:>3}/{:<3}  {}",
                red("✗"),
                page_num,
                total_pages,
                red(&e.marker())
            ),
        };
        self.bar.println(line);
    }

    fn on_file_complete(&self, _file: &str, _pages: usize, _failed_pages: usize) {
        self.bar.inc(1);
    }

    fn on_file_error(&self, file: &str, error: &str) {
        let first_line = error.lines().next().unwrap_or(error);
        self.bar
            .println(format!("{} {}  {}", red("✘"), bold(file), red(first_line)));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _total_files: usize, _failed_files: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Single scan, IAM token from the environment
  yandex-ocr invoice.jpg

  # A directory of PDFs and images, plus merged all_text.{docx,txt,csv}
  yandex-ocr scans/ --merge-output

  # Restrict recognition to Russian and English, plain text detection
  yandex-ocr scans/ --languages ru,en --feature text

  # Mint an IAM token from an OAuth token and print it
  yandex-ocr --fetch-token --oauth-token y0_AgAAAA...

OUTPUT:
  <output-dir>/<stem>/<stem>.docx        one per input file
  <output-dir>/all_text.docx|txt|csv     with --merge-output

EXIT CODES:
  0    run completed (individual pages or files may still have failed)
  1    input path not found / no supported files
  2    no credentials
  3    no folder id
  4    invalid configuration
  5    an output file could not be written
  6    internal error
  130  cancelled (Ctrl-C); partial results were written

ENVIRONMENT VARIABLES:
  YANDEX_IAM_TOKEN      IAM token (Authorization: Bearer)
  YANDEX_API_KEY        Service-account API key (Authorization: Api-Key)
  YANDEX_OAUTH_TOKEN    OAuth token, exchanged for an IAM token
  YANDEX_FOLDER_ID      Cloud folder id
  PDFIUM_LIB_PATH       Path to libpdfium
  RUST_LOG              Log filter, e.g. yandex_ocr=debug
"#;

/// Recognise text in scanned images and PDFs with Yandex Cloud Vision.
#[derive(Parser, Debug)]
#[command(
    name = "yandex-ocr",
    version,
    about = "Recognise text in scanned images and PDFs with Yandex Cloud Vision",
    long_about = "Rasterise PDFs, clean up every page image and send it to the Yandex Cloud \
Vision OCR service. The recognised text of each input file is written to a Word document; \
optionally all files are merged into one .docx, .txt and .csv.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image, PDF, directory, or a bare file name to search for.
    ///
    /// Prompted for when omitted and stdin is a terminal.
    input: Option<PathBuf>,

    /// Directory for result documents.
    #[arg(long, env = "YANDEX_OCR_OUTPUT_DIR", default_value = "result")]
    output_dir: PathBuf,

    /// Parent of per-file scratch directories. Default: <output-dir>/tmp.
    #[arg(long, env = "YANDEX_OCR_TMP_DIR")]
    tmp_dir: Option<PathBuf>,

    /// IAM token.
    #[arg(long, env = ENV_IAM_TOKEN, hide_env_values = true)]
    iam_token: Option<String>,

    /// Service-account API key.
    #[arg(long, env = ENV_API_KEY, hide_env_values = true)]
    api_key: Option<String>,

    /// OAuth token to exchange for an IAM token.
    ///
    /// With no credential at all and stdin a terminal, an IAM token and then
    /// an OAuth token are asked for without echo.
    #[arg(long, env = ENV_OAUTH_TOKEN, hide_env_values = true)]
    oauth_token: Option<String>,

    /// Cloud folder id. Prompted for when omitted and stdin is a terminal.
    #[arg(long, env = ENV_FOLDER_ID)]
    folder_id: Option<String>,

    /// Also write all_text.docx, all_text.txt and all_text.csv.
    #[arg(long, env = "YANDEX_OCR_MERGE_OUTPUT")]
    merge_output: bool,

    /// Keep enhanced page images in the scratch directory.
    #[arg(long, env = "YANDEX_OCR_KEEP_TMP")]
    keep_tmp: bool,

    /// PDF rasterisation resolution (72–600).
    #[arg(long, env = "YANDEX_OCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Language hints, comma separated; `*` detects all.
    #[arg(long, env = "YANDEX_OCR_LANGUAGES", value_delimiter = ',', default_value = "*")]
    languages: Vec<String>,

    /// Recognition feature.
    #[arg(long, env = "YANDEX_OCR_FEATURE", value_enum, default_value = "document")]
    feature: FeatureArg,

    /// Attempts per page when rate limited (HTTP 429).
    #[arg(long, env = "YANDEX_OCR_MAX_ATTEMPTS", default_value_t = 5,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Seconds to wait after the first 429.
    #[arg(long, env = "YANDEX_OCR_RETRY_DELAY", default_value_t = 5.0)]
    retry_delay: f64,

    /// Growth factor between waits.
    #[arg(long, env = "YANDEX_OCR_RETRY_FACTOR", default_value_t = 2.0)]
    retry_factor: f64,

    /// Per-request timeout in seconds.
    #[arg(long, env = "YANDEX_OCR_REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,

    /// Pages of one file in flight at once (results stay in page order).
    #[arg(short, long, env = "YANDEX_OCR_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Exchange the OAuth token for an IAM token, print it and exit.
    #[arg(long)]
    fetch_token: bool,

    /// Disable progress bar.
    #[arg(long, env = "YANDEX_OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long, env = "YANDEX_OCR_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "YANDEX_OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "YANDEX_OCR_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FeatureArg {
    Document,
    Text,
}

impl From<FeatureArg> for TextFeature {
    fn from(v: FeatureArg) -> Self {
        match v {
            FeatureArg::Document => TextFeature::Document,
            FeatureArg::Text => TextFeature::Text,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_cli(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let fatal = e.downcast_ref::<OcrError>();
            eprintln!("{} {:#}", red("error:"), e);
            if fatal.is_some_and(OcrError::is_configuration) {
                eprintln!("{}", dim("See `yandex-ocr --help` for credential and folder options."));
            }
            ExitCode::from(fatal.map(OcrError::exit_code).unwrap_or(1))
        }
    }
}

async fn run_cli(cli: Cli) -> Result<u8> {
    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would interleave with the bar; the bar and the
    // summary carry what the user needs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.fetch_token;
    init_logging(&cli, show_progress)?;

    let timeout = Duration::from_secs(cli.request_timeout.max(1));
    // A blank flag still falls back to the environment.
    let mut sources = CredentialSources {
        iam_token: cli.iam_token.clone(),
        api_key: cli.api_key.clone(),
        oauth_token: cli.oauth_token.clone(),
    }
    .or(CredentialSources::from_env());
    let interactive = io::stdin().is_terminal();

    // ── Token-only mode ──────────────────────────────────────────────────
    if cli.fetch_token {
        if interactive && sources.is_empty() {
            sources.oauth_token = prompt_secret("OAuth token: ")?;
        }
        return fetch_token(&sources, timeout).await;
    }

    // ── Input path ───────────────────────────────────────────────────────
    let input = match cli.input.clone() {
        Some(p) => p,
        None => prompt_input_path()?,
    };

    // ── Credentials + config ─────────────────────────────────────────────
    if interactive && sources.is_empty() {
        sources = prompt_credentials()?;
    }
    let exchange = IamTokenExchange::new(timeout)?;
    let credentials = resolve_credentials(&sources, &exchange).await?;

    let folder_id = match cli.folder_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Some(id.to_string()),
        _ if interactive => prompt_line("Folder ID: ")?,
        _ => None,
    };

    let progress_cb: Option<Arc<CliProgressCallback>> =
        show_progress.then(CliProgressCallback::new);

    let config = build_config(&cli, credentials, folder_id, progress_cb.clone())?;

    // ── Ctrl-C → cancellation ────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} finishing up, writing partial results…", cyan("⚠"));
                cancel.cancel();
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let result = yandex_ocr::run(&input, &config, cancel).await;
    if let Some(ref cb) = progress_cb {
        cb.bar.finish_and_clear();
    }
    let summary = result?;

    if !cli.quiet {
        print_summary(&summary);
    }
    Ok(summary.exit_code())
}

fn init_logging(cli: &Cli, show_progress: bool) -> Result<()> {
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || (show_progress && cli.log_file.is_none()) {
        "error"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_file {
        Some(ref path) => {
            let file = File::create(path).map_err(|source| OcrError::OutputWriteFailed {
                path: path.clone(),
                source,
            })?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Exchange the OAuth token and print the IAM token on stdout.
async fn fetch_token(sources: &CredentialSources, timeout: Duration) -> Result<u8> {
    let oauth = sources
        .oauth_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(OcrError::MissingCredentials)
        .context("--fetch-token needs --oauth-token or YANDEX_OAUTH_TOKEN")?;

    let exchange = IamTokenExchange::new(timeout)?;
    let session = exchange
        .exchange(oauth)
        .await
        .ok_or(OcrError::MissingCredentials)
        .context("OAuth token exchange failed")?;

    println!("{}", session.iam_token);
    eprintln!(
        "{} IAM token {}  {}",
        green("✔"),
        dim(&mask_secret(&session.iam_token)),
        dim(&format!(
            "expires {}",
            session.expires_at.as_deref().unwrap_or("<unknown>")
        ))
    );
    Ok(0)
}

/// Ask for the input path on a terminal; an empty answer means `.`.
fn prompt_input_path() -> Result<PathBuf> {
    if !io::stdin().is_terminal() {
        return Err(OcrError::InputNotFound {
            path: PathBuf::new(),
        })
        .context("No input path given and stdin is not a terminal");
    }
    let answer = prompt_line("Enter path to image/PDF or directory: ")?;
    Ok(PathBuf::from(answer.as_deref().unwrap_or(".")))
}

/// Ask for an IAM token, then for an OAuth token if that was left empty.
fn prompt_credentials() -> Result<CredentialSources> {
    let iam_token = prompt_secret("IAM token (empty to use an OAuth token instead): ")?;
    let oauth_token = match iam_token {
        Some(_) => None,
        None => prompt_secret("OAuth token: ")?,
    };
    Ok(CredentialSources {
        iam_token,
        api_key: None,
        oauth_token,
    })
}

/// One visible line from stdin, trimmed; `None` when blank.
fn prompt_line(prompt: &str) -> Result<Option<String>> {
    eprint!("{prompt}");
    io::stderr().flush().ok();
    let mut line = String::new();
    tokio::task::block_in_place(|| io::stdin().lock().read_line(&mut line))
        .context("Failed to read from stdin")?;
    Ok(non_blank(line))
}

/// Like [`prompt_line`] without echoing the input.
fn prompt_secret(prompt: &str) -> Result<Option<String>> {
    let secret = tokio::task::block_in_place(|| rpassword::prompt_password(prompt))
        .context("Failed to read secret from the terminal")?;
    Ok(non_blank(secret))
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Map CLI args to `OcrConfig`.
fn build_config(
    cli: &Cli,
    credentials: yandex_ocr::Credentials,
    folder_id: Option<String>,
    progress: Option<Arc<CliProgressCallback>>,
) -> Result<OcrConfig> {
    let initial_delay = RetryPolicy::initial_delay_from_secs(cli.retry_delay)?;

    let tmp_dir = cli
        .tmp_dir
        .clone()
        .unwrap_or_else(|| cli.output_dir.join("tmp"));

    let mut builder = OcrConfig::builder()
        .credentials(credentials)
        .output_dir(cli.output_dir.clone())
        .tmp_dir(tmp_dir)
        .keep_tmp(cli.keep_tmp)
        .merge_output(cli.merge_output)
        .dpi(cli.dpi)
        .enhance(EnhanceSettings::default())
        .retry(RetryPolicy {
            max_attempts: cli.max_attempts,
            initial_delay,
            multiplier: cli.retry_factor,
        })
        .feature(cli.feature.into())
        .language_codes(cli.languages.iter().cloned())
        .request_timeout(Duration::from_secs(cli.request_timeout.max(1)))
        .concurrency(cli.concurrency);

    if let Some(id) = folder_id {
        builder = builder.folder_id(id);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb as ProgressCallback);
    }

    Ok(builder.build()?)
}

fn print_summary(summary: &RunSummary) {
    for file in &summary.files {
        match (&file.output, &file.error) {
            (Some(out), _) => {
                let failed = if file.failed_pages > 0 {
                    red(&format!("  ({} page(s) failed)", file.failed_pages))
                } else {
                    String::new()
                };
                eprintln!(
                    "Saved OCR result for {} to {}{}",
                    file.input.display(),
                    bold(&out.display().to_string()),
                    failed
                );
            }
            (None, Some(err)) => {
                let first_line = err.lines().next().unwrap_or(err);
                eprintln!("{} {}: {}", red("✘"), file.input.display(), first_line);
            }
            (None, None) => {}
        }
    }
    for merged in &summary.merged_outputs {
        eprintln!("Merged output: {}", bold(&merged.display().to_string()));
    }

    let mark = if summary.cancelled {
        cyan("⚠ cancelled")
    } else if summary.failed_pages() == 0 && summary.failed_files() == 0 {
        green("✔")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{}  {} file(s)  {} page(s)  {} failed page(s)  {} failed file(s)  {}",
        mark,
        summary.files.len(),
        summary.total_pages(),
        summary.failed_pages(),
        summary.failed_files(),
        dim(&format!("{}ms", summary.total_duration_ms)),
    );
}
