//! CLI parsing and orchestration. Parses args, runs discovery -> extraction -> assembly -> EPUB.
//! Maps errors to exit codes.

use crate::assemble::{assemble, attach_cover, order_pages, AssembleError, AssemblyReport, OrderingPolicy};
use crate::collect::pages::Progress;
use crate::collect::{
    discover_links, extract_pages, parse_absolute_url, CollectError, ImageDownloader, PageFetcher,
    PoliteClient,
};
use crate::config;
use crate::epub::{BookWriter, EpubBuilder, EpubError};
use crate::images::HttpImageDownloader;
use crate::model::Discovery;
use crate::profile::{resolve_profile, Profile, ProfileError};
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Module used when neither --module nor the config file names one.
pub const DEFAULT_MODULE: &str = "conference";
/// Book title when the start page has none and --output is not given.
pub const DEFAULT_TITLE: &str = "Default Title";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Profile(#[from] ProfileError),

    #[error("{0}")]
    Collect(#[from] CollectError),

    #[error("{0}")]
    Assemble(#[from] AssembleError),

    #[error("{0}")]
    Epub(#[from] EpubError),

    #[error("Cannot prepare scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Profile(_) => 1,
            CliRunError::Collect(_)
            | CliRunError::Assemble(AssembleError::InconsistentOrdering { .. }) => 2,
            CliRunError::Assemble(_) | CliRunError::Epub(_) | CliRunError::Scratch(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "sitebinder")]
#[command(about = "Crawl a collection of linked pages and bind them into one EPUB")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, timeout_secs, retry_count, retry_backoff_secs, default_module, [profiles.<name>]) are read from ./sitebinder.toml or the user config directory. CLI flags override config."
)]
pub struct Args {
    /// Start URL: the page that lists the collection's content pages.
    #[arg(long)]
    pub url: String,

    /// Book title and output file name. Default: the start page's title.
    #[arg(short, long)]
    pub output: Option<String>,

    /// URL of a cover image. Default: no cover.
    #[arg(long)]
    pub cover: Option<String>,

    /// Site profile (conference, scriptures, ensign, or one from the config file).
    #[arg(short, long)]
    pub module: Option<String>,

    /// Only follow links on the start URL's host.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub same_host: bool,

    /// Build the book from the pages that were fetched even if some are missing.
    #[arg(long)]
    pub allow_missing: bool,

    /// Discover links, print them as JSON and exit without fetching pages.
    #[arg(long)]
    pub dry_run: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Warnings and errors only; no progress bar.
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Everything one run needs besides the profile and the collaborators.
#[derive(Debug, Clone)]
pub struct RunPlan<'a> {
    pub start_url: &'a str,
    pub title: Option<&'a str>,
    pub cover: Option<&'a str>,
    pub same_host: bool,
    pub policy: OrderingPolicy,
    pub output_dir: &'a Path,
    pub dry_run: bool,
    pub show_progress: bool,
}

#[derive(Debug)]
pub struct WrittenBook {
    pub path: PathBuf,
    pub title: String,
    pub report: AssemblyReport,
    pub cover: bool,
}

#[derive(Debug)]
pub enum Outcome {
    /// Dry run: links discovered, nothing fetched or written.
    Listed(Discovery),
    Written(WrittenBook),
}

/// Sanitize book title to a safe filename: lowercase, replace spaces/special with `-`.
fn sanitize_title(title: &str) -> String {
    let mut s = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    // Collapse multiple dashes and trim
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    s = s.trim_matches('-').to_string();
    if s.is_empty() {
        s = "book".to_string();
    }
    s
}

/// Ensure output path parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

fn progress_bar(len: usize, show: bool) -> Option<indicatif::ProgressBar> {
    if !show || len == 0 {
        return None;
    }
    let bar = indicatif::ProgressBar::new(len as u64);
    if let Ok(style) = indicatif::ProgressStyle::default_bar()
        .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
    {
        bar.set_style(
            style
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
    }
    bar.set_message("Fetching pages");
    bar.enable_steady_tick(Duration::from_millis(80));
    Some(bar)
}

/// Run the pipeline against the given collaborators.
pub fn execute<F, I>(
    plan: &RunPlan<'_>,
    profile: &Profile,
    fetcher: &F,
    images: &I,
) -> Result<Outcome, CliRunError>
where
    F: PageFetcher + Sync + ?Sized,
    I: ImageDownloader + Sync + ?Sized,
{
    let discovery = discover_links(plan.start_url, profile, plan.same_host, fetcher)?;
    if plan.dry_run {
        return Ok(Outcome::Listed(discovery));
    }

    let title = plan
        .title
        .map(str::to_string)
        .or_else(|| discovery.title.clone())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let output_path = plan
        .output_dir
        .join(format!("{}.epub", sanitize_title(&title)));
    validate_output_path(&output_path)?;

    let scratch = tempfile::Builder::new()
        .prefix("sitebinder-")
        .tempdir()
        .map_err(CliRunError::Scratch)?;
    let css_path = scratch.path().join("styles.css");
    std::fs::write(&css_path, &profile.css).map_err(CliRunError::Scratch)?;

    let bar = progress_bar(discovery.links.len(), plan.show_progress);
    let on_progress = |done: usize, _total: usize| {
        if let Some(b) = &bar {
            b.set_position(done as u64);
        }
    };
    let progress: Progress<'_> = &on_progress;
    let pages = extract_pages(
        &discovery.links,
        profile,
        scratch.path(),
        fetcher,
        images,
        Some(progress),
    );
    if let Some(b) = &bar {
        b.disable_steady_tick();
        b.finish_and_clear();
    }

    let ordered = order_pages(pages, plan.policy)?;

    let mut book = EpubBuilder::new(title.as_str(), profile.book_author.as_str())
        .description(format!(
            "Content crawled from {} on {}",
            plan.start_url,
            chrono::Local::now().format("%Y-%m-%d")
        ))
        .identifier(format!("urn:sitebinder:{}", plan.start_url));
    let css = if profile.css.trim().is_empty() {
        None
    } else {
        Some(book.add_css(&css_path)?)
    };
    let report = assemble(ordered, css.as_deref(), &mut book)?;
    let cover = match plan.cover {
        Some(url) => attach_cover(url, scratch.path(), images, &mut book),
        None => false,
    };

    book.write(&output_path)?;
    info!(path = %output_path.display(), pages = report.total_pages(), "book written");
    Ok(Outcome::Written(WrittenBook {
        path: output_path,
        title,
        report,
        cover,
    }))
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config()
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();

    let module = args
        .module
        .clone()
        .or_else(|| config.default_module.clone())
        .unwrap_or_else(|| DEFAULT_MODULE.to_string());
    let profile = resolve_profile(&module, &config.profiles)?;

    let start = parse_absolute_url(&args.url).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Expected an absolute start URL, e.g. https://www.example.org/study/general-conference/2024/04. {}",
            e
        ))
    })?;
    if let Some(cover) = &args.cover {
        parse_absolute_url(cover)
            .map_err(|e| CliRunError::InvalidInput(format!("Invalid --cover: {}", e)))?;
    }

    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    let timeout_secs = args
        .timeout
        .or(config.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let mut builder = PoliteClient::builder()
        .delay_secs(profile.delay_secs)
        .timeout_secs(timeout_secs);
    if let Some(n) = config.retry_count {
        builder = builder.retry_count(n.max(1));
    }
    if let Some(backoff) = config.retry_backoff_secs.clone() {
        builder = builder.retry_backoff_secs(backoff);
    }
    if let Some(ua) = args.user_agent.clone().or_else(|| config.user_agent.clone()) {
        builder = builder.user_agent(ua);
    }
    let client = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;
    let images = HttpImageDownloader::new(&client);

    let output_dir = config
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let plan = RunPlan {
        start_url: start.as_str(),
        title: args.output.as_deref(),
        cover: args.cover.as_deref(),
        same_host: args.same_host,
        policy: if args.allow_missing {
            OrderingPolicy::Compact
        } else {
            OrderingPolicy::Strict
        },
        output_dir: &output_dir,
        dry_run: args.dry_run,
        show_progress: !args.quiet,
    };

    match execute(&plan, &profile, &client, &images)? {
        Outcome::Listed(discovery) => {
            let json = serde_json::to_string_pretty(&discovery)
                .map_err(|e| CliRunError::InvalidInput(format!("Failed to print links: {}", e)))?;
            println!("{}", json);
        }
        Outcome::Written(book) => {
            for title in &book.report.titles {
                println!("Added page: {}", title);
            }
            println!("\nSuccessfully created EPUB: {}", book.title);
            println!("Total pages: {}", book.report.total_pages());
            if !args.quiet {
                eprintln!("Wrote {}", book.path.display());
            }
        }
    }
    Ok(())
}
