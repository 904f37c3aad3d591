use babelpress::{config, generate, output};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "babelpress")]
#[command(about = "Static site generator for multilingual lesson sites")]
#[command(long_about = "\
Static site generator for multilingual lesson sites

Content is markdown (or HTML) with YAML front matter. Each locale has its own
content directories; pages are rendered through layouts with inheritance.

Source structure:

  site/
  ├── config.toml                  # Site config (optional)
  ├── _layouts/
  │   ├── default.html             # Root layout with {% block %} placeholders
  │   └── lesson.html              # {% extends \"default\" %}
  ├── _data/
  │   ├── translations.yml         # UI strings per locale
  │   └── course.yml               # Any YAML/JSON file → data.course
  ├── _lessons/                    # en lessons → /lessons/<slug>/
  │   └── intro.md
  ├── _lessons_pt/                 # pt lessons → /pt/lessons/<slug>/
  │   └── intro.md
  ├── _pages/index.md              # en home → /
  └── assets/                      # Copied verbatim

Front matter keys: title, slug, layout, permalink, order, date, ref,
description, published. Everything else is available to layouts as page.<key>.

Run 'babelpress gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Source directory
    #[arg(long, default_value = ".", global = true)]
    source: PathBuf,

    /// Config file (defaults to <source>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log pipeline progress
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the site into the output directory
    Build {
        /// Output directory
        #[arg(long, default_value = "_site")]
        output: PathBuf,
    },
    /// Validate content, routes and layouts without writing anything
    Check,
    /// Print the route table as JSON
    Routes,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(generate::BuildError::Content(failure)) => {
            output::print_problems(&failure);
            ExitCode::FAILURE
        }
        Err(err) => {
            output::print_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), generate::BuildError> {
    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let site_config = load_site_config(&cli.source, cli.config.as_deref())?;
    init_thread_pool(&site_config.processing);

    match &cli.command {
        Command::Build { output: out } => {
            println!("==> Building {} → {}", cli.source.display(), out.display());
            let report = generate::build(&cli.source, out, &site_config)?;
            output::print_build_output(&report);
        }
        Command::Check => {
            println!("==> Checking {}", cli.source.display());
            let plan = generate::plan(&cli.source, &site_config)?;
            output::print_check_output(&plan);
        }
        Command::Routes => {
            let plan = generate::plan(&cli.source, &site_config)?;
            let json = output::format_route_table(&plan).map_err(|e| generate::BuildError::Io {
                path: PathBuf::from("<stdout>"),
                source: e.into(),
            })?;
            println!("{}", json);
        }
        Command::GenConfig => {}
    }
    Ok(())
}

fn load_site_config(
    source: &Path,
    explicit: Option<&Path>,
) -> Result<config::SiteConfig, config::ConfigError> {
    match explicit {
        Some(path) if !path.exists() => Err(config::ConfigError::Validation(format!(
            "config file {} does not exist",
            path.display()
        ))),
        Some(path) => config::load_config_file(path),
        None => config::load_config(source),
    }
}

/// `--verbose` enables INFO, otherwise `RUST_LOG`, falling back to WARN.
/// Logs go to stderr so `routes` output stays parseable.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
