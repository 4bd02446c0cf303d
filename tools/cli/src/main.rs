//! driveport CLI - list, upload and download files in Google Drive.
//!
//! The first run walks through OAuth consent; the resulting credential is
//! cached and refreshed on later runs.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use driveport_common::TransferProgress;
use driveport_storage::{
    ClientConfig, CredentialStore, DownloadTarget, FileRepository, InteractiveAuthorizer,
    ListQuery, Settings,
};

#[derive(Parser)]
#[command(name = "driveport")]
#[command(about = "driveport - Google Drive file transfers")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (default: <config dir>/driveport/config.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// OAuth client configuration file.
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// Cached credential file.
    #[arg(long, global = true)]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List remote files.
    List {
        /// Only show files whose name contains this text.
        name: Option<String>,

        /// Maximum number of files shown.
        #[arg(short = 'n', long)]
        page_size: Option<u32>,

        /// Most recently modified first.
        #[arg(long)]
        newest: bool,
    },

    /// Upload local files.
    Upload {
        /// Files to upload.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Upload only the most recently modified of the given files.
        #[arg(long)]
        last: bool,
    },

    /// Download a remote file.
    Download {
        /// File id or name (an id is tried first).
        #[arg(required_unless_present = "last")]
        file: Option<String>,

        /// Treat FILE as an id.
        #[arg(long, conflicts_with = "name")]
        id: bool,

        /// Treat FILE as a name search.
        #[arg(long)]
        name: bool,

        /// Download the most recently modified remote file.
        #[arg(long, conflicts_with_all = ["file", "id", "name"])]
        last: bool,

        /// Destination directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Unpack a downloaded zip archive next to it.
        #[arg(short, long)]
        extract: bool,
    },

    /// Print a shell completion script.
    Completions {
        shell: Shell,
    },
}

fn main() -> Result<()> {
    block_on_detached(run())?
}

/// Drive `future` to completion without waiting for blocking tasks it left
/// behind, such as a console read abandoned on Ctrl+C.
fn block_on_detached<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

async fn run() -> Result<()> {
    let Cli {
        verbose,
        settings,
        credentials,
        token_file,
        command,
    } = Cli::parse();

    // Setup logging
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = command {
        clap_complete::generate(shell, &mut Cli::command(), "driveport", &mut std::io::stdout());
        return Ok(());
    }

    let mut settings = Settings::load(settings.as_deref())
        .await
        .context("Failed to load settings")?;
    if let Some(path) = credentials {
        settings.client_config_path = path;
    }
    if let Some(path) = token_file {
        settings.token_path = path;
    }

    let repository = open_repository(&settings).await?;

    match command {
        Commands::List {
            name,
            page_size,
            newest,
        } => {
            let mut query = ListQuery::new(page_size.unwrap_or(settings.page_size))?;
            if let Some(name) = name {
                query = query.name_contains(name);
            }
            if newest {
                query = query.newest_first();
            }
            cmd_list(&repository, &query).await
        }

        Commands::Upload { files, last } => cmd_upload(&repository, files, last).await,

        Commands::Download {
            file,
            id,
            name,
            last,
            output,
            extract,
        } => {
            let target = download_target(file, id, name, last)?;
            let dest = output.unwrap_or_else(|| settings.download_dir.clone());
            cmd_download(&repository, &target, &dest, extract).await
        }

        Commands::Completions { .. } => Ok(()),
    }
}

/// Build the repository from settings; reads the client configuration once.
async fn open_repository(settings: &Settings) -> Result<FileRepository> {
    let config = ClientConfig::load(&settings.client_config_path)
        .await
        .with_context(|| {
            format!(
                "Failed to read OAuth client configuration {}",
                settings.client_config_path.display()
            )
        })?;
    let authorizer = InteractiveAuthorizer::with_console(config, settings.open_browser)?;
    let store = CredentialStore::new(&settings.token_path);
    Ok(FileRepository::for_drive(store, authorizer))
}

/// List remote files.
async fn cmd_list(repository: &FileRepository, query: &ListQuery) -> Result<()> {
    let files = interruptible(repository.list_files(query), "List files").await?;

    if files.is_empty() {
        println!("No files found.");
        return Ok(());
    }
    for file in files {
        println!("{}", file);
    }
    Ok(())
}

/// Upload files, or only the newest of them with `last`.
async fn cmd_upload(repository: &FileRepository, files: Vec<PathBuf>, last: bool) -> Result<()> {
    let files = if last {
        vec![newest_file(&files)?]
    } else {
        files
    };

    for path in files {
        info!("Uploading {}", path.display());

        let pb = progress_bar()?;
        let sink = pb.clone();
        let mut progress = move |p: TransferProgress| {
            sink.set_length(p.total_bytes);
            sink.set_position(p.bytes_transferred);
        };

        let result = interruptible(
            repository.upload_file(&path, &mut progress),
            &format!("Upload {}", path.display()),
        )
        .await;
        pb.finish_and_clear();
        let handle = result?;

        println!("Uploaded {}", handle);
        println!("  Size: {} bytes", handle.size.unwrap_or(0));
    }
    Ok(())
}

/// Download a remote file into `dest`, unpacking it with `extract`.
async fn cmd_download(
    repository: &FileRepository,
    target: &DownloadTarget,
    dest: &Path,
    extract: bool,
) -> Result<()> {
    let pb = progress_bar()?;
    let sink = pb.clone();
    let mut progress = move |p: TransferProgress| {
        sink.set_length(p.total_bytes);
        sink.set_position(p.bytes_transferred);
    };

    let result = interruptible(
        repository.download_file(target, dest, &mut progress),
        "Download",
    )
    .await;
    pb.finish_and_clear();
    let downloaded = result?;

    println!("Downloaded {}", downloaded.handle);
    println!("  Saved to: {}", downloaded.path.display());
    println!("  Size: {} bytes", downloaded.bytes);

    if extract {
        let dir = driveport_storage::extract(&downloaded.path)
            .await
            .with_context(|| format!("Failed to extract {}", downloaded.path.display()))?;
        println!("  Extracted to: {}", dir.display());
    }
    Ok(())
}

/// Run a repository operation until it finishes or Ctrl+C is pressed.
///
/// Dropping an interrupted download removes its partial file.
async fn interruptible<T>(
    operation: impl Future<Output = driveport_common::Result<T>>,
    what: &str,
) -> Result<T> {
    tokio::select! {
        result = operation => result.map_err(|e| describe(e, what)),
        _ = tokio::signal::ctrl_c() => anyhow::bail!("{} interrupted", what),
    }
}

/// Attach a diagnostic; authorization failures end the run.
fn describe(err: driveport_common::Error, what: &str) -> anyhow::Error {
    if err.is_fatal() {
        anyhow::Error::new(err).context("Not authorized; no operation was performed")
    } else {
        anyhow::Error::new(err).context(format!("{} failed", what))
    }
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.green/white}] {bytes}/{total_bytes} ({eta})")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn download_target(
    file: Option<String>,
    id: bool,
    name: bool,
    last: bool,
) -> Result<DownloadTarget> {
    if last {
        return Ok(DownloadTarget::Latest);
    }
    let file = file.context("Specify a file id or name, or --last")?;
    Ok(if id {
        DownloadTarget::Id(file)
    } else if name {
        DownloadTarget::Name(file)
    } else {
        DownloadTarget::IdOrName(file)
    })
}

/// Most recently modified of `files`.
fn newest_file(files: &[PathBuf]) -> Result<PathBuf> {
    let mut newest: Option<(SystemTime, &PathBuf)> = None;
    for path in files {
        let modified = std::fs::metadata(path)
            .and_then(|metadata| metadata.modified())
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if newest.map_or(true, |(time, _)| modified > time) {
            newest = Some((modified, path));
        }
    }
    newest
        .map(|(_, path)| path.clone())
        .context("No files given")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn test_abandoned_blocking_read_does_not_delay_exit() {
        let started = Instant::now();

        let interrupted = block_on_detached(async {
            tokio::select! {
                _ = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(10))) => false,
                _ = tokio::time::sleep(Duration::from_millis(50)) => true,
            }
        })
        .unwrap();

        assert!(interrupted);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_download_flags() {
        let cli = Cli::try_parse_from(["driveport", "download", "--last", "-o", "/tmp"]).unwrap();
        match cli.command {
            Commands::Download {
                last,
                output,
                extract,
                ..
            } => {
                assert!(last);
                assert_eq!(output, Some(PathBuf::from("/tmp")));
                assert!(!extract);
            }
            _ => panic!("expected download"),
        }

        let cli = Cli::try_parse_from(["driveport", "download", "photos.zip", "-e"]).unwrap();
        match cli.command {
            Commands::Download { file, extract, .. } => {
                assert_eq!(file.as_deref(), Some("photos.zip"));
                assert!(extract);
            }
            _ => panic!("expected download"),
        }
        assert!(Cli::try_parse_from(["driveport", "download", "--last", "--extract"]).is_ok());

        assert!(Cli::try_parse_from(["driveport", "download"]).is_err());
        assert!(Cli::try_parse_from(["driveport", "download", "x", "--id", "--name"]).is_err());
        assert!(Cli::try_parse_from(["driveport", "upload"]).is_err());
    }

    #[test]
    fn test_download_target() {
        assert_eq!(
            download_target(None, false, false, true).unwrap(),
            DownloadTarget::Latest
        );
        assert_eq!(
            download_target(Some("abc".into()), true, false, false).unwrap(),
            DownloadTarget::Id("abc".into())
        );
        assert_eq!(
            download_target(Some("abc".into()), false, true, false).unwrap(),
            DownloadTarget::Name("abc".into())
        );
        assert_eq!(
            download_target(Some("abc".into()), false, false, false).unwrap(),
            DownloadTarget::IdOrName("abc".into())
        );
        assert!(download_target(None, false, false, false).is_err());
    }

    #[test]
    fn test_newest_file() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old.txt");
        let new = dir.path().join("new.txt");
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(&new, b"new").unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(newest_file(&[old.clone(), new.clone()]).unwrap(), new);
        assert!(newest_file(&[dir.path().join("absent")]).is_err());
        assert!(newest_file(&[]).is_err());
    }
}
