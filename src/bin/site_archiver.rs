use std::path::PathBuf;

use site_archiver::checkpoint;
use site_archiver::config::{load_archiver_config, save_config_file};
use site_archiver::crawl::{run_crawl, CrawlContext};
use site_archiver::events::{log_event, JsonlLog};
use site_archiver::paths::ArchivePaths;
use site_archiver::transport::ProxyTransport;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args
        .first()
        .map(String::as_str)
        .unwrap_or("site_archiver");

    if args.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        print_help(program);
        return;
    }

    if args.len() == 2 && args[1] == "--write-config" {
        if let Err(err) = write_config() {
            log::error!("{err}");
        }
        return;
    }

    if args.len() != 2 {
        println!("Usage : {program} <configuration file>");
        return;
    }

    // Fatal errors end the process with status 0, like a usage error.
    if let Err(err) = run(PathBuf::from(&args[1])) {
        log::error!("{err}");
        std::process::exit(0);
    }
}

fn run(checkpoint_path: PathBuf) -> site_archiver::Result<()> {
    let paths = ArchivePaths::from_current_dir()?;
    let config = load_archiver_config(&paths)?;
    let mut document = checkpoint::load_for_crawl(&checkpoint_path)?;
    let transport = ProxyTransport::connect(&config)?;
    log::info!("Using proxy {}", transport.proxy_addr());

    let ctx = CrawlContext {
        config,
        paths,
        checkpoint_path,
        transport,
    };
    let run_log = JsonlLog::new(ctx.paths.run_log_path());
    log::info!("Run log: {}", run_log.path().display());

    let summary = run_crawl(&ctx, &mut document, |event| {
        log_event(event);
        run_log.append(event)
    })?;

    println!("SUCCESS");
    log::info!(
        "Images: {} downloaded, {} found on disk, {} already fetched, {} failed",
        summary.images_downloaded,
        summary.images_found_on_disk,
        summary.images_already_fetched,
        summary.images_failed
    );
    Ok(())
}

/// Saves the effective settings (file plus environment) to `./site_archiver.json`.
fn write_config() -> site_archiver::Result<()> {
    let paths = ArchivePaths::from_current_dir()?;
    let config = load_archiver_config(&paths)?;
    save_config_file(&paths, &config)?;
    println!("{}", paths.config_path().display());
    Ok(())
}

fn print_help(program: &str) {
    println!(
        r#"{program}

Archives each site listed in a checkpoint document (page, title and images) through a
SOCKS5 proxy, and records progress back into the same document so interrupted runs resume.

Usage:
  {program} <configuration file>
  {program} --write-config     Save the effective settings to ./site_archiver.json

Archive output goes to ./sites/<site>/index.html plus the site's images.

Environment:
  SITE_ARCHIVER_PROXY_URL        Proxy to use (default: socks5h://127.0.0.1:9050)
  SITE_ARCHIVER_TIMEOUT_SECS     Per-request timeout in seconds (default: 30)
  SITE_ARCHIVER_ABSOLUTE_PATHS   Point image sources at the live site instead of the archive
  RUST_LOG                       Log filter (default: info)

Optional settings file: ./site_archiver.json
"#
    );
}
