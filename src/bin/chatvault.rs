use std::io::BufRead;
use std::path::PathBuf;

use chatvault::config::VaultConfig;
use chatvault::run::run_backup;

#[derive(Debug, Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
    chat_url: Option<String>,
    output_dir: Option<PathBuf>,
    webdriver_url: Option<String>,
    max_scrolls: Option<usize>,
    settle_ms: Option<u64>,
    stop_marker: Option<String>,
    harvest_during_scroll: Option<bool>,
    manual_login: bool,
}

fn parse_args(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--config requires a value".to_string())?;
                options.config_path = Some(PathBuf::from(v));
            }
            "--url" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--url requires a value".to_string())?;
                options.chat_url = Some(v.to_string());
            }
            "--out" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--out requires a value".to_string())?;
                options.output_dir = Some(PathBuf::from(v));
            }
            "--webdriver" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--webdriver requires a value".to_string())?;
                options.webdriver_url = Some(v.to_string());
            }
            "--max-scrolls" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--max-scrolls requires a value".to_string())?;
                options.max_scrolls = Some(
                    v.parse()
                        .map_err(|_| format!("--max-scrolls is not a number: {v}"))?,
                );
            }
            "--settle-ms" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--settle-ms requires a value".to_string())?;
                options.settle_ms = Some(
                    v.parse()
                        .map_err(|_| format!("--settle-ms is not a number: {v}"))?,
                );
            }
            "--stop-marker" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--stop-marker requires a value".to_string())?;
                options.stop_marker = Some(v.to_string());
            }
            "--harvest-during-scroll" => options.harvest_during_scroll = Some(true),
            "--final-only" => options.harvest_during_scroll = Some(false),
            "--manual-login" => options.manual_login = true,
            other => return Err(format!("unknown arg: {other} (try --help)")),
        }
        i += 1;
    }

    Ok(options)
}

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let options = parse_args(&args)?;

    let mut config = match &options.config_path {
        Some(path) => VaultConfig::load(path).map_err(|e| e.to_string())?,
        None => VaultConfig::default(),
    };
    if options.chat_url.is_some() {
        config.chat_url = options.chat_url;
    }
    if let Some(dir) = options.output_dir {
        config.output_dir = dir;
    }
    if let Some(endpoint) = options.webdriver_url {
        config.webdriver_url = endpoint;
    }
    if let Some(n) = options.max_scrolls {
        config.max_scrolls = n;
    }
    if let Some(ms) = options.settle_ms {
        config.settle_ms = ms;
    }
    if options.stop_marker.is_some() {
        config.stop_marker = options.stop_marker;
    }
    if let Some(enabled) = options.harvest_during_scroll {
        config.harvest_during_scroll = enabled;
    }
    let config = config.clamped();

    if config.chat_url.is_none() {
        return Err("no chat URL; pass --url or set chat_url in the config file".to_string());
    }

    println!("WebDriver: {}", config.webdriver_url);
    println!("Saving to: {}", config.output_dir.to_string_lossy());

    let manual_login = options.manual_login;
    let summary = run_backup(
        &config,
        || {
            if manual_login {
                println!("Log in and open the conversation in the browser, then press Enter...");
                let mut line = String::new();
                std::io::stdin().lock().read_line(&mut line)?;
            }
            Ok(())
        },
        |level, event, fields| {
            println!("[{level}] {event} {fields}");
            Ok(())
        },
    )
    .map_err(|e| e.to_string())?;

    println!(
        "Done: scroll {} after {} harvest pass(es), {} new image(s)",
        summary.scroll_outcome.as_str(),
        summary.harvest_passes,
        summary.images_downloaded
    );
    Ok(())
}

fn print_help() {
    println!("chatvault - scroll a web chat and back up its images");
    println!();
    println!("Usage: chatvault --url <chat-url> [options]");
    println!();
    println!("Options:");
    println!("  --url <chat-url>         conversation to open");
    println!("  --out <dir>              destination directory (default: chat_images)");
    println!("  --config <path>          JSON config file");
    println!("  --webdriver <endpoint>   WebDriver endpoint (default: http://localhost:9515)");
    println!("  --max-scrolls <n>        scroll iteration budget (default: 100)");
    println!("  --settle-ms <ms>         wait after each scroll (default: 2000)");
    println!("  --stop-marker <text>     stop once this text is visible");
    println!("  --harvest-during-scroll  harvest on every height increase (default)");
    println!("  --final-only             harvest once at the end instead of during scrolling");
    println!("  --manual-login           pause for Enter after opening the page");
    println!("  -h, --help               show this help");
}
