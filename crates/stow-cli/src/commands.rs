use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use stow_router::Router;
use stow_store::{BrowseOptions, DownloadOptions, FetchOptions, RemoveOptions, UploadOptions};
use stow_types::{FileHandle, Health};
use tracing::debug;

use crate::cli::*;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "stow.toml";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let router = open_router(cli.config.as_deref())?;
    let format = cli.format;
    let result = match cli.command {
        Command::Upload(args) => cmd_upload(&router, args, format),
        Command::Fetch(args) => cmd_fetch(&router, args, format),
        Command::Download(args) => cmd_download(&router, args, format),
        Command::Remove(args) => cmd_remove(&router, args, format),
        Command::Browse(args) => cmd_browse(&router, args, format),
        Command::Decode(args) => cmd_decode(&router, args, format),
        Command::Health => cmd_health(&router, format),
        Command::Backends => cmd_backends(&router, format),
    };
    router.close()?;
    result
}

/// Configure, seal, open, and start a router from the host config file.
pub fn open_router(config: Option<&Path>) -> anyhow::Result<Router> {
    let router = Router::new();
    if let Some(root) = load_config(config)? {
        router.configure(&root)?;
    }
    router.setup()?;
    router.open().context("opening storage backends")?;
    router.start()?;
    Ok(router)
}

fn load_config(config: Option<&Path>) -> anyhow::Result<Option<toml::Table>> {
    let path = match config {
        Some(path) => path,
        None => {
            let path = Path::new(DEFAULT_CONFIG);
            if !path.exists() {
                debug!("no {DEFAULT_CONFIG}; using built-in defaults");
                return Ok(None);
            }
            path
        }
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let root = text
        .parse::<toml::Table>()
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(root))
}

fn cmd_upload(router: &Router, args: UploadArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut opts = UploadOptions::default();
    if let Some(key) = args.key {
        opts = opts.with_key(key);
    }
    if let Some(prefix) = args.prefix {
        opts = opts.with_prefix(prefix);
    }
    let file = match &args.backend {
        Some(backend) => router.upload_to(backend, &args.path, &opts)?,
        None => router.upload(&args.path, &opts)?,
    };
    match format {
        OutputFormat::Json => println!("{}", handle_json(&file)),
        OutputFormat::Text => {
            println!("{} Stored {} on {}", "✓".green().bold(), args.path.display(), file.backend().bold());
            println!("  Code: {}", file.code().yellow());
            println!("  File: {} ({} bytes)", file.file(), file.size());
        }
    }
    Ok(())
}

fn cmd_fetch(router: &Router, args: FetchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut stream = router.fetch(&args.code, &FetchOptions::range(args.start, args.end))?;
    match &args.output {
        Some(output) => {
            let mut file = File::create(output)
                .with_context(|| format!("creating {}", output.display()))?;
            let bytes = io::copy(&mut stream, &mut file)?;
            match format {
                OutputFormat::Json => println!("{}", json!({ "path": output, "bytes": bytes })),
                OutputFormat::Text => println!("{} Wrote {} bytes to {}", "✓".green().bold(), bytes, output.display()),
            }
        }
        None => {
            let mut stdout = io::stdout().lock();
            io::copy(&mut stream, &mut stdout)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn cmd_download(router: &Router, args: DownloadArgs, format: OutputFormat) -> anyhow::Result<()> {
    let opts = match args.target {
        Some(target) => DownloadOptions::to(target),
        None => DownloadOptions::default(),
    };
    let path = router.download(&args.code, &opts)?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "path": path })),
        OutputFormat::Text => println!("{}", path.display()),
    }
    Ok(())
}

fn cmd_remove(router: &Router, args: CodeArgs, format: OutputFormat) -> anyhow::Result<()> {
    router.remove(&args.code, &RemoveOptions::default())?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "removed": args.code })),
        OutputFormat::Text => println!("{} Removed {}", "✓".green().bold(), args.code.yellow()),
    }
    Ok(())
}

fn cmd_browse(router: &Router, args: CodeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let location = router.browse(&args.code, &BrowseOptions::default())?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "location": location })),
        OutputFormat::Text => println!("{location}"),
    }
    Ok(())
}

fn cmd_decode(router: &Router, args: CodeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let file = router.decode(&args.code)?;
    match format {
        OutputFormat::Json => println!("{}", handle_json(&file)),
        OutputFormat::Text => {
            println!("Backend: {}", file.backend().bold());
            println!("Prefix:  {}", file.prefix());
            println!("Key:     {}", file.key());
            println!("Ext:     {}", file.ext());
            println!("Size:    {}", file.size());
            println!("Proxy:   {}  Remote: {}", file.proxy(), file.remote());
        }
    }
    Ok(())
}

fn cmd_health(router: &Router, format: OutputFormat) -> anyhow::Result<()> {
    let healths: BTreeMap<String, Health> = router.healths();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&healths)?),
        OutputFormat::Text => {
            for (name, health) in &healths {
                let status = if health.is_idle() { "idle".green() } else { "busy".yellow() };
                println!("{:<16} {} (workload {})", name.bold(), status, health.workload);
            }
        }
    }
    Ok(())
}

fn cmd_backends(router: &Router, format: OutputFormat) -> anyhow::Result<()> {
    let backends = router.backends();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&backends)?),
        OutputFormat::Text => {
            for (name, weight) in &backends {
                let placement = if *weight > 0 { "placeable".green() } else { "addressable only".dimmed() };
                println!("{:<16} weight {:<4} {}", name.bold(), weight, placement);
            }
        }
    }
    Ok(())
}

fn handle_json(file: &FileHandle) -> serde_json::Value {
    json!({
        "code": file.code(),
        "backend": file.backend(),
        "prefix": file.prefix(),
        "key": file.key(),
        "ext": file.ext(),
        "size": file.size(),
        "proxy": file.proxy(),
        "remote": file.remote(),
        "file": file.file(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::path::PathBuf;

    fn write_config(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("stow.toml");
        let doc = format!(
            "[file]\ndownload = \"{}\"\n\n[storage.setting]\nstorage = \"{}\"\n\n[storage.mem]\ndriver = \"memory\"\nweight = 0\n",
            dir.path().join("download").display(),
            dir.path().join("objects").display(),
        );
        fs::write(&path, doc).unwrap();
        path
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[storage").unwrap();
        assert!(open_router(Some(&path)).is_err());
    }

    #[test]
    fn router_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let router = open_router(Some(&write_config(&dir))).unwrap();
        assert_eq!(router.download_root(), dir.path().join("download"));
        let backends = router.backends();
        assert_eq!(backends["default"], 1);
        assert_eq!(backends["mem"], 0);

        let source = dir.path().join("hello.txt");
        fs::write(&source, b"hello stow").unwrap();
        let file = router.upload(&source, &UploadOptions::default()).unwrap();
        assert_eq!(file.backend(), "default");
        assert!(dir.path().join("objects").join(file.file()).is_file());

        let mut out = String::new();
        router
            .fetch(file.code(), &FetchOptions::default())
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "hello stow");
        router.close().unwrap();
    }

    #[test]
    fn fetch_to_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let router = open_router(Some(&write_config(&dir))).unwrap();
        let source = dir.path().join("range.bin");
        fs::write(&source, b"0123456789").unwrap();
        let file = router.upload(&source, &UploadOptions::default()).unwrap();

        let output = dir.path().join("out.bin");
        cmd_fetch(
            &router,
            FetchArgs {
                code: file.code().to_string(),
                start: 2,
                end: 6,
                output: Some(output.clone()),
            },
            OutputFormat::Json,
        )
        .unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"2345");
    }

    #[test]
    fn handle_json_fields() {
        let file = FileHandle::new("default", "ab/cd", "key", "txt", 10);
        let value = handle_json(&file);
        assert_eq!(value["code"], file.code());
        assert_eq!(value["backend"], "default");
        assert_eq!(value["file"], "ab/cd/key.txt");
        assert_eq!(value["size"], 10);
    }
}
