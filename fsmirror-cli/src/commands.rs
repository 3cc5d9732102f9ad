// SPDX-License-Identifier: AGPL-3.0-or-later
//! CLI command implementations

use console::{style, Term};
use fsmirror_core::{
    functions, Directory, DevicePath, DeviceRegistry, EntryKind, MirrorError, MirrorResult,
    PRIMARY_DEVICE,
};
use fsmirror_engine::{CopyEngine, WalkObserver, WalkReport};
use fsmirror_providers::build_registry;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::process::ExitCode;
use tabled::{Table, Tabled};
use tracing::info;

use crate::config::AppConfig;

/// Opened devices plus output settings, shared by every command
pub struct Context {
    registry: DeviceRegistry,
    config: AppConfig,
    json: bool,
}

impl Context {
    pub fn new(config: AppConfig, json: bool) -> MirrorResult<Self> {
        let registry = build_registry(&config.devices)?;
        Ok(Self {
            registry,
            config,
            json,
        })
    }

    fn engine(&self) -> CopyEngine<'_> {
        let engine = CopyEngine::new(&self.registry, self.config.engine_config());
        if self.json || !Term::stderr().is_term() {
            return engine;
        }
        engine.with_observer(ProgressObserver::new())
    }

    fn commit(&self, device: &str) -> MirrorResult<()> {
        self.registry.commit(device)?;
        info!("Committed {}", device);
        Ok(())
    }
}

/// Per-file progress bar on stderr
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(bar_style) =
            ProgressStyle::with_template("{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes}")
        {
            bar.set_style(bar_style.progress_chars("=> "));
        }
        Self { bar }
    }
}

impl WalkObserver for ProgressObserver {
    fn file_started(&self, path: &DevicePath, size: u64) {
        self.bar.set_length(size);
        self.bar.set_position(0);
        self.bar.set_message(path.to_string());
    }

    fn bytes_transferred(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn entry_failed(&self, path: &DevicePath, error: &MirrorError) {
        self.bar
            .println(format!("{} {}: {}", style("failed").red(), path, error));
    }
}

impl Drop for ProgressObserver {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

/// Parses `device:/path`. A bare path is taken to be on the primary device.
fn parse_path(raw: &str) -> MirrorResult<DevicePath> {
    if raw.contains(':') {
        DevicePath::parse(raw)
    } else if raw.starts_with('/') {
        DevicePath::parse(&format!("{PRIMARY_DEVICE}:{raw}"))
    } else {
        DevicePath::parse(&format!("{PRIMARY_DEVICE}:/{raw}"))
    }
}

fn print_json<T: Serialize>(value: &T) -> MirrorResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{text}");
    Ok(())
}

fn format_size(size: u64, human: bool) -> String {
    if human {
        bytesize::ByteSize(size).to_string()
    } else {
        size.to_string()
    }
}

/// Prints a finished walk; partial failures give a failing exit code.
fn finish_walk(ctx: &Context, verb: &str, report: &WalkReport) -> MirrorResult<ExitCode> {
    if ctx.json {
        print_json(report)?;
    } else if report.is_success() {
        println!("{} {}", style(verb).green(), report);
    } else {
        println!("{} {}", style(verb).yellow(), report);
    }
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[derive(Tabled)]
struct LsEntry {
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Name")]
    name: String,
}

/// List directory contents
pub fn ls(ctx: &Context, path: &str, long: bool, human: bool) -> MirrorResult<ExitCode> {
    let path = parse_path(path)?;
    let listing = Directory::open(&ctx.registry, &path)?;

    if ctx.json {
        print_json(&listing.iter().collect::<Vec<_>>())?;
        return Ok(ExitCode::SUCCESS);
    }

    if listing.is_empty() {
        println!("(empty directory)");
    } else if long {
        let rows: Vec<LsEntry> = listing
            .iter()
            .map(|e| LsEntry {
                kind: match e.kind {
                    EntryKind::Directory => style("d").cyan().to_string(),
                    EntryKind::File => "-".to_string(),
                },
                size: if e.is_directory() {
                    "-".to_string()
                } else {
                    format_size(e.size, human)
                },
                name: e.name.clone(),
            })
            .collect();
        println!("{}", Table::new(rows));
    } else {
        for entry in &listing {
            if entry.is_directory() {
                println!("{}/", style(&entry.name).cyan());
            } else {
                println!("{}", entry.name);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Copy a file or a directory tree
pub fn copy(ctx: &Context, source: &str, dest: &str) -> MirrorResult<ExitCode> {
    let source = parse_path(source)?;
    let mut dest = parse_path(dest)?;

    if functions::file_exists(&ctx.registry, &source) {
        if functions::directory_exists(&ctx.registry, &dest) {
            if let Some(name) = source.name() {
                dest = dest.join(name)?;
            }
        }
        let bytes = ctx.engine().copy_file(&source, &dest)?;
        ctx.commit(dest.device())?;

        let report = WalkReport {
            files: 1,
            bytes,
            ..Default::default()
        };
        return finish_walk(ctx, "Copied", &report);
    }

    let report = ctx.engine().copy_tree(&source, &dest)?;
    ctx.commit(dest.device())?;
    finish_walk(ctx, "Copied", &report)
}

/// Replace a destination tree with a fresh copy
pub fn dump(ctx: &Context, source: &str, dest: &str) -> MirrorResult<ExitCode> {
    let source = parse_path(source)?;
    let dest = parse_path(dest)?;

    let report = ctx.engine().dump_tree(&source, &dest)?;
    ctx.commit(dest.device())?;
    finish_walk(ctx, "Dumped", &report)
}

/// Remove files or directories
pub fn rm(ctx: &Context, paths: &[String], recursive: bool) -> MirrorResult<ExitCode> {
    let mut total = WalkReport::default();

    for raw in paths {
        let path = parse_path(raw)?;
        if functions::directory_exists(&ctx.registry, &path) {
            if recursive {
                total.merge(&ctx.engine().delete_tree(&path)?);
            } else {
                functions::delete_directory(&ctx.registry, &path)?;
                total.deleted += 1;
            }
        } else {
            functions::delete_file(&ctx.registry, &path)?;
            total.deleted += 1;
        }
        ctx.commit(path.device())?;
    }
    finish_walk(ctx, "Removed", &total)
}

/// Archive a directory tree into a zip file
pub fn archive(ctx: &Context, source: &str, archive: &str) -> MirrorResult<ExitCode> {
    let source = parse_path(source)?;
    let archive = parse_path(archive)?;

    let report = ctx.engine().archive_tree(&source, &archive)?;
    ctx.commit(archive.device())?;
    finish_walk(ctx, "Archived", &report)
}

/// Create directories
pub fn mkdir(ctx: &Context, paths: &[String], parents: bool) -> MirrorResult<ExitCode> {
    for raw in paths {
        let path = parse_path(raw)?;
        if parents {
            functions::create_directories_recursively(&ctx.registry, &path)?;
        } else {
            functions::create_directory(&ctx.registry, &path)?;
        }
        ctx.commit(path.device())?;
        if !ctx.json {
            println!("Created {}", path);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct StatInfo {
    path: String,
    device: String,
    kind: EntryKind,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    entries: Option<usize>,
}

/// Show file or directory information
pub fn stat(ctx: &Context, path: &str) -> MirrorResult<ExitCode> {
    let path = parse_path(path)?;
    let backend = ctx.registry.backend_for(&path)?;

    let info = if functions::file_exists(&ctx.registry, &path) {
        StatInfo {
            path: path.to_string(),
            device: backend.kind().to_string(),
            kind: EntryKind::File,
            size: functions::file_size(&ctx.registry, &path)?,
            entries: None,
        }
    } else {
        let listing = Directory::open(&ctx.registry, &path)?;
        StatInfo {
            path: path.to_string(),
            device: backend.kind().to_string(),
            kind: EntryKind::Directory,
            size: listing.iter().map(|e| e.size).sum(),
            entries: Some(listing.len()),
        }
    };

    if ctx.json {
        print_json(&info)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("  Path: {}", info.path);
    println!("  Device: {} ({})", path.device(), info.device);
    println!("  Type: {:?}", info.kind);
    println!("  Size: {} ({})", info.size, bytesize::ByteSize(info.size));
    if let Some(entries) = info.entries {
        println!("  Entries: {}", entries);
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Tabled, Serialize)]
struct DeviceRow {
    #[tabled(rename = "Device")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Access")]
    access: String,
    #[tabled(rename = "Commit")]
    commit: bool,
}

/// List configured devices
pub fn devices(ctx: &Context) -> MirrorResult<ExitCode> {
    let mut rows = Vec::new();
    for name in ctx.registry.names() {
        let backend = ctx.registry.resolve(name)?;
        let caps = backend.capabilities();
        rows.push(DeviceRow {
            name: name.to_string(),
            kind: backend.kind().to_string(),
            access: if caps.write { "rw" } else { "ro" }.to_string(),
            commit: caps.commit,
        });
    }

    if ctx.json {
        print_json(&rows)?;
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(ExitCode::SUCCESS)
}

/// Show storage space information
pub fn df(ctx: &Context, device: &str) -> MirrorResult<ExitCode> {
    let root = DevicePath::root(device)?;
    let info = functions::space_info(&ctx.registry, &root)?;

    if ctx.json {
        print_json(&info)?;
        return Ok(ExitCode::SUCCESS);
    }

    let used = info.total.saturating_sub(info.free);
    println!("Storage: {}", device);
    println!("  Total:     {}", bytesize::ByteSize(info.total));
    if info.total > 0 {
        let pct = (used as f64 / info.total as f64) * 100.0;
        println!("  Used:      {} ({:.1}%)", bytesize::ByteSize(used), pct);
    }
    println!("  Available: {}", bytesize::ByteSize(info.free));
    Ok(ExitCode::SUCCESS)
}

/// Commit pending writes on a device
pub fn commit(ctx: &Context, device: &str) -> MirrorResult<ExitCode> {
    if !ctx.registry.contains(device) {
        return Err(MirrorError::DeviceNotFound(device.to_string()));
    }
    ctx.commit(device)?;
    if !ctx.json {
        println!("{} {}", style("Committed").green(), device);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsmirror_providers::DeviceConfig;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        let config = AppConfig {
            devices: vec![DeviceConfig::volume(PRIMARY_DEVICE, dir.path())],
            ..Default::default()
        };
        Context::new(config, true).unwrap()
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("save:/a").unwrap().device(), "save");
        assert_eq!(parse_path("/a/b").unwrap().to_string(), "sdmc:/a/b");
        assert_eq!(parse_path("a/b").unwrap().to_string(), "sdmc:/a/b");
    }

    #[test]
    fn test_copy_into_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"data").unwrap();
        std::fs::create_dir(dir.path().join("out")).unwrap();
        let ctx = context(&dir);

        copy(&ctx, "/a.txt", "/out").unwrap();
        assert_eq!(std::fs::read(dir.path().join("out/a.txt")).unwrap(), b"data");
    }

    #[test]
    fn test_mkdir_and_rm() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        mkdir(&ctx, &["/x/y/z".to_string()], true).unwrap();
        assert!(dir.path().join("x/y/z").is_dir());
        assert!(mkdir(&ctx, &["/p/q".to_string()], false).is_err());

        rm(&ctx, &["/x".to_string()], true).unwrap();
        assert!(!dir.path().join("x").exists());
    }

    #[test]
    fn test_commit_unknown_device() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert!(matches!(
            commit(&ctx, "nope"),
            Err(MirrorError::DeviceNotFound(_))
        ));
        assert!(commit(&ctx, "sdmc").is_ok());
    }
}
