//! `adbhost` — the CLI front-end over the ADB/Fastboot protocol core.
//!
//! Thin by design: every subcommand just builds a transport, connects, and
//! calls into `adbhost::device`. Grounded in the teacher's `args.rs`/
//! `main.rs` split (clap subcommands, a `pull_push` directory-sync routine),
//! generalized from "shell out to the `adb` binary" to "speak the wire
//! protocol directly".

use adbhost::args::{Cli, FastbootCmd, PullArgs, PushArgs, SubCmds};
use adbhost::device::{AdbDevice, FastbootDevice};
use adbhost::fs::{AndroidFs, AsStr, FileMode, FileSystem, LocalFS, SyncFile};
use adbhost::signer::{AuthSigner, RsaSha1Signer};
use adbhost::transport::{AnyTransport, DeviceSelector, ADB_INTERFACE, FASTBOOT_INTERFACE};
use adbhost::tree::{build_tree, diff_trees};
use adbhost::CResult;

use chainerror::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use typed_path::{UnixPath, UnixPathBuf};

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn default_key_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".android").join("adbkey")
}

/// Loads the caller's signer, if the key file is present. A missing key is
/// not an error by itself — an unauthenticated device never asks for one —
/// but the first `AUTH_TOKEN` challenge with no signer loaded fails with
/// `DeviceAuthError` (§4.1).
fn load_signers(key: Option<PathBuf>) -> CResult<Vec<Box<dyn AuthSigner>>> {
    let path = key.unwrap_or_else(default_key_path);
    if !path.exists() {
        log::debug!("no signing key at {}; proceeding unauthenticated", path.display());
        return Ok(Vec::new());
    }
    let signer = RsaSha1Signer::load(&path).annotate()?;
    Ok(vec![Box::new(signer)])
}

fn device_selector(device: &adbhost::args::DeviceSelect) -> DeviceSelector {
    match (&device.serial, &device.port_path) {
        (_, Some(port_path)) => {
            let parts = port_path
                .split('.')
                .map(|p| p.parse::<u8>().unwrap_or(0))
                .collect();
            DeviceSelector::PortPath(parts)
        }
        (Some(serial), None) => DeviceSelector::Serial(serial.clone()),
        (None, None) => DeviceSelector::Any,
    }
}

fn looks_like_tcp(serial: &str) -> bool {
    serial.contains(':') || serial.contains('.')
}

fn open_adb_device(device: &adbhost::args::DeviceSelect) -> CResult<AdbDevice<AnyTransport>> {
    let transport = match &device.serial {
        Some(serial) if looks_like_tcp(serial) => {
            AnyTransport::Tcp(adbhost::transport::TcpTransport::connect(serial, None).annotate()?)
        }
        _ => AnyTransport::Usb(
            adbhost::transport::UsbTransport::find_and_open(ADB_INTERFACE, &device_selector(device), None)
                .annotate()?,
        ),
    };
    let signers = load_signers(device.key.clone())?;
    let dev = AdbDevice::connect(transport, &signers, None).annotate()?;
    log::info!("connected: {}", dev.device_banner());
    Ok(dev)
}

fn open_fastboot_device(device: &adbhost::args::DeviceSelect, chunk_kb: usize) -> CResult<FastbootDevice<AnyTransport>> {
    let transport = match &device.serial {
        Some(serial) if looks_like_tcp(serial) => {
            AnyTransport::Tcp(adbhost::transport::TcpTransport::connect(serial, None).annotate()?)
        }
        _ => AnyTransport::Usb(
            adbhost::transport::UsbTransport::find_and_open(FASTBOOT_INTERFACE, &device_selector(device), None)
                .annotate()?,
        ),
    };
    Ok(FastbootDevice::new(transport).with_chunk_kb(chunk_kb))
}

fn progress_bar(total: u64, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    bar.set_message(label.to_string());
    bar
}

fn now_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Builds the (root, children) tree for one side of a directory sync.
/// Android-side listing failures (destination not yet present on the
/// device) are treated as an empty tree rather than propagated, so pushing
/// into a brand-new directory works.
fn sync_tree<FS: FileSystem>(
    fs: &mut FS,
    root_sf: SyncFile,
    prefix: &UnixPath,
    tolerate_missing: bool,
) -> CResult<adbhost::tree::Node> {
    match build_tree(fs, root_sf.clone(), prefix) {
        Ok(node) => Ok(node),
        Err(e) if tolerate_missing => {
            log::debug!("treating missing destination as empty: {e}");
            Ok(adbhost::tree::Node::new(root_sf, prefix))
        }
        Err(e) => Err(e),
    }
}

fn ignored(rel: &UnixPath, ignore_dir: &[Box<str>]) -> bool {
    ignore_dir.iter().any(|g| rel.as_str().starts_with(&**g))
}

fn push_tree(
    dev: &mut AdbDevice<AnyTransport>,
    source: &Path,
    dest: &str,
    args: &PushArgs,
) -> CResult<()> {
    let source_path = UnixPathBuf::from(source.to_string_lossy().replace('\\', "/"));
    let dest_path = UnixPathBuf::from(dest.to_string());

    let local_meta = std::fs::metadata(source).annotate()?;
    let local_root = SyncFile {
        mode: FileMode::Dir,
        size: 0,
        timestamp: now_secs(),
        name: source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .into(),
        path: source_path.clone().into(),
    };
    let _ = local_meta;

    let android_root = SyncFile {
        mode: FileMode::Dir,
        size: 0,
        timestamp: 0,
        name: dest.trim_end_matches('/').rsplit('/').next().unwrap_or("").into(),
        path: dest_path.clone().into(),
    };

    let local_tree = build_tree(&mut LocalFS, local_root, source_path.as_path()).annotate()?;
    let android_tree = {
        let mut afs = AndroidFs::new(dev.connection());
        sync_tree(&mut afs, android_root, dest_path.as_path(), true)?
    };

    let (_android_only, local_only, both) = diff_trees(&local_tree, &android_tree);

    let to_push: Vec<&SyncFile> = local_only
        .iter()
        .map(|n| &n.sf)
        .chain(both.iter().filter_map(|(l, r)| {
            if l.size != r.size || l.timestamp > r.timestamp {
                Some(*l)
            } else {
                None
            }
        }))
        .filter(|sf| !ignored(sf.path.strip_prefix(source_path.as_path()).unwrap(), &args.ignore_dir))
        .collect();

    let total: u64 = to_push.iter().map(|sf| sf.size as u64).sum();
    let bar = progress_bar(total, "push");
    for sf in &to_push {
        let rel = sf.path.strip_prefix(source_path.as_path()).unwrap();
        let remote = format!("{}/{}", dest.trim_end_matches('/'), rel.as_str());
        let mtime = args.mtime.unwrap_or_else(now_secs);
        dev.push_file(Path::new(sf.path.as_str()), &remote, mtime).annotate()?;
        bar.inc(sf.size as u64);
    }
    bar.finish_with_message("push done");

    if args.delete_if_dne {
        log::warn!("--delete-if-dne has no effect on push: the device-side filesystem can't be deleted over sync:");
    }
    Ok(())
}

fn pull_tree(
    dev: &mut AdbDevice<AnyTransport>,
    source: &str,
    dest: &Path,
    args: &PullArgs,
) -> CResult<()> {
    let source_path = UnixPathBuf::from(source.to_string());
    let dest_path = UnixPathBuf::from(dest.to_string_lossy().replace('\\', "/"));

    std::fs::create_dir_all(dest).annotate()?;

    let (mode, size, mtime) = dev.stat(source).annotate()?;
    let android_root = SyncFile {
        mode: FileMode::from_u32(mode),
        size,
        timestamp: mtime,
        name: source.trim_end_matches('/').rsplit('/').next().unwrap_or("").into(),
        path: source_path.clone().into(),
    };

    let local_root = SyncFile {
        mode: FileMode::Dir,
        size: 0,
        timestamp: 0,
        name: dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .into(),
        path: dest_path.clone().into(),
    };

    let android_tree = {
        let mut afs = AndroidFs::new(dev.connection());
        build_tree(&mut afs, android_root, source_path.as_path()).annotate()?
    };
    let local_tree = sync_tree(&mut LocalFS, local_root, dest_path.as_path(), true)?;

    let (android_only, local_only, both) = diff_trees(&local_tree, &android_tree);

    let to_pull: Vec<&SyncFile> = android_only
        .iter()
        .map(|n| &n.sf)
        .chain(both.iter().filter_map(|(l, r)| {
            if r.size != l.size || r.timestamp > l.timestamp {
                Some(*r)
            } else {
                None
            }
        }))
        .filter(|sf| !ignored(sf.path.strip_prefix(source_path.as_path()).unwrap(), &args.ignore_dir))
        .collect();

    let total: u64 = to_pull.iter().map(|sf| sf.size as u64).sum();
    let bar = progress_bar(total, "pull");
    for sf in &to_pull {
        let rel = sf.path.strip_prefix(source_path.as_path()).unwrap();
        let local_dest = dest_path.join(rel.as_str());
        if let Some(parent) = Path::new(local_dest.as_path().as_str()).parent() {
            std::fs::create_dir_all(parent).annotate()?;
        }
        dev.pull_file(sf.path.as_str(), Path::new(local_dest.as_path().as_str())).annotate()?;
        if args.set_times {
            let file = std::fs::File::options()
                .write(true)
                .open(local_dest.as_path().as_str())
                .annotate()?;
            file.set_modified(
                std::time::UNIX_EPOCH + std::time::Duration::from_secs(sf.timestamp as u64),
            )
            .annotate()?;
        }
        bar.inc(sf.size as u64);
    }
    bar.finish_with_message("pull done");

    if args.delete_if_dne {
        for node in local_only {
            let local_path = dest_path.join(
                node.sf
                    .path
                    .strip_prefix(dest_path.as_path())
                    .unwrap_or(&node.sf.path),
            );
            log::info!("DEL (DNE): {}", local_path.as_path().as_str());
            let _ = LocalFS.rm(local_path.as_path());
        }
    }
    Ok(())
}

fn run_adb(cli: &Cli) -> CResult<()> {
    let mut dev = open_adb_device(&cli.device)?;

    match &cli.subcmd {
        SubCmds::Shell(args) => {
            if args.command.is_empty() {
                let stdin = std::io::stdin();
                dev.interactive_shell(stdin.lock(), |chunk| {
                    let _ = std::io::Write::write_all(&mut std::io::stdout(), chunk);
                    let _ = std::io::Write::flush(&mut std::io::stdout());
                })
                .annotate()?;
            } else {
                let out = dev.shell(&args.command.join(" ")).annotate()?;
                print!("{out}");
            }
        }
        SubCmds::Logcat(args) => {
            let cmd = format!("logcat {}", args.args.join(" "));
            dev.streaming_shell_unbounded(&cmd, |chunk| {
                let _ = std::io::Write::write_all(&mut std::io::stdout(), chunk);
            })
            .annotate()?;
        }
        SubCmds::Push(args) => {
            if args.source.is_dir() {
                push_tree(&mut dev, &args.source, &args.dest, args)?;
            } else {
                let mtime = args.mtime.unwrap_or_else(now_secs);
                dev.push_file(&args.source, &args.dest, mtime).annotate()?;
            }
        }
        SubCmds::Pull(args) => {
            let dest = args.dest.clone().unwrap_or_else(|| PathBuf::from("."));
            let (mode, _size, _mtime) = dev.stat(&args.source).annotate()?;
            if FileMode::from_u32(mode) == FileMode::Dir {
                pull_tree(&mut dev, &args.source, &dest, args)?;
            } else {
                dev.pull_file(&args.source, &dest).annotate()?;
            }
        }
        SubCmds::Stat { path } => {
            let (mode, size, mtime) = dev.stat(path).annotate()?;
            println!("mode={mode:#o} size={size} mtime={mtime}");
        }
        SubCmds::List { path } => {
            for entry in dev.list(path).annotate()? {
                println!("{:o}\t{}\t{}\t{}", entry.mode, entry.size, entry.mtime, entry.filename);
            }
        }
        SubCmds::Install(args) => {
            let out = dev
                .install(&args.apk, &args.dest_dir, args.replace, args.grant_permissions)
                .annotate()?;
            print!("{out}");
        }
        SubCmds::Uninstall(args) => {
            let out = dev.uninstall(&args.package, args.keep_data).annotate()?;
            print!("{out}");
        }
        SubCmds::Reboot(args) => {
            dev.reboot(&args.target).annotate()?;
        }
        SubCmds::Remount => print!("{}", dev.remount().annotate()?),
        SubCmds::Root => print!("{}", dev.root().annotate()?),
        SubCmds::EnableVerity => print!("{}", dev.enable_verity().annotate()?),
        SubCmds::DisableVerity => print!("{}", dev.disable_verity().annotate()?),
        SubCmds::Fastboot(_) => unreachable!("dispatched in run_fastboot"),
    }
    Ok(())
}

fn run_fastboot(cli: &Cli, cmd: &FastbootCmd) -> CResult<()> {
    let chunk_kb = match cmd {
        FastbootCmd::Download(a) => a.chunk_kb,
        FastbootCmd::Flash(a) => a.chunk_kb,
        _ => 1024,
    };
    let mut dev = open_fastboot_device(&cli.device, chunk_kb)?;

    match cmd {
        FastbootCmd::Download(args) => {
            let data = std::fs::read(&args.file).annotate()?;
            let bar = progress_bar(data.len() as u64, "download");
            let out = dev
                .download(&data, |msg| println!("(bootloader) {}", msg.message), |cur, _total| {
                    bar.set_position(cur);
                })
                .annotate()?;
            bar.finish_with_message("download done");
            print!("{out}");
        }
        FastbootCmd::Flash(args) => {
            let out = match &args.file {
                Some(file) => {
                    let bar = progress_bar(std::fs::metadata(file).annotate()?.len(), "flash");
                    let out = dev
                        .flash_from_file(&args.partition, file, |cur, _total| bar.set_position(cur))
                        .annotate()?;
                    bar.finish_with_message("flash done");
                    out
                }
                None => dev.flash(&args.partition).annotate()?,
            };
            print!("{out}");
        }
        FastbootCmd::Erase { partition } => dev.erase(partition).annotate()?,
        FastbootCmd::Getvar { name } => println!("{}", dev.getvar(name).annotate()?),
        FastbootCmd::Oem { command } => print!("{}", dev.oem(command).annotate()?),
        FastbootCmd::Continue => {
            dev.cont().annotate()?;
        }
        FastbootCmd::Reboot => {
            dev.reboot().annotate()?;
        }
        FastbootCmd::RebootBootloader => {
            dev.reboot_bootloader().annotate()?;
        }
    }
    Ok(())
}

fn run() -> CResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.subcmd {
        SubCmds::Fastboot(cmd) => run_fastboot(&cli, cmd),
        _ => run_adb(&cli),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}
