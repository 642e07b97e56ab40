//! `clap`-derived CLI surface: one subcommand per exposed operation in §6,
//! plus a `fastboot` subcommand tree for the bootloader channel.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct DeviceSelect {
    /// USB serial number, or `host[:port]` to connect over TCP instead.
    #[arg(short, long, global = true)]
    pub serial: Option<String>,

    /// Match a USB device by bus/port-path instead of serial (e.g. `1.2.3`).
    #[arg(long, global = true)]
    pub port_path: Option<String>,

    /// Path to the PKCS#8 private key used to answer the device's AUTH
    /// challenge; `<path>.pub` must hold the matching public key text.
    /// Defaults to `~/.android/adbkey`. Key *generation* is out of scope.
    #[arg(long, global = true)]
    pub key: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Local file or directory to push.
    pub source: PathBuf,
    /// Destination path on the device.
    pub dest: String,

    /// Delete on-device files absent from `source` when pushing a directory.
    #[arg(short = 'd', long)]
    pub delete_if_dne: bool,

    /// Ignore directories whose relative path starts with this prefix.
    #[arg(short, long)]
    pub ignore_dir: Vec<Box<str>>,

    /// Set the pushed file's mtime; defaults to the current time.
    #[arg(short, long)]
    pub mtime: Option<u32>,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    /// On-device file or directory to pull.
    pub source: String,
    /// Local destination path; defaults to the current directory.
    pub dest: Option<PathBuf>,

    /// Delete local files absent from `source` when pulling a directory.
    #[arg(short = 'd', long)]
    pub delete_if_dne: bool,

    /// Ignore directories whose relative path starts with this prefix.
    #[arg(short, long)]
    pub ignore_dir: Vec<Box<str>>,

    /// Set the pulled files' local mtime from the device's reported value.
    #[arg(short = 't', long)]
    pub set_times: bool,
}

#[derive(Args, Debug)]
pub struct ShellArgs {
    /// Command to run; omit for an interactive shell pumping stdin/stdout.
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct LogcatArgs {
    /// Extra arguments passed through to the on-device `logcat`.
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    pub apk: PathBuf,

    /// Directory on the device to stage the APK in before installing.
    #[arg(long, default_value = "/data/local/tmp/")]
    pub dest_dir: String,

    /// Pass `-r` to `pm install` (replace an existing install).
    #[arg(short, long)]
    pub replace: bool,

    /// Pass `-g` to `pm install` (grant all runtime permissions).
    #[arg(short = 'g', long)]
    pub grant_permissions: bool,
}

#[derive(Args, Debug)]
pub struct UninstallArgs {
    pub package: String,

    /// Pass `-k` to `pm uninstall` (keep data and cache directories).
    #[arg(short, long)]
    pub keep_data: bool,
}

#[derive(Args, Debug)]
pub struct RebootArgs {
    /// `bootloader`, `recovery`, `sideload`, or empty for a normal reboot.
    #[arg(default_value = "")]
    pub target: String,
}

#[derive(Args, Debug)]
pub struct FastbootDownloadArgs {
    pub file: PathBuf,
    /// Upload chunk size in KiB; older bootloaders may need `4`.
    #[arg(long, default_value_t = 1024)]
    pub chunk_kb: usize,
}

#[derive(Args, Debug)]
pub struct FastbootFlashArgs {
    pub partition: String,
    /// Flash directly from this file instead of whatever was last downloaded.
    pub file: Option<PathBuf>,
    #[arg(long, default_value_t = 1024)]
    pub chunk_kb: usize,
}

#[derive(Subcommand, Debug)]
pub enum FastbootCmd {
    /// Download a file into the device's staging buffer.
    Download(FastbootDownloadArgs),
    /// Flash the named partition, optionally from a file (download+flash).
    Flash(FastbootFlashArgs),
    Erase { partition: String },
    Getvar { name: String },
    Oem { command: String },
    /// Continue the normal boot sequence.
    Continue,
    Reboot,
    RebootBootloader,
}

#[derive(Subcommand, Debug)]
pub enum SubCmds {
    /// Run one command over `shell:` and print its output, or start an
    /// interactive shell if no command is given.
    Shell(ShellArgs),
    /// Stream `logcat` output with no read timeout until interrupted.
    Logcat(LogcatArgs),
    /// Push a local file or directory to the device.
    Push(PushArgs),
    /// Pull an on-device file or directory to the local filesystem.
    Pull(PullArgs),
    /// `STAT` one on-device path.
    Stat { path: String },
    /// `LIST` one on-device directory.
    List { path: String },
    /// Push and install an APK.
    Install(InstallArgs),
    /// Uninstall a package.
    Uninstall(UninstallArgs),
    /// Reboot the device, optionally into a named target mode.
    Reboot(RebootArgs),
    /// Remount `/system` (and other partitions) read-write.
    Remount,
    /// Restart the on-device daemon with root privileges.
    Root,
    /// Re-enable dm-verity.
    EnableVerity,
    /// Disable dm-verity.
    DisableVerity,
    /// Fastboot bootloader operations.
    #[command(subcommand)]
    Fastboot(FastbootCmd),
}

#[derive(Parser, Debug)]
#[command(
    help_template = "{author-with-newline}{about-section}Version: {version}\n{usage-heading} \
    {usage}\n{all-args} {tab}"
)]
#[command(arg_required_else_help(true))]
#[clap(version = "1.0")]
pub struct Cli {
    #[clap(flatten)]
    pub device: DeviceSelect,

    /// Increase log verbosity; repeat for more (`-v` = info, `-vv` = debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub subcmd: SubCmds,
}
