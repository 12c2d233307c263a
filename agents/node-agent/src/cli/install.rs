//! Service installer
//!
//! Installs the agent as a systemd service and removes it again. Uninstall
//! is best-effort at every step so it also cleans up a half-finished install.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, warn};

use crate::cli::config::{SAMPLE_CONFIG, SYSTEM_CONFIG_PATH};

pub const SERVICE_NAME: &str = "node-agent.service";

const SYSTEMCTL: &str = "/bin/systemctl";

/// Runs system commands on behalf of the installer
pub trait CommandRunner {
    /// Run `program` with `args`, failing on a non-zero exit
    fn run(&self, program: &str, args: &[&str]) -> Result<()>;
}

/// Runs commands as child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommands;

impl CommandRunner for SystemCommands {
    fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let status = Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("Failed to run {}", program))?;
        if !status.success() {
            bail!("{} {} exited with {}", program, args.join(" "), status);
        }
        Ok(())
    }
}

/// Where the installed pieces live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    pub binary_path: PathBuf,
    pub unit_path: PathBuf,
    pub config_path: PathBuf,
}

impl Default for InstallLayout {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("/usr/local/bin/node-agent"),
            unit_path: Path::new("/etc/systemd/system").join(SERVICE_NAME),
            config_path: PathBuf::from(SYSTEM_CONFIG_PATH),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    /// A unit file already exists; nothing was touched
    AlreadyInstalled,
}

/// Render the systemd unit for the agent binary
pub fn render_unit(binary_path: &Path, user: Option<&str>) -> String {
    let user_entry = user.map(|u| format!("User={}\n", u)).unwrap_or_default();
    format!(
        r#"[Unit]
Description=Haven node agent
After=network.target docker.service

[Service]
Type=simple
ExecStart={} daemon -v
Restart=always
RestartSec=5
{}
[Install]
WantedBy=multi-user.target
"#,
        binary_path.display(),
        user_entry
    )
}

/// Sample config with every line commented out
pub fn commented_sample_config() -> String {
    SAMPLE_CONFIG.lines().map(|line| format!("#{}\n", line)).collect()
}

pub struct Installer<C: CommandRunner = SystemCommands> {
    layout: InstallLayout,
    source_binary: PathBuf,
    user: Option<String>,
    runner: C,
}

impl Installer<SystemCommands> {
    /// Installer for the running binary with the default layout
    pub fn for_current_exe(user: Option<String>) -> Result<Self> {
        let source_binary =
            std::env::current_exe().context("Failed to locate the agent binary")?;
        Ok(Self::new(InstallLayout::default(), source_binary, user, SystemCommands))
    }
}

impl<C: CommandRunner> Installer<C> {
    pub fn new(layout: InstallLayout, source_binary: PathBuf, user: Option<String>, runner: C) -> Self {
        Self {
            layout,
            source_binary,
            user,
            runner,
        }
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn install(&self) -> Result<InstallOutcome> {
        warn!("Begin install");
        if self.layout.unit_path.exists() {
            error!(
                unit = %self.layout.unit_path.display(),
                "System has a systemd unit, the agent is already installed. Run uninstall first"
            );
            return Ok(InstallOutcome::AlreadyInstalled);
        }
        check_access();

        let binary = &self.layout.binary_path;
        if self.source_binary != *binary {
            warn!(to = %binary.display(), "Copy agent binary");
            if let Some(parent) = binary.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&self.source_binary, binary)
                .with_context(|| format!("Failed to copy binary to {}", binary.display()))?;
        }
        make_executable(binary)?;

        if let Some(user) = &self.user {
            warn!(user = %user, "Agent will be run under this user");
            self.ensure_user(user)?;
        }

        write_file(&self.layout.unit_path, &render_unit(binary, self.user.as_deref()))?;
        if !self.layout.config_path.exists() {
            write_file(&self.layout.config_path, &commented_sample_config())?;
        }
        warn!(
            binary = %binary.display(),
            unit = %self.layout.unit_path.display(),
            config = %self.layout.config_path.display(),
            "Agent files written"
        );

        self.runner.run(SYSTEMCTL, &["--system", "daemon-reload"])?;
        self.runner.run(SYSTEMCTL, &["--system", "enable", SERVICE_NAME])?;
        self.runner.run(SYSTEMCTL, &["--system", "start", SERVICE_NAME])?;
        warn!("Done install");
        Ok(InstallOutcome::Installed)
    }

    /// Remove everything install creates; no step depends on an earlier one succeeding
    pub fn uninstall(&self) {
        check_access();
        warn!("Begin uninstall");

        self.best_effort(SYSTEMCTL, &["--system", "stop", SERVICE_NAME]);
        self.best_effort(SYSTEMCTL, &["--system", "disable", SERVICE_NAME]);
        remove_if_exists(&self.layout.config_path);
        remove_if_exists(&self.layout.unit_path);
        remove_if_exists(&self.layout.binary_path);
        self.best_effort(SYSTEMCTL, &["--system", "daemon-reload"]);

        warn!("Done uninstall");
    }

    fn best_effort(&self, program: &str, args: &[&str]) {
        if let Err(e) = self.runner.run(program, args) {
            warn!(error = %e, "Ignoring failed command");
        }
    }

    #[cfg(unix)]
    fn ensure_user(&self, user: &str) -> Result<()> {
        let exists = nix::unistd::User::from_name(user)
            .with_context(|| format!("Failed to look up user {}", user))?
            .is_some();
        if !exists {
            warn!(user = %user, "User does not exist, creating it");
            self.runner
                .run("useradd", &["-M", "-N", "-r", "-s", "/bin/false", user])?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn ensure_user(&self, user: &str) -> Result<()> {
        bail!("Cannot provision user {} on this platform", user)
    }
}

/// Warn when not running as root; the install may still partially succeed
#[cfg(unix)]
fn check_access() {
    if !nix::unistd::Uid::effective().is_root() {
        error!("User is not root, operation can not be successful");
    }
}

#[cfg(not(unix))]
fn check_access() {}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn remove_if_exists(path: &Path) {
    if !path.exists() {
        return;
    }
    warn!(path = %path.display(), "Delete");
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to delete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<()> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("{} {}", program, args.join(" ")));
            Ok(())
        }
    }

    fn installer(dir: &TempDir) -> Installer<RecordingRunner> {
        let source = dir.path().join("build/node-agent");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"binary").unwrap();

        let layout = InstallLayout {
            binary_path: dir.path().join("bin/node-agent"),
            unit_path: dir.path().join("systemd").join(SERVICE_NAME),
            config_path: dir.path().join("etc/node-agent.toml"),
        };
        Installer::new(layout, source, None, RecordingRunner::default())
    }

    #[test]
    fn test_render_unit() {
        let unit = render_unit(Path::new("/usr/local/bin/node-agent"), Some("agent"));
        assert!(unit.contains("ExecStart=/usr/local/bin/node-agent daemon -v"));
        assert!(unit.contains("Restart=always"));
        assert!(unit.contains("User=agent\n"));
        assert!(unit.contains("After=network.target docker.service"));

        let unit = render_unit(Path::new("/usr/local/bin/node-agent"), None);
        assert!(!unit.contains("User="));
    }

    #[test]
    fn test_commented_sample_config() {
        let config = commented_sample_config();
        assert!(config.lines().all(|line| line.starts_with('#')));
        assert!(config.contains("#timeout = 10"));
    }

    #[test]
    fn test_install_writes_files_and_enables_service() {
        let dir = TempDir::new().unwrap();
        let installer = installer(&dir);

        assert_eq!(installer.install().unwrap(), InstallOutcome::Installed);

        let layout = installer.layout();
        assert_eq!(std::fs::read(&layout.binary_path).unwrap(), b"binary");
        let unit = std::fs::read_to_string(&layout.unit_path).unwrap();
        assert!(unit.contains(&format!("ExecStart={} daemon -v", layout.binary_path.display())));
        assert_eq!(
            std::fs::read_to_string(&layout.config_path).unwrap(),
            commented_sample_config()
        );
        assert_eq!(
            installer.runner.commands(),
            vec![
                "/bin/systemctl --system daemon-reload".to_string(),
                "/bin/systemctl --system enable node-agent.service".to_string(),
                "/bin/systemctl --system start node-agent.service".to_string(),
            ]
        );
    }

    #[test]
    fn test_install_keeps_existing_config() {
        let dir = TempDir::new().unwrap();
        let installer = installer(&dir);
        let config_path = &installer.layout().config_path;
        std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        std::fs::write(config_path, "timeout = 3\n").unwrap();

        installer.install().unwrap();
        assert_eq!(std::fs::read_to_string(config_path).unwrap(), "timeout = 3\n");
    }

    #[test]
    fn test_install_refuses_when_unit_exists() {
        let dir = TempDir::new().unwrap();
        let installer = installer(&dir);

        installer.install().unwrap();
        assert_eq!(installer.install().unwrap(), InstallOutcome::AlreadyInstalled);
        assert_eq!(installer.runner.commands().len(), 3);
    }

    #[test]
    fn test_uninstall_removes_everything() {
        let dir = TempDir::new().unwrap();
        let installer = installer(&dir);
        installer.install().unwrap();

        installer.uninstall();

        let layout = installer.layout();
        assert!(!layout.binary_path.exists());
        assert!(!layout.unit_path.exists());
        assert!(!layout.config_path.exists());
        assert!(installer
            .runner
            .commands()
            .ends_with(&[
                "/bin/systemctl --system stop node-agent.service".to_string(),
                "/bin/systemctl --system disable node-agent.service".to_string(),
                "/bin/systemctl --system daemon-reload".to_string(),
            ]));
    }

    #[test]
    fn test_uninstall_tolerates_partial_install() {
        let dir = TempDir::new().unwrap();
        let installer = installer(&dir);
        let unit_path = &installer.layout().unit_path;
        std::fs::create_dir_all(unit_path.parent().unwrap()).unwrap();
        std::fs::write(unit_path, "[Unit]\n").unwrap();

        installer.uninstall();
        installer.uninstall();

        assert!(!unit_path.exists());
        assert_eq!(installer.runner.commands().len(), 6);
    }
}
