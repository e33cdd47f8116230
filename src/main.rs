use clap::{CommandFactory, Parser, Subcommand};
use dialoguer::console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use serde::Serialize;
use serde_json::{json, Value};
use std::cell::OnceCell;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

const WAREHOUSE_REPO_URL: &str = "https://github.com/RobloxStatusLive/warehouse";
const WAREHOUSE_DIR: &str = "warehouse";
const NEBULA_DIR: &str = "nebula";
const WAREHOUSE_UNIT: &str = "warehouse";
const NEBULA_UNIT: &str = "nebula";
const DEFAULT_INSTALL_ROOT: &str = "/home/rsl";
const DEFAULT_WAREHOUSE_PORT: u16 = 8080;
const NEBULA_PROTOCOL: &str = "http";
const ELEVATION_PREFIX: &str = "sudo";
const PROBE_MARKER: &str = ".rcd-write-probe";
const SKIP_ENV_CHECKS_ENV: &str = "RCD_SKIP_ENV_CHECKS";
const SEVERITY_ERROR: &str = "error";
const SEVERITY_WARNING: &str = "warning";

#[derive(Parser, Debug)]
#[command(name = "rcd", version, about = "The Roblox Status Live control daemon")]
struct Cli {
    #[arg(long, global = true)]
    json: bool,
    /// Abort when an external command exits non-zero instead of continuing
    #[arg(long, global = true)]
    strict: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install all RSL components
    Install {
        #[arg(long)]
        dest: Option<PathBuf>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        enable_logging: Option<bool>,
        #[arg(long)]
        memcache: Option<bool>,
        #[arg(long)]
        python: Option<String>,
        /// Answer every unanswered prompt with its default
        #[arg(long, default_value_t = false)]
        defaults: bool,
    },
    /// Remove installed RSL components
    Uninstall {
        #[arg(long)]
        dest: Option<PathBuf>,
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Refresh dependencies for an existing install
    Update {
        #[arg(long)]
        dest: Option<PathBuf>,
        #[arg(long)]
        python: Option<String>,
    },
    /// Start all RSL services, or the one specified
    Up { service: Option<String> },
    /// Stop all RSL services, or the one specified
    Down { service: Option<String> },
    /// Check host prerequisites
    Doctor {
        #[arg(long)]
        python: Option<String>,
    },
    #[command(external_subcommand)]
    External(Vec<OsString>),
}

#[derive(Debug, Error)]
enum RcdError {
    #[error("directory error: {0}")]
    Directory(String),
    #[error("config error: {0}")]
    ConfigFormat(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("process error: {0}")]
    Process(String),
    #[error("environment error: {0}")]
    Environment(String),
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct Context {
    json: bool,
    policy: FailurePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePolicy {
    /// Compatibility mode: a failing external command does not halt the
    /// sequence.
    BestEffort,
    Strict,
}

#[derive(Debug, Clone)]
struct CommandOutput {
    status_code: i32,
}

impl CommandOutput {
    fn success(&self) -> bool {
        self.status_code == 0
    }
}

trait ShellRunner {
    fn run(&self, command: &str, cwd: &Path, elevate: bool) -> Result<CommandOutput, io::Error>;
}

struct RealShellRunner;

impl ShellRunner for RealShellRunner {
    fn run(&self, command: &str, cwd: &Path, elevate: bool) -> Result<CommandOutput, io::Error> {
        let line = compose_shell_line(command, elevate);
        // stdio is inherited: install steps are long-running and interactive
        let status = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .current_dir(cwd)
            .status()?;
        let status_code = status
            .code()
            .unwrap_or(if status.success() { 0 } else { 1 });
        Ok(CommandOutput { status_code })
    }
}

// Elevation wraps the whole line so every stage of a compound command or
// pipeline runs privileged, not just the first word. Commands passed here
// never contain single quotes.
fn compose_shell_line(command: &str, elevate: bool) -> String {
    if elevate {
        format!("{ELEVATION_PREFIX} sh -c '{command}'")
    } else {
        command.to_string()
    }
}

fn execute_shell<R: ShellRunner>(
    runner: &R,
    privileges: &PrivilegeContext,
    command: &str,
    cwd: &Path,
    policy: FailurePolicy,
) -> Result<CommandOutput, RcdError> {
    let output = runner
        .run(command, cwd, privileges.needs_elevation())
        .map_err(|err| RcdError::Process(format!("failed to run `{command}`: {err}")))?;
    if policy == FailurePolicy::Strict && !output.success() {
        return Err(RcdError::Process(format!(
            "`{command}` exited with status {}",
            output.status_code
        )));
    }
    Ok(output)
}

/// Elevation decision for one run. The probe happens at most once; every
/// later call reuses the cached answer.
struct PrivilegeContext {
    probe_dir: PathBuf,
    decision: OnceCell<bool>,
}

impl PrivilegeContext {
    fn new(probe_dir: PathBuf) -> Self {
        Self {
            probe_dir,
            decision: OnceCell::new(),
        }
    }

    /// A context whose decision is already made; no probe ever runs.
    fn elevated() -> Self {
        let decision = OnceCell::new();
        let _ = decision.set(true);
        Self {
            probe_dir: PathBuf::new(),
            decision,
        }
    }

    fn needs_elevation(&self) -> bool {
        *self
            .decision
            .get_or_init(|| !unprivileged_write_ok(&self.probe_dir))
    }
}

// The probe is a heuristic: a later privileged operation may still fail for
// unrelated reasons, and nothing here retries it.
fn unprivileged_write_ok(dir: &Path) -> bool {
    let marker = dir.join(PROBE_MARKER);
    match fs::write(&marker, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
struct InstallTarget {
    root: PathBuf,
    warehouse_dir: PathBuf,
    nebula_dir: PathBuf,
}

impl InstallTarget {
    fn new(root: PathBuf) -> Self {
        let warehouse_dir = root.join(WAREHOUSE_DIR);
        let nebula_dir = root.join(NEBULA_DIR);
        Self {
            root,
            warehouse_dir,
            nebula_dir,
        }
    }

    fn prepare(root: PathBuf) -> Result<Self, RcdError> {
        if root.exists() && !root.is_dir() {
            return Err(RcdError::Directory(format!(
                "{} exists and is not a directory",
                root.display()
            )));
        }
        fs::create_dir_all(&root).map_err(|err| {
            RcdError::Directory(format!("failed to create {}: {err}", root.display()))
        })?;
        Ok(Self::new(root))
    }

    fn existing(root: &Path) -> Result<Self, RcdError> {
        let target = Self::new(root.to_path_buf());
        if !target.warehouse_dir.is_dir() || !target.nebula_dir.is_dir() {
            return Err(RcdError::Directory(format!(
                "no install found at {}; run `rcd install` first",
                root.display()
            )));
        }
        Ok(target)
    }
}

fn apply_config_overrides(
    template_path: &Path,
    live_path: &Path,
    overrides: &[(&str, Value)],
) -> Result<(), RcdError> {
    fs::copy(template_path, live_path)?;
    let raw = fs::read_to_string(live_path)?;
    let parsed: Value = serde_json::from_str(&raw)
        .map_err(|err| RcdError::ConfigFormat(format!("{}: {err}", template_path.display())))?;
    let Value::Object(mut config) = parsed else {
        return Err(RcdError::ConfigFormat(format!(
            "{} must contain a top-level JSON object",
            template_path.display()
        )));
    };
    for (key, value) in overrides {
        config.insert((*key).to_string(), value.clone());
    }
    fs::write(live_path, render_config_json(&Value::Object(config))?)?;
    Ok(())
}

// Both service configs ship with 4-space indentation; keep the diff quiet.
fn render_config_json(value: &Value) -> Result<Vec<u8>, RcdError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(buf)
}

fn warehouse_overrides(port: u16, enable_logging: bool) -> Vec<(&'static str, Value)> {
    vec![
        ("warehouse.webServerPort", json!(port)),
        // The live key stores the *disable* flag; downstream units key off
        // this exact polarity.
        ("warehouse.disableLogging", json!(!enable_logging)),
    ]
}

fn nebula_overrides(port: u16, enable_memcache: bool) -> Vec<(&'static str, Value)> {
    vec![
        // "upsteam" is the key existing deployments consume; the historical
        // misspelling is load-bearing.
        ("nebula.upsteam", json!(format!("localhost:{port}"))),
        ("nebula.protocol", json!(NEBULA_PROTOCOL)),
        ("nebula.enable_memcache", json!(enable_memcache)),
    ]
}

trait ConfigSource {
    fn install_root(&self) -> Result<PathBuf, RcdError>;
    fn warehouse_port(&self) -> Result<u16, RcdError>;
    fn warehouse_logging(&self) -> Result<bool, RcdError>;
    fn nebula_memcache(&self) -> Result<bool, RcdError>;
    fn python_binary(&self) -> Result<String, RcdError>;
    fn confirm_node_install(&self) -> Result<bool, RcdError>;
}

struct PromptConfigSource {
    theme: ColorfulTheme,
    dest: Option<PathBuf>,
    port: Option<u16>,
    enable_logging: Option<bool>,
    memcache: Option<bool>,
    python: Option<String>,
    defaults: bool,
}

impl PromptConfigSource {
    fn require_tty(&self, hint: &str) -> Result<(), RcdError> {
        if io::stdin().is_terminal() {
            return Ok(());
        }
        Err(RcdError::Process(format!(
            "interactive install requires a TTY; pass {hint} or --defaults"
        )))
    }
}

impl ConfigSource for PromptConfigSource {
    fn install_root(&self) -> Result<PathBuf, RcdError> {
        if let Some(dest) = &self.dest {
            return Ok(expand_path(&dest.to_string_lossy()));
        }
        if self.defaults {
            return Ok(PathBuf::from(DEFAULT_INSTALL_ROOT));
        }
        self.require_tty("--dest")?;
        let raw = Input::<String>::with_theme(&self.theme)
            .with_prompt("Install location")
            .default(DEFAULT_INSTALL_ROOT.to_string())
            .interact_text()?;
        Ok(expand_path(&raw))
    }

    fn warehouse_port(&self) -> Result<u16, RcdError> {
        if let Some(port) = self.port {
            return Ok(port);
        }
        if self.defaults {
            return Ok(DEFAULT_WAREHOUSE_PORT);
        }
        self.require_tty("--port")?;
        Ok(Input::<u16>::with_theme(&self.theme)
            .with_prompt("Warehouse web server port")
            .default(DEFAULT_WAREHOUSE_PORT)
            .interact_text()?)
    }

    fn warehouse_logging(&self) -> Result<bool, RcdError> {
        if let Some(enable) = self.enable_logging {
            return Ok(enable);
        }
        if self.defaults {
            return Ok(false);
        }
        self.require_tty("--enable-logging")?;
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt("Enable warehouse logging for systemd?")
            .default(false)
            .interact()?)
    }

    fn nebula_memcache(&self) -> Result<bool, RcdError> {
        if let Some(enable) = self.memcache {
            return Ok(enable);
        }
        if self.defaults {
            return Ok(true);
        }
        self.require_tty("--memcache")?;
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt("Enable nebula memcache (recommended)?")
            .default(true)
            .interact()?)
    }

    fn python_binary(&self) -> Result<String, RcdError> {
        if let Some(python) = &self.python {
            return Ok(python.clone());
        }
        let mut candidate = default_python_binary();
        while !python_is_compatible(&candidate) {
            if self.defaults || !io::stdin().is_terminal() {
                return Err(RcdError::Environment(
                    "nebula requires Python 3.10+; pass --python with a compatible interpreter"
                        .to_string(),
                ));
            }
            println!(
                "{}",
                style("Nebula requires Python 3.10+, but it was not detected.").yellow()
            );
            candidate = Input::<String>::with_theme(&self.theme)
                .with_prompt("Python 3.10+ binary path")
                .interact_text()?;
        }
        Ok(candidate)
    }

    fn confirm_node_install(&self) -> Result<bool, RcdError> {
        if self.defaults || !io::stdin().is_terminal() {
            return Ok(false);
        }
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt("NodeJS is not installed. Install it now?")
            .default(false)
            .interact()?)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        if raw == "~" {
            return home;
        }
        if let Some(rest) = raw.strip_prefix("~/") {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn default_python_binary() -> String {
    which::which("python3.10")
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|_| "python3".to_string())
}

fn python_is_compatible(python: &str) -> bool {
    let Ok(output) = Command::new(python).arg("-V").output() else {
        return false;
    };
    let raw = String::from_utf8_lossy(&output.stdout);
    matches!(parse_python_version(&raw), Some((3, minor)) if minor >= 10)
}

fn parse_python_version(raw: &str) -> Option<(u32, u32)> {
    let version = raw.trim().strip_prefix("Python")?.trim();
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn python_has_pip(python: &str) -> bool {
    Command::new(python)
        .args(["-m", "pip", "-V"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageManager {
    Apt,
    Dnf,
}

impl PackageManager {
    fn name(self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
        }
    }
}

fn detect_package_manager() -> Option<PackageManager> {
    if which::which("apt").is_ok() {
        return Some(PackageManager::Apt);
    }
    if which::which("dnf").is_ok() {
        return Some(PackageManager::Dnf);
    }
    None
}

#[derive(Debug, Clone, Serialize)]
struct ReadinessCheck {
    id: String,
    ok: bool,
    severity: String,
    message: String,
    remediation: String,
}

fn collect_readiness_checks(python: &str) -> Vec<ReadinessCheck> {
    let mut checks = Vec::new();

    let systemd = which::which("systemctl").is_ok();
    checks.push(ReadinessCheck {
        id: "systemd".to_string(),
        ok: systemd,
        severity: SEVERITY_ERROR.to_string(),
        message: if systemd {
            "systemctl is available".to_string()
        } else {
            "rcd relies on systemd, which does not seem to be installed".to_string()
        },
        remediation: "run rcd on a systemd-based distribution".to_string(),
    });

    let python_ok = python_is_compatible(python);
    checks.push(ReadinessCheck {
        id: "python_runtime".to_string(),
        ok: python_ok,
        severity: SEVERITY_ERROR.to_string(),
        message: if python_ok {
            format!("{python} reports Python 3.10+")
        } else {
            format!("nebula requires Python 3.10+, but {python} is missing or too old")
        },
        remediation: "pass --python with a Python 3.10+ interpreter".to_string(),
    });

    let pip_ok = python_has_pip(python);
    checks.push(ReadinessCheck {
        id: "pip".to_string(),
        ok: pip_ok,
        severity: SEVERITY_ERROR.to_string(),
        message: if pip_ok {
            format!("pip is available for {python}")
        } else {
            format!("pip is not available for {python}")
        },
        remediation: "install pip for the selected interpreter".to_string(),
    });

    let package_manager = detect_package_manager();
    checks.push(ReadinessCheck {
        id: "package_manager".to_string(),
        ok: package_manager.is_some(),
        severity: SEVERITY_ERROR.to_string(),
        message: match package_manager {
            Some(pm) => format!("package manager found: {}", pm.name()),
            None => "no suitable package manager was found".to_string(),
        },
        remediation: "install apt or dnf".to_string(),
    });

    let node = which::which("node").is_ok();
    checks.push(ReadinessCheck {
        id: "node_runtime".to_string(),
        ok: node,
        severity: SEVERITY_WARNING.to_string(),
        message: if node {
            "NodeJS is installed".to_string()
        } else {
            "warehouse requires NodeJS, which is not installed".to_string()
        },
        remediation: "re-run `rcd install` in a terminal to install NodeJS, or install it manually"
            .to_string(),
    });

    checks
}

fn node_install_recipe(package_manager: PackageManager) -> &'static [&'static str] {
    match package_manager {
        PackageManager::Dnf => &[
            "dnf install -y curl",
            "curl -fsSL https://rpm.nodesource.com/setup_18.x | bash -",
            "dnf install -y nodejs",
        ],
        PackageManager::Apt => &[
            "apt update && apt install -y curl",
            "curl -fsSL https://deb.nodesource.com/setup_18.x | bash -",
            "apt install -y nodejs",
        ],
    }
}

fn ensure_node_runtime<R: ShellRunner, S: ConfigSource>(
    runner: &R,
    source: &S,
    package_manager: PackageManager,
    policy: FailurePolicy,
) -> Result<(), RcdError> {
    if !source.confirm_node_install()? {
        return Err(RcdError::Environment(
            "warehouse requires NodeJS to be installed".to_string(),
        ));
    }
    // Package installation touches system paths, so every recipe stage runs
    // elevated regardless of what the install-tree probe would say.
    let privileges = PrivilegeContext::elevated();
    for command in node_install_recipe(package_manager) {
        execute_shell(runner, &privileges, command, Path::new("."), policy)?;
    }
    Ok(())
}

fn env_checks_bypassed() -> bool {
    matches!(
        env::var(SKIP_ENV_CHECKS_ENV).as_deref(),
        Ok("1") | Ok("true")
    )
}

fn run_install_preflight<R: ShellRunner, S: ConfigSource>(
    runner: &R,
    source: &S,
    policy: FailurePolicy,
) -> Result<String, RcdError> {
    let python = source.python_binary()?;
    let checks = collect_readiness_checks(&python);
    if let Some(check) = checks
        .iter()
        .find(|check| !check.ok && check.severity == SEVERITY_ERROR)
    {
        return Err(RcdError::Environment(format!(
            "{} ({})",
            check.message, check.remediation
        )));
    }
    if which::which("node").is_err() {
        let package_manager = detect_package_manager().ok_or_else(|| {
            RcdError::Environment(
                "no suitable package manager was found (need apt or dnf)".to_string(),
            )
        })?;
        ensure_node_runtime(runner, source, package_manager, policy)?;
    }
    Ok(python)
}

// One privilege decision per run: the context built here is the only one
// that ever probes, and every install step shares it.
fn install_entry<R: ShellRunner, S: ConfigSource>(
    ctx: &Context,
    source: &S,
    runner: &R,
) -> Result<(), RcdError> {
    let target = InstallTarget::prepare(source.install_root()?)?;
    let privileges = PrivilegeContext::new(target.root.clone());
    let python = if env_checks_bypassed() {
        source.python_binary()?
    } else {
        run_install_preflight(runner, source, ctx.policy)?
    };
    handle_install(ctx, source, runner, &python, &target, &privileges)
}

// The step order is load-bearing: the warehouse port must be resolved and
// persisted before the nebula config derives its upstream endpoint from it.
fn handle_install<R: ShellRunner, S: ConfigSource>(
    ctx: &Context,
    source: &S,
    runner: &R,
    python: &str,
    target: &InstallTarget,
    privileges: &PrivilegeContext,
) -> Result<(), RcdError> {
    if !ctx.json {
        println!(
            "{}",
            style(format!("Installing into {}", target.root.display()))
                .bold()
                .cyan()
        );
    }

    execute_shell(
        runner,
        privileges,
        &format!("git clone {WAREHOUSE_REPO_URL}"),
        &target.root,
        ctx.policy,
    )?;
    execute_shell(
        runner,
        privileges,
        "npm i",
        &target.warehouse_dir,
        ctx.policy,
    )?;

    let port = source.warehouse_port()?;
    let enable_logging = source.warehouse_logging()?;
    apply_config_overrides(
        &target.warehouse_dir.join("config").join("config.ex.json"),
        &target.warehouse_dir.join("config").join("config.json"),
        &warehouse_overrides(port, enable_logging),
    )?;

    execute_shell(
        runner,
        privileges,
        &format!("{python} -m pip install -r reqs.txt"),
        &target.nebula_dir,
        ctx.policy,
    )?;

    let memcache = source.nebula_memcache()?;
    apply_config_overrides(
        &target.nebula_dir.join("config.ex.json"),
        &target.nebula_dir.join("config.json"),
        &nebula_overrides(port, memcache),
    )?;

    if ctx.json {
        return output(
            ctx,
            json!({
                "action": "install",
                "root": target.root,
                "warehouse_port": port,
                "warehouse_logging": enable_logging,
                "nebula_upstream": format!("localhost:{port}"),
                "nebula_memcache": memcache,
            }),
        );
    }
    println!("{}", style("Install complete.").green());
    println!("  warehouse: {}", target.warehouse_dir.display());
    println!("  nebula:    {}", target.nebula_dir.display());
    Ok(())
}

fn service_units(service: Option<&str>) -> Result<Vec<&'static str>, RcdError> {
    match service {
        None => Ok(vec![WAREHOUSE_UNIT, NEBULA_UNIT]),
        Some("warehouse") => Ok(vec![WAREHOUSE_UNIT]),
        Some("nebula") => Ok(vec![NEBULA_UNIT]),
        Some(other) => Err(RcdError::Process(format!(
            "unknown service '{other}' (expected warehouse or nebula)"
        ))),
    }
}

fn handle_service_lifecycle<R: ShellRunner>(
    ctx: &Context,
    service: Option<String>,
    runner: &R,
    verb: &str,
) -> Result<(), RcdError> {
    let units = service_units(service.as_deref())?;
    let privileges = PrivilegeContext::new(PathBuf::from("."));
    for unit in &units {
        execute_shell(
            runner,
            &privileges,
            &format!("systemctl {verb} {unit}"),
            Path::new("."),
            ctx.policy,
        )?;
    }
    if ctx.json {
        return output(
            ctx,
            json!({ "action": format!("service_{verb}"), "units": units }),
        );
    }
    for unit in &units {
        println!(
            "{} {}",
            if verb == "start" { "started" } else { "stopped" },
            unit
        );
    }
    Ok(())
}

fn handle_update<R: ShellRunner>(
    ctx: &Context,
    dest: &Path,
    python: &str,
    runner: &R,
) -> Result<(), RcdError> {
    let target = InstallTarget::existing(dest)?;
    let privileges = PrivilegeContext::new(target.root.clone());
    execute_shell(
        runner,
        &privileges,
        "npm i",
        &target.warehouse_dir,
        ctx.policy,
    )?;
    execute_shell(
        runner,
        &privileges,
        &format!("{python} -m pip install -r reqs.txt"),
        &target.nebula_dir,
        ctx.policy,
    )?;
    if ctx.json {
        return output(ctx, json!({ "action": "update", "root": target.root }));
    }
    println!(
        "{}",
        style("Dependencies refreshed; live configs left untouched.").green()
    );
    Ok(())
}

fn handle_uninstall<R: ShellRunner>(
    ctx: &Context,
    dest: &Path,
    yes: bool,
    dry_run: bool,
    runner: &R,
) -> Result<(), RcdError> {
    if !yes && !dry_run {
        return Err(RcdError::Process(
            "uninstall requires --yes (or use --dry-run to preview)".to_string(),
        ));
    }
    let target = InstallTarget::existing(dest)?;
    let removals = vec![target.warehouse_dir.clone(), target.nebula_dir.clone()];
    if dry_run {
        if ctx.json {
            return output(
                ctx,
                json!({ "action": "uninstall", "dry_run": true, "would_remove": removals }),
            );
        }
        for dir in &removals {
            println!("would remove {}", dir.display());
        }
        return Ok(());
    }
    let privileges = PrivilegeContext::new(target.root.clone());
    for unit in [WAREHOUSE_UNIT, NEBULA_UNIT] {
        // a unit that was never enabled should not block removal
        let _ = execute_shell(
            runner,
            &privileges,
            &format!("systemctl stop {unit}"),
            &target.root,
            FailurePolicy::BestEffort,
        );
    }
    for dir in &removals {
        fs::remove_dir_all(dir)?;
    }
    if fs::read_dir(&target.root)?.next().is_none() {
        fs::remove_dir(&target.root)?;
    }
    if ctx.json {
        return output(
            ctx,
            json!({ "action": "uninstall", "dry_run": false, "removed": removals }),
        );
    }
    println!("{}", style("Uninstall complete.").green());
    Ok(())
}

fn handle_doctor(ctx: &Context, strict: bool, python: Option<String>) -> Result<(), RcdError> {
    let python = python.unwrap_or_else(default_python_binary);
    let checks = collect_readiness_checks(&python);
    let has_error = checks
        .iter()
        .any(|check| !check.ok && check.severity == SEVERITY_ERROR);
    let has_failure = checks.iter().any(|check| !check.ok);
    let ok = !has_error && (!strict || !has_failure);

    if ctx.json {
        let primary_error = checks
            .iter()
            .find(|check| !check.ok && check.severity == SEVERITY_ERROR)
            .or_else(|| checks.iter().find(|check| !check.ok))
            .map(|check| check.message.clone());
        let payload = JsonResult {
            ok,
            result: Some(json!({ "checks": checks, "strict": strict })),
            error: if ok { None } else { primary_error },
        };
        print_json(&payload)?;
        return Ok(());
    }

    for check in &checks {
        let state = if check.ok { "ok" } else { "fail" };
        println!(
            "[{}] {} ({}) - {}",
            state, check.id, check.severity, check.message
        );
        if !check.ok {
            println!("  remediation: {}", check.remediation);
        }
    }
    if ok {
        return Ok(());
    }
    Err(RcdError::Environment(
        checks
            .iter()
            .find(|check| !check.ok && check.severity == SEVERITY_ERROR)
            .or_else(|| checks.iter().find(|check| !check.ok))
            .map(|check| check.message.clone())
            .unwrap_or_else(|| "one or more readiness checks failed".to_string()),
    ))
}

fn print_json<T: Serialize>(payload: &JsonResult<T>) -> Result<(), RcdError> {
    println!("{}", serde_json::to_string(payload)?);
    Ok(())
}

fn output(ctx: &Context, value: Value) -> Result<(), RcdError> {
    if ctx.json {
        print_json(&JsonResult {
            ok: true,
            result: Some(value),
            error: None,
        })?;
    }
    Ok(())
}

fn print_usage() -> Result<(), RcdError> {
    Cli::command().print_help()?;
    Ok(())
}

fn resolve_dest(dest: Option<PathBuf>) -> PathBuf {
    dest.map(|dest| expand_path(&dest.to_string_lossy()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALL_ROOT))
}

fn main() {
    let cli = Cli::parse();
    let strict = cli.strict;
    let ctx = Context {
        json: cli.json,
        policy: if cli.strict {
            FailurePolicy::Strict
        } else {
            FailurePolicy::BestEffort
        },
    };
    let runner = RealShellRunner;

    let result = match cli.command {
        None => print_usage(),
        Some(Commands::External(argv)) => {
            let name = argv
                .first()
                .map(|arg| arg.to_string_lossy().to_string())
                .unwrap_or_default();
            eprintln!("unknown command '{name}', showing help");
            print_usage()
        }
        Some(Commands::Install {
            dest,
            port,
            enable_logging,
            memcache,
            python,
            defaults,
        }) => {
            let source = PromptConfigSource {
                theme: ColorfulTheme::default(),
                dest,
                port,
                enable_logging,
                memcache,
                python,
                defaults,
            };
            install_entry(&ctx, &source, &runner)
        }
        Some(Commands::Uninstall { dest, yes, dry_run }) => {
            handle_uninstall(&ctx, &resolve_dest(dest), yes, dry_run, &runner)
        }
        Some(Commands::Update { dest, python }) => handle_update(
            &ctx,
            &resolve_dest(dest),
            &python.unwrap_or_else(default_python_binary),
            &runner,
        ),
        Some(Commands::Up { service }) => handle_service_lifecycle(&ctx, service, &runner, "start"),
        Some(Commands::Down { service }) => handle_service_lifecycle(&ctx, service, &runner, "stop"),
        Some(Commands::Doctor { python }) => handle_doctor(&ctx, strict, python),
    };

    if let Err(err) = result {
        if ctx.json {
            let payload = JsonResult::<Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
            };
            if print_json(&payload).is_err() {
                eprintln!("{err}");
            }
        } else {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }
}
