// src/cli.rs
use crate::companion;
use crate::config::{Paths, Settings};
use crate::credentials::detect_credential_store;
use crate::error::{AppError, AppResult};
use crate::export::{self, EXPORT_EXTENSION};
use crate::fsutil;
use crate::isolation::IsolatedEnv;
use crate::manager::{validate_name, ProfileManager};
use crate::token::{self, TokenStatus};
use chrono::Duration;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

/// Passphrases shorter than this are refused on export.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Tokens closer than this to expiry are flagged in `status`.
const REFRESH_THRESHOLD_HOURS: i64 = 1;

/// Switch between multiple Claude Code accounts.
#[derive(Parser, Debug)]
#[clap(name = "cs", author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Disable coloured output
    #[clap(long, global = true)]
    pub no_color: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Save the currently logged-in account as a profile
    Import {
        name: String,
        /// Free-text note shown in `list`
        #[clap(short, long)]
        description: Option<String>,
    },
    /// Log in to a new account in a scratch directory and save it as a profile
    Login {
        name: String,
        #[clap(short, long)]
        description: Option<String>,
    },
    /// Make a profile the active account
    Use { name: String },
    /// Pick the active profile from a numbered list
    Switch,
    /// Delete a profile (not the active one)
    #[clap(alias = "rm")]
    Remove {
        name: String,
        /// Do not ask for confirmation
        #[clap(short, long)]
        force: bool,
    },
    /// List stored profiles
    #[clap(alias = "ls")]
    List,
    /// Show the active profile
    Current,
    /// Show token health for every profile
    Status,
    /// Show stored files and account details of one profile
    Info { name: String },
    /// Write a passphrase-encrypted copy of a profile
    Export {
        name: String,
        /// Output file, defaults to <name>.csprofile
        #[clap(short, long, value_parser)]
        output: Option<PathBuf>,
    },
    /// Import a profile from an exported file
    ImportFile {
        #[clap(value_parser)]
        file: PathBuf,
        /// Store under this name instead of the one in the file
        #[clap(long)]
        name: Option<String>,
    },
    /// Run `claude` under a profile without changing the active one
    Exec {
        profile: String,
        /// Arguments passed through to `claude`
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Inspect or restore automatic backups
    Backup {
        #[clap(subcommand)]
        command: BackupCommands,
    },
    /// Show or change settings
    Config {
        #[clap(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// List backups, newest first
    List,
    /// Copy a backup over the live credentials
    Restore { timestamp: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the current settings
    Show,
    /// Change a setting: auto_backup, max_backups, color_output
    Set { key: String, value: String },
}

/// Terminal output with optional ANSI colour.
pub struct Printer {
    color: bool,
}

impl Printer {
    pub fn new(color: bool) -> Self {
        Printer { color }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    pub fn success(&self, msg: &str) {
        println!("{}", self.paint("32", msg));
    }

    pub fn info(&self, msg: &str) {
        println!("{}", self.paint("36", msg));
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", self.paint("33", &format!("Warning: {}", msg)));
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint("1", text)
    }

    pub fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }
}

fn read_line(prompt: &str) -> AppResult<String> {
    print!("{}", prompt);
    io::stdout().flush().map_err(|e| {
        log::error!("Failed to flush stdout: {}", e);
        AppError::Cli(format!("Failed to flush stdout: {}", e))
    })?;
    let mut input = String::new();
    io::stdin().lock().read_line(&mut input).map_err(|e| {
        log::error!("Failed to read input: {}", e);
        AppError::Cli(format!("Failed to read input: {}", e))
    })?;
    Ok(input.trim().to_string())
}

fn prompt_passphrase(prompt: &str) -> AppResult<String> {
    rpassword::prompt_password(prompt).map_err(|e| {
        log::error!("Failed to read passphrase: {}", e);
        AppError::Cli(format!("Failed to read passphrase: {}", e))
    })
}

fn check_new_passphrase(passphrase: &str, confirmation: &str) -> AppResult<()> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(AppError::Validation(format!(
            "passphrase must be at least {} characters",
            MIN_PASSPHRASE_LEN
        )));
    }
    if passphrase != confirmation {
        return Err(AppError::Validation("passphrases do not match".to_string()));
    }
    Ok(())
}

fn prompt_new_passphrase() -> AppResult<String> {
    let passphrase = prompt_passphrase("Enter export passphrase: ")?;
    let confirmation = prompt_passphrase("Confirm passphrase: ")?;
    check_new_passphrase(&passphrase, &confirmation)?;
    Ok(passphrase)
}

/// Accepts a 1-based list index or a profile name.
fn resolve_choice(input: &str, names: &[String]) -> Option<String> {
    let input = input.trim();
    if let Ok(n) = input.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| names.get(i)).cloned();
    }
    names.iter().find(|name| name.as_str() == input).cloned()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn apply_setting(settings: &mut Settings, key: &str, value: &str) -> AppResult<()> {
    let bad_bool = || AppError::Validation(format!("{} expects true or false, got {:?}", key, value));
    match key {
        "auto_backup" => settings.auto_backup = parse_bool(value).ok_or_else(bad_bool)?,
        "color_output" => settings.color_output = parse_bool(value).ok_or_else(bad_bool)?,
        "max_backups" => {
            settings.max_backups = value.parse::<i64>().map_err(|_| {
                AppError::Validation(format!("max_backups expects a number, got {:?}", value))
            })?
        }
        _ => {
            return Err(AppError::Validation(format!(
                "unknown setting {:?} (expected auto_backup, max_backups, color_output)",
                key
            )))
        }
    }
    Ok(())
}

fn describe_status(status: &TokenStatus) -> String {
    if !status.has_credentials {
        return "no credentials".to_string();
    }
    if status.is_expired {
        return "expired".to_string();
    }
    match &status.expires_in {
        Some(remaining) => {
            if token::needs_refresh(status, Duration::hours(REFRESH_THRESHOLD_HOURS)) {
                format!("expires soon ({})", remaining)
            } else {
                format!("valid ({})", remaining)
            }
        }
        None => "valid (expiry unknown)".to_string(),
    }
}

/// "512 B", "1.5 KB", "3.0 MB".
fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}

fn warn_if_expired(printer: &Printer, manager: &ProfileManager, name: &str) {
    let status = token::check_status(manager.paths(), name);
    if status.has_credentials && status.is_expired {
        printer.warn(&format!(
            "the token for {:?} has expired, run `claude` to log in again",
            name
        ));
    }
}

fn switch_to(printer: &Printer, manager: &mut ProfileManager, name: &str) -> AppResult<()> {
    if manager.config().active_profile == name {
        printer.info(&format!("Already using profile {}", printer.bold(name)));
        return Ok(());
    }
    let backup = manager.use_profile(name)?;
    if let Some(timestamp) = backup {
        log::debug!("Backed up previous credentials as {}", timestamp);
    }
    printer.success(&format!("Switched to profile {}", printer.bold(name)));
    warn_if_expired(printer, manager, name);
    Ok(())
}

/// Handles the parsed CLI command.
pub fn handle_cli_command(cli: Cli) -> AppResult<()> {
    log::debug!("Handling CLI command: {:?}", cli.command);
    let paths = Paths::discover()?;
    let store = detect_credential_store(&paths);
    let mut manager = ProfileManager::load(paths, store)?;
    let printer = Printer::new(
        manager.config().settings.color_output && !cli.no_color && io::stdout().is_terminal(),
    );

    match cli.command {
        Commands::Import { name, description } => {
            log::info!("Executing 'import' command for profile {:?}", name);
            let entry = manager.import(&name, description.as_deref())?;
            printer.success(&format!("Imported profile {}", printer.bold(&entry.name)));
            if let Some(email) = &entry.email {
                printer.info(&format!("  Account: {}", email));
            }
            if entry.is_active {
                printer.info("  Set as active profile");
            }
        }
        Commands::Login { name, description } => {
            log::info!("Executing 'login' command for profile {:?}", name);
            validate_name(&name)?;
            if companion::detect().is_none() {
                return Err(AppError::Companion(format!(
                    "'{}' not found on PATH, install Claude Code first",
                    companion::BINARY_NAME
                )));
            }
            let mut env = IsolatedEnv::for_login(manager.paths().claude_dir(), &name)?;
            printer.info("Starting Claude Code in a fresh config directory.");
            printer.info("Log in, then exit Claude Code to save the profile.");
            let run = companion::run::<&str>(&[], Some(env.env()));
            if let Err(e) = run {
                // Login may still have completed before a non-zero exit.
                log::warn!("Companion exited with an error: {}", e);
            }
            let result = manager.import_from_dir(&name, description.as_deref(), env.dir());
            env.cleanup();
            let entry = result?;
            printer.success(&format!("Saved profile {}", printer.bold(&entry.name)));
            if let Some(email) = &entry.email {
                printer.info(&format!("  Account: {}", email));
            }
        }
        Commands::Use { name } => {
            log::info!("Executing 'use' command for profile {:?}", name);
            switch_to(&printer, &mut manager, &name)?;
        }
        Commands::Switch => {
            log::info!("Executing 'switch' command");
            let profiles = manager.list();
            if profiles.is_empty() {
                return Err(AppError::NotFound(
                    "no profiles yet (import one with 'cs import <name>')".to_string(),
                ));
            }
            for (i, p) in profiles.iter().enumerate() {
                let marker = if p.is_active { "*" } else { " " };
                let email = p.email.as_deref().unwrap_or("");
                println!("{} {:>2}) {} {}", marker, i + 1, p.name, printer.dim(email));
            }
            let names: Vec<String> = profiles.into_iter().map(|p| p.name).collect();
            let choice = read_line("Select profile: ")?;
            if choice.is_empty() {
                println!("Switch cancelled.");
                return Ok(());
            }
            let name = resolve_choice(&choice, &names)
                .ok_or_else(|| AppError::Validation(format!("invalid selection {:?}", choice)))?;
            switch_to(&printer, &mut manager, &name)?;
        }
        Commands::Remove { name, force } => {
            log::info!("Executing 'remove' command for profile {:?}", name);
            if !force {
                let answer = read_line(&format!("Remove profile {:?}? (y/N): ", name))?;
                if answer.to_lowercase() != "y" {
                    println!("Removal cancelled.");
                    log::info!("Removal of {:?} cancelled by user.", name);
                    return Ok(());
                }
            }
            manager.remove(&name)?;
            printer.success(&format!("Removed profile {}", printer.bold(&name)));
        }
        Commands::List => {
            log::info!("Executing 'list' command");
            let profiles = manager.list();
            if profiles.is_empty() {
                println!("No profiles. Import one with 'cs import <name>'.");
                return Ok(());
            }
            for p in profiles {
                let marker = if p.is_active { "*" } else { " " };
                let mut line = format!("{} {}", marker, printer.bold(&p.name));
                if let Some(email) = &p.email {
                    line.push_str(&format!("  {}", email));
                }
                if let Some(desc) = &p.description {
                    line.push_str(&format!("  {}", printer.dim(desc)));
                }
                println!("{}", line);
            }
        }
        Commands::Current => {
            log::info!("Executing 'current' command");
            let entry = manager.current()?;
            println!("{}", printer.bold(&entry.name));
            if let Some(email) = &entry.email {
                println!("  Account: {}", email);
            }
            if let Some(desc) = &entry.description {
                println!("  Description: {}", desc);
            }
            println!("  Created: {}", entry.created_at.format("%Y-%m-%d %H:%M UTC"));
            let status = token::check_status(manager.paths(), &entry.name);
            println!("  Token: {}", describe_status(&status));
        }
        Commands::Status => {
            log::info!("Executing 'status' command");
            println!("Credential store: {}", manager.live().store().describe());
            let profiles = manager.list();
            if profiles.is_empty() {
                println!("No profiles.");
                return Ok(());
            }
            for p in profiles {
                let status = token::check_status(manager.paths(), &p.name);
                let marker = if p.is_active { "*" } else { " " };
                let email = status.email.clone().or(p.email).unwrap_or_default();
                println!(
                    "{} {:<16} {:<32} {}",
                    marker,
                    status.profile_name,
                    email,
                    describe_status(&status)
                );
            }
        }
        Commands::Info { name } => {
            log::info!("Executing 'info' command for profile {:?}", name);
            let info = manager.info(&name)?;
            let entry = &info.entry;
            println!("{}", printer.bold(&format!("Profile: {}", entry.name)));
            println!("  {:<15} {}", "Active:", if entry.is_active { "yes" } else { "no" });
            if let Some(email) = &entry.email {
                println!("  {:<15} {}", "Email:", email);
            }
            if let Some(desc) = &entry.description {
                println!("  {:<15} {}", "Description:", desc);
            }
            println!(
                "  {:<15} {}",
                "Created:",
                entry.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );

            println!();
            println!("{}", printer.bold("Credential files:"));
            for file in &info.files {
                match file.size {
                    Some(size) => println!("  + {} ({})", file.name, format_bytes(size)),
                    None => println!("  {}", printer.dim(&format!("- {}", file.name))),
                }
            }

            if !info.account_details.is_empty() {
                println!();
                println!("{}", printer.bold("Account details:"));
                for (key, value) in &info.account_details {
                    println!("  {:<15} {}", format!("{}:", key), value);
                }
            }
        }
        Commands::Export { name, output } => {
            log::info!("Executing 'export' command for profile {:?}", name);
            if !manager.config().profiles.contains_key(&name) {
                return Err(AppError::NotFound(format!("profile {:?} not found", name)));
            }
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.{}", name, EXPORT_EXTENSION)));
            if output.exists() {
                let answer = read_line(&format!("{:?} already exists. Overwrite? (y/N): ", output))?;
                if answer.to_lowercase() != "y" {
                    println!("Export cancelled.");
                    return Ok(());
                }
            }
            let passphrase = prompt_new_passphrase()?;
            let data = export::export_profile(&manager, &name, &passphrase)?;
            fsutil::write_private_atomic(&output, &data).map_err(|e| AppError::io(&output, e))?;
            printer.success(&format!("Exported {} to {:?}", printer.bold(&name), output));
        }
        Commands::ImportFile { file, name } => {
            log::info!("Executing 'import-file' command for {:?}", file);
            let data = fs::read(&file).map_err(|e| AppError::io(&file, e))?;
            let passphrase = prompt_passphrase("Enter passphrase: ")?;
            let entry = export::import_profile_file(&mut manager, &data, &passphrase, name.as_deref())?;
            printer.success(&format!("Imported profile {}", printer.bold(&entry.name)));
            if let Some(email) = &entry.email {
                printer.info(&format!("  Account: {}", email));
            }
        }
        Commands::Exec { profile, args } => {
            log::info!("Executing 'exec' command under profile {:?}", profile);
            let mut env = IsolatedEnv::setup(&manager, &profile)?;
            log::debug!("Running claude as {:?} in {:?}", env.profile_name(), env.dir());
            let result = companion::run(&args, Some(env.env()));
            env.cleanup();
            result?;
        }
        Commands::Backup { command } => match command {
            BackupCommands::List => {
                log::info!("Executing 'backup list' command");
                let backups = manager.backups().list()?;
                if backups.is_empty() {
                    println!("No backups.");
                    return Ok(());
                }
                for b in backups {
                    println!("{}  {}", printer.bold(&b.timestamp), printer.dim(&b.files.join(", ")));
                }
            }
            BackupCommands::Restore { timestamp } => {
                log::info!("Executing 'backup restore' command for {:?}", timestamp);
                let restored = manager.backups().restore(&timestamp)?;
                if restored == 0 {
                    printer.warn(&format!("backup {} contained no files", timestamp));
                } else {
                    printer.success(&format!(
                        "Restored {} file(s) from backup {}",
                        restored, timestamp
                    ));
                    printer.info("The active profile pointer is unchanged.");
                }
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let settings = &manager.config().settings;
                println!("Config file:  {:?}", manager.paths().config_file());
                println!("auto_backup:  {}", settings.auto_backup);
                println!(
                    "max_backups:  {} (effective {})",
                    settings.max_backups,
                    settings.effective_max_backups()
                );
                println!("color_output: {}", settings.color_output);
            }
            ConfigCommands::Set { key, value } => {
                log::info!("Executing 'config set' for {:?}", key);
                apply_setting(&mut manager.config_mut().settings, &key, &value)?;
                manager.save()?;
                printer.success(&format!("Set {} = {}", key, value));
            }
        },
    }
    Ok(())
}
