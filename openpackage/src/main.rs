#![deny(missing_docs)]

//! CLI binary interface for openpackage

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use console::Term;
use openpackage::errors::OpkgResult;
use openpackage::install::InstallReport;
use openpackage::save::SaveOptions;
use openpackage::uninstall::UninstallOptions;
use openpackage::version::BumpKind;
use openpackage::{do_install, do_save, do_uninstall, InstallArgs};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

mod cli;

fn main() {
    let config = Cli::parse();
    init_logging(config.verbose);

    match real_main(&config) {
        Ok(()) => {}
        Err(err) if err.is_cancellation() => {
            // backing out of a prompt is not a failure
            let _ = Term::stderr().write_line("cancelled");
        }
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            std::process::exit(1);
        }
    }
}

fn init_logging(level: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn real_main(config: &Cli) -> OpkgResult<()> {
    match &config.command {
        Commands::Save(args) => cmd_save(args),
        Commands::Install(args) => cmd_install(args),
        Commands::Uninstall(args) => cmd_uninstall(args),
    }
}

fn cmd_save(args: &cli::SaveArgs) -> OpkgResult<()> {
    let mut directory = None;
    let mut stable = false;
    for token in &args.rest {
        if token.eq_ignore_ascii_case("stable") {
            stable = true;
        } else if directory.is_none() {
            directory = Some(Utf8PathBuf::from(token));
        }
    }

    let bump = args.bump.as_deref().map(BumpKind::parse).transpose()?;
    let options = SaveOptions {
        directory,
        stable,
        bump,
        force: args.force,
        rename: args.rename.clone(),
        include: args.include.clone(),
        include_dev: args.include_dev.clone(),
        skip_project_link: false,
    };
    let report = do_save(&args.package, &options)?;

    let mut out = Term::stdout();
    writeln!(
        out,
        "saved {} ({} files)",
        out.style()
            .green()
            .apply_to(format!("{}@{}", report.name, report.version)),
        report.file_count,
    )?;
    writeln!(out, "  -> {}", report.registry_dir)?;
    if !report.pruned_wips.is_empty() {
        writeln!(out, "  pruned {} stale WIP version(s)", report.pruned_wips.len())?;
    }
    Ok(())
}

fn cmd_install(args: &cli::InstallArgs) -> OpkgResult<()> {
    if args.remote {
        tracing::warn!("no remote registry is configured; resolving locally");
    }
    let install_args = InstallArgs {
        local: args.local,
        dev: args.dev,
        force: args.force,
        dry_run: args.dry_run,
    };
    let report = do_install(&args.packages, &install_args)?;
    print_install_report(&report, args.dry_run)?;
    Ok(())
}

fn print_install_report(report: &InstallReport, dry_run: bool) -> std::io::Result<()> {
    let mut out = Term::stdout();
    let verb = if dry_run { "would install" } else { "installed" };
    for (name, version) in &report.installed {
        writeln!(
            out,
            "{verb} {}",
            out.style().green().apply_to(format!("{name}@{version}"))
        )?;
    }
    for (name, version) in &report.kept {
        writeln!(
            out,
            "kept {} (already satisfied)",
            out.style().blue().apply_to(format!("{name}@{version}"))
        )?;
    }
    if !report.skipped.is_empty() {
        writeln!(out, "{} file(s) kept with workspace edits", report.skipped.len())?;
    }
    writeln!(out, "{} file(s) written", report.written.len())?;
    Ok(())
}

fn cmd_uninstall(args: &cli::UninstallArgs) -> OpkgResult<()> {
    let options = UninstallOptions {
        recursive: args.recursive,
        keep_data: args.keep_data,
        dry_run: args.dry_run,
    };
    let report = do_uninstall(&args.package, &options)?;

    let mut out = Term::stdout();
    let verb = if args.dry_run { "would remove" } else { "removed" };
    for name in &report.removed_packages {
        writeln!(out, "{verb} {}", out.style().red().apply_to(name.to_string()))?;
    }
    if !args.recursive && !report.dangling.is_empty() {
        let names: Vec<String> = report.dangling.iter().map(ToString::to_string).collect();
        writeln!(
            out,
            "dangling dependencies left behind: {} (pass --recursive to remove them)",
            names.join(", ")
        )?;
    }
    Ok(())
}
