use clap::Parser;
use spicarec_core::altos::AltOsProvisioner;
use spicarec_core::arming::ArmToken;
use spicarec_core::backup::BackupEngine;
use spicarec_core::config::RecoveryConfig;
use spicarec_core::convert::FilesystemConverter;
use spicarec_core::fstab;
use spicarec_core::report::{LogReporter, Reporter};
use spicarec_core::roots::RootTable;
use spicarec_core::wipe::WipeController;
use spicarec_hal::LinuxHal;

mod cli;

fn main() -> anyhow::Result<()> {
    spicarec_core::logging::init();

    let cli = cli::Cli::parse();
    let config = RecoveryConfig::load(&cli.config)?;
    let hal = LinuxHal::new();
    let reporter = LogReporter;

    // The table starts from the built-in layout and is immediately
    // resynchronised with whatever is actually on the partitions.
    let mut table = RootTable::with_defaults();
    table.recheck(&hal)?;

    match &cli.command {
        cli::Command::Recheck => {
            for info in table.iter() {
                reporter.print(&format!("{}:\t{}", info.name, info.filesystem));
            }
        }

        cli::Command::Fstab { print } => {
            if *print {
                print!("{}", fstab::render_fstab(&table));
            } else {
                fstab::write_fstab(&table, &config.fstab_path)?;
                reporter.print(&format!("Wrote {}", config.fstab_path.display()));
            }
        }

        cli::Command::Backup { roots } => {
            let engine = BackupEngine::new(&hal, &config, &reporter, cli.dry_run);
            let artifact = engine.tar_backup(&table, roots)?;
            reporter.print(&format!("Created {}", artifact.path.display()));
        }

        cli::Command::Restore {
            artifact,
            format,
            yes_i_know,
        } => {
            let engine = BackupEngine::new(&hal, &config, &reporter, cli.dry_run);
            if *format {
                let token = ArmToken::try_new(*yes_i_know)?;
                engine.tar_restore_with_format(&table, artifact, &token)?;
            } else {
                engine.tar_restore(&table, artifact)?;
            }
        }

        cli::Command::ImageBackup { root } => {
            let engine = BackupEngine::new(&hal, &config, &reporter, cli.dry_run);
            let artifact = engine.image_backup(&table, *root)?;
            reporter.print(&format!("Created {}", artifact.path.display()));
        }

        cli::Command::ImageRestore {
            artifact,
            yes_i_know,
        } => {
            let token = ArmToken::try_new(*yes_i_know)?;
            let engine = BackupEngine::new(&hal, &config, &reporter, cli.dry_run);
            engine.image_restore(&table, artifact, &token)?;
        }

        cli::Command::Convert {
            root,
            to,
            yes_i_know,
        } => {
            let token = ArmToken::try_new(*yes_i_know)?;
            let converter = FilesystemConverter::new(&hal, &config, &reporter, cli.dry_run);
            converter.convert(&mut table, *root, to.clone(), &token)?;
        }

        cli::Command::Wipe { target } => {
            let wiper = WipeController::new(&hal, &config, &reporter, cli.dry_run);
            match target {
                cli::WipeTarget::Data { yes_i_know } => {
                    let token = ArmToken::try_new(*yes_i_know)?;
                    wiper.wipe_data(&table, &token)?;
                }
                cli::WipeTarget::Cache { yes_i_know } => {
                    let token = ArmToken::try_new(*yes_i_know)?;
                    wiper.wipe_cache(&table, &token)?;
                }
                cli::WipeTarget::DalvikCache { yes_i_know } => {
                    let token = ArmToken::try_new(*yes_i_know)?;
                    wiper.wipe_dalvik_cache(&table, &token)?;
                }
            }
        }

        cli::Command::AltOs { action } => {
            let provisioner = AltOsProvisioner::new(&hal, &config, &reporter, cli.dry_run);
            match action {
                cli::AltOsAction::Provision {
                    name,
                    zip,
                    yes_i_know,
                } => {
                    let token = ArmToken::try_new(*yes_i_know)?;
                    provisioner.provision(&mut table, name, zip, &token)?;
                }
                cli::AltOsAction::Activate { name } => {
                    provisioner.activate(&mut table, name)?;
                }
                cli::AltOsAction::Deactivate => {
                    provisioner.deactivate(&mut table)?;
                }
            }
        }
    }

    Ok(())
}
