use appsody_core::operator::{self, InstallOptions};
use appsody_core::Context;
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum OperatorSubcommand {
    /// Install the appsody operator into a namespace
    Install {
        /// Namespace the operator runs in
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Namespace the operator watches (default: its own)
        #[arg(short, long, conflicts_with = "watch_all")]
        watchspace: Option<String>,
        /// Watch every namespace
        #[arg(long)]
        watch_all: bool,
    },
    /// Remove the appsody operator from a namespace
    Uninstall {
        /// Namespace the operator runs in
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Also delete the applications the operator manages
        #[arg(long)]
        force: bool,
    },
}

pub fn run(ctx: &Context, subcmd: OperatorSubcommand) -> anyhow::Result<()> {
    match subcmd {
        OperatorSubcommand::Install {
            namespace,
            watchspace,
            watch_all,
        } => {
            let opts = InstallOptions {
                watchspace,
                watch_all,
                ..InstallOptions::new(&namespace)
            };
            operator::install(ctx, &opts)?;
        }
        OperatorSubcommand::Uninstall { namespace, force } => {
            operator::uninstall(ctx, &namespace, force)?;
        }
    }
    Ok(())
}
